//! Plain-text dialog transcripts.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use crate::error::DuetError;
use crate::orchestrator::Turn;

/// `{logs_dir}/transcript_{YYYYmmdd_HHMMSS}.txt`
pub fn transcript_path(logs_dir: &Path, at: DateTime<Local>) -> PathBuf {
    logs_dir.join(format!("transcript_{}.txt", at.format("%Y%m%d_%H%M%S")))
}

/// One record per turn: speaker line, text, blank line.
pub fn render_transcript(history: &[Turn]) -> String {
    history
        .iter()
        .map(|turn| format!("{}:\n{}\n\n", turn.speaker, turn.text))
        .collect()
}

pub fn write_transcript(history: &[Turn], path: &Path) -> Result<(), DuetError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, render_transcript(history))?;
    Ok(())
}
