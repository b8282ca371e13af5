//! Audio duration discovery.

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::DuetError;

/// Discovers the playback duration of a media file, in seconds.
#[async_trait]
pub trait DurationProbe: Send + Sync {
    async fn duration(&self, path: &Path) -> Result<f64, DuetError>;
}

/// Reads durations with the system `ffprobe` binary.
#[derive(Debug, Clone, Default)]
pub struct Ffprobe;

#[async_trait]
impl DurationProbe for Ffprobe {
    async fn duration(&self, path: &Path) -> Result<f64, DuetError> {
        let output = Command::new("ffprobe")
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .output()
            .await
            .map_err(|e| DuetError::Probe(format!("failed to run ffprobe: {}", e)))?;

        if !output.status.success() {
            return Err(DuetError::Probe(format!(
                "ffprobe failed for {}: {}",
                path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        parse_duration(&String::from_utf8_lossy(&output.stdout))
            .ok_or_else(|| DuetError::Probe(format!("no duration reported for {}", path.display())))
    }
}

/// Parse ffprobe's bare duration output; zero, negative and `N/A` are rejected.
fn parse_duration(stdout: &str) -> Option<f64> {
    stdout
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|d| d.is_finite() && *d > 0.0)
}
