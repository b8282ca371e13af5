//! Speech synthesis for dialog turns and narration.
//!
//! Each turn becomes one mp3 file named `{NNN}_{speaker slug}.mp3`, so
//! sorting the audio directory by file name reproduces the turn order.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::DuetError;
use crate::settings::ApiCredentials;

/// Text-to-speech capability: text in, encoded mp3 bytes out.
#[async_trait]
pub trait SpeechEngine: Send + Sync {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>, DuetError>;
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    voice: &'a str,
    input: &'a str,
    response_format: &'a str,
}

/// Speech over the OpenAI-compatible `/audio/speech` endpoint.
pub struct OpenAiSpeech {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OpenAiSpeech {
    /// Fails before any request when no key is configured.
    pub fn new(credentials: &ApiCredentials, model: impl Into<String>) -> Result<Self, DuetError> {
        let api_key = credentials.require_key()?.to_string();

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| DuetError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            endpoint: format!("{}/audio/speech", credentials.api_base.trim_end_matches('/')),
            api_key,
            model: model.into(),
        })
    }
}

#[async_trait]
impl SpeechEngine for OpenAiSpeech {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>, DuetError> {
        let body = SpeechRequest {
            model: &self.model,
            voice,
            input: text,
            response_format: "mp3",
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| DuetError::Synthesis(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DuetError::Synthesis(format!("{}: {}", status, error_detail(&body))));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| DuetError::Synthesis(format!("failed to read audio: {}", e)))?;
        Ok(bytes.to_vec())
    }
}

/// The `error.message` of an API error body, or the raw body.
fn error_detail(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

/// Writes synthesized speech to disk under deterministic names.
#[derive(Clone)]
pub struct SpeechSynthesizer {
    engine: Arc<dyn SpeechEngine>,
    audio_dir: PathBuf,
}

impl SpeechSynthesizer {
    pub fn new(engine: Arc<dyn SpeechEngine>, audio_dir: impl Into<PathBuf>) -> Self {
        Self {
            engine,
            audio_dir: audio_dir.into(),
        }
    }

    /// Synthesize one dialog turn and return the artifact path.
    pub async fn synthesize_turn(
        &self,
        text: &str,
        speaker: &str,
        turn_index: usize,
        voice: &str,
    ) -> Result<PathBuf, DuetError> {
        let path = self.audio_dir.join(artifact_file_name(turn_index, speaker));
        self.synthesize_to(text, voice, &path).await?;
        info!(turn = turn_index, path = %path.display(), "audio saved");
        Ok(path)
    }

    /// Synthesize `text` into an arbitrary file, creating parent directories.
    pub async fn synthesize_to(&self, text: &str, voice: &str, path: &Path) -> Result<(), DuetError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        debug!(voice, chars = text.chars().count(), "synthesizing speech");
        let audio = self.engine.synthesize(text, voice).await?;
        tokio::fs::write(path, audio).await?;
        Ok(())
    }
}

/// Speaker name reduced for use in a file name: lowercase, no whitespace or brackets.
pub fn speaker_slug(speaker: &str) -> String {
    let slug: String = speaker
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '(' | ')' | '[' | ']' | '{' | '}'))
        .collect();

    if slug.is_empty() {
        "speaker".to_string()
    } else {
        slug
    }
}

/// `{NNN}_{slug}.mp3` with a zero-padded, 1-based turn number.
pub fn artifact_file_name(turn_index: usize, speaker: &str) -> String {
    format!("{:03}_{}.mp3", turn_index, speaker_slug(speaker))
}

/// Remove stale `*.mp3` artifacts from `dir`; returns how many were removed.
///
/// A missing directory is not an error, and files that cannot be removed are skipped.
pub fn clean_audio_dir(dir: &Path) -> usize {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };

    entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "mp3"))
        .filter(|path| fs::remove_file(path).is_ok())
        .count()
}
