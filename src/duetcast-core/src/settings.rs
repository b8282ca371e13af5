//! Environment-derived run settings and API credentials.

use std::env;

use crate::error::DuetError;

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_TOPIC: &str =
    "Почему разные органы стареют с разной скоростью и можно ли это изменить?";
/// Roughly fifteen to twenty minutes of dialog.
pub const DEFAULT_TURNS: usize = 22;

/// Credentials shared by the completion and speech clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiCredentials {
    pub api_base: String,
    pub api_key: Option<String>,
}

impl ApiCredentials {
    pub fn new(api_base: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            api_base: api_base.into(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        }
    }

    /// Read `OPENAI_API_KEY` and `OPENAI_API_BASE` (or `OPENAI_BASE_URL`).
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let api_base = lookup("OPENAI_API_BASE")
            .or_else(|| lookup("OPENAI_BASE_URL"))
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        Self::new(api_base, lookup("OPENAI_API_KEY"))
    }

    /// The API key, or a configuration error when it is missing.
    pub fn require_key(&self) -> Result<&str, DuetError> {
        self.api_key.as_deref().ok_or_else(DuetError::missing_credential)
    }
}

/// What to generate and how much of it to assemble.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSettings {
    pub topic: String,
    pub turns: usize,
    /// Only the first N dialog artifacts are assembled; `None` means all.
    pub max_audio_files: Option<usize>,
    /// Remove stale artifacts from the audio directory before generating.
    pub clean_audio: bool,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            topic: DEFAULT_TOPIC.to_string(),
            turns: DEFAULT_TURNS,
            max_audio_files: None,
            clean_audio: true,
        }
    }
}

impl RunSettings {
    /// Read `TOPIC`, `TURNS`, `MAX_AUDIO_FILES` and `CLEAN_AUDIO_BEFORE_RUN`.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let max_audio_files = env_int(&lookup, "MAX_AUDIO_FILES", 0);

        Self {
            topic: lookup("TOPIC")
                .filter(|t| !t.trim().is_empty())
                .unwrap_or(defaults.topic),
            turns: env_int(&lookup, "TURNS", defaults.turns),
            max_audio_files: (max_audio_files > 0).then_some(max_audio_files),
            clean_audio: env_bool(&lookup, "CLEAN_AUDIO_BEFORE_RUN", defaults.clean_audio),
        }
    }
}

fn env_int(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: usize) -> usize {
    lookup(name)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_bool(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: bool) -> bool {
    match lookup(name) {
        Some(raw) => matches!(
            raw.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "y" | "on"
        ),
        None => default,
    }
}
