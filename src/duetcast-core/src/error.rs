//! Error types for the dialog-to-video pipeline.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DuetError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("OpenAI API error: {0}")]
    Llm(#[from] async_openai::error::OpenAIError),

    #[error("Speech synthesis failed: {0}")]
    Synthesis(String),

    #[error("Avatar for '{speaker}' not found: {}", .path.display())]
    AssetMissing { speaker: String, path: PathBuf },

    #[error("No dialog audio files found in {}", .0.display())]
    NoArtifacts(PathBuf),

    #[error("No clips could be built from the dialog audio")]
    NoClips,

    #[error("Could not read audio duration: {0}")]
    Probe(String),

    #[error("Video rendering failed: {0}")]
    Render(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DuetError {
    /// Missing `OPENAI_API_KEY`, with a hint on where to put it.
    pub fn missing_credential() -> Self {
        DuetError::Configuration(
            "OPENAI_API_KEY is not set. Add `OPENAI_API_KEY=your_key` to a .env file in the \
             project root or export it in the environment."
                .to_string(),
        )
    }

    /// Whether the error comes from the video encoder.
    pub fn is_render(&self) -> bool {
        matches!(self, DuetError::Render(_))
    }
}
