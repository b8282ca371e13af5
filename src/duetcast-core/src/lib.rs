//! DuetCast Core Library
//!
//! Generates a two-persona Russian science dialog, voices every line and
//! assembles the result into a single video with avatar frames.

pub mod agent;
pub mod canvas;
pub mod config;
pub mod constraints;
pub mod error;
pub mod llm;
pub mod orchestrator;
pub mod pipeline;
pub mod probe;
pub mod render;
pub mod settings;
pub mod speech;
pub mod timeline;
pub mod transcript;

pub use agent::{Agent, AgentRole, Gender};
pub use config::{Config, default_config};
pub use error::DuetError;
pub use orchestrator::{DialogOrchestrator, Turn};
pub use pipeline::{Pipeline, PipelineCallback, PipelineEvent, RunSummary};
pub use render::FFMPEG_HINT;
pub use settings::{ApiCredentials, RunSettings};
