//! End-to-end run: dialog, speech, transcript, timeline, video.
//!
//! Stages run strictly one after another. A failed speech request only
//! costs that turn its audio; everything else that fails stops the run.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Local;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::DuetError;
use crate::llm::{ChatModel, OpenAiChat};
use crate::orchestrator::{DialogOrchestrator, Turn};
use crate::probe::{DurationProbe, Ffprobe};
use crate::render::{FfmpegRenderer, Renderer};
use crate::settings::{ApiCredentials, RunSettings};
use crate::speech::{OpenAiSpeech, SpeechEngine, SpeechSynthesizer, clean_audio_dir};
use crate::timeline::{ClipKind, TimelineAssembler};
use crate::transcript::{transcript_path, write_transcript};

/// Callback for pipeline events.
pub type PipelineCallback = Box<dyn Fn(PipelineEvent) + Send + Sync>;

/// Progress reported while a run is in flight.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// Stale artifacts were removed before generating.
    AudioCleaned { removed: usize },
    /// A speaker is about to be generated.
    TurnStart { index: usize, total: usize, speaker: String, role: String },
    /// A turn was finalized and appended to the history.
    TurnFinished { index: usize, speaker: String, text: String },
    AudioSaved { index: usize, path: PathBuf },
    /// Speech failed for one turn; the run continues without its audio.
    AudioFailed { index: usize, speaker: String, error: String },
    TranscriptSaved { path: PathBuf },
    /// The clip list is ready for rendering.
    TimelineReady { clips: usize, introductions: usize, seconds: f64 },
    RenderStart { output: PathBuf },
    VideoSaved { path: PathBuf },
}

/// What a finished run produced.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub history: Vec<Turn>,
    pub artifacts: Vec<PathBuf>,
    pub transcript: PathBuf,
    pub video: Option<PathBuf>,
}

pub struct Pipeline {
    config: Config,
    settings: RunSettings,
    model: Arc<dyn ChatModel>,
    speech: Arc<dyn SpeechEngine>,
    probe: Arc<dyn DurationProbe>,
    renderer: Box<dyn Renderer>,
    render_video: bool,
    callback: Option<PipelineCallback>,
}

impl Pipeline {
    pub fn new(
        config: Config,
        settings: RunSettings,
        model: Arc<dyn ChatModel>,
        speech: Arc<dyn SpeechEngine>,
        probe: Arc<dyn DurationProbe>,
        renderer: Box<dyn Renderer>,
    ) -> Result<Self, DuetError> {
        config.validate()?;
        Ok(Self {
            config,
            settings,
            model,
            speech,
            probe,
            renderer,
            render_video: true,
            callback: None,
        })
    }

    /// Production wiring: OpenAI chat and speech, ffprobe and ffmpeg.
    ///
    /// A missing API key fails here, before any work starts.
    pub fn from_credentials(
        config: Config,
        settings: RunSettings,
        credentials: &ApiCredentials,
    ) -> Result<Self, DuetError> {
        let model = OpenAiChat::new(credentials, config.dialog.model.clone())?;
        let speech = OpenAiSpeech::new(credentials, config.speech.model.clone())?;
        let renderer = FfmpegRenderer::new(
            config.canvas()?,
            config.video.fps,
            config.paths.tmp_dir.clone(),
        )?;

        Self::new(
            config,
            settings,
            Arc::new(model),
            Arc::new(speech),
            Arc::new(Ffprobe),
            Box::new(renderer),
        )
    }

    /// Set a callback for pipeline events.
    pub fn with_callback(mut self, callback: PipelineCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Stop after the transcript; no timeline or video is built.
    pub fn without_video(mut self) -> Self {
        self.render_video = false;
        self
    }

    /// Run every stage in order.
    pub async fn run(&self) -> Result<RunSummary, DuetError> {
        if self.settings.clean_audio {
            let removed = clean_audio_dir(&self.config.paths.audio_dir);
            info!(removed, dir = %self.config.paths.audio_dir.display(), "cleaned audio directory");
            self.emit_event(PipelineEvent::AudioCleaned { removed });
        }

        let (history, artifacts) = self.generate().await?;

        let transcript = transcript_path(&self.config.paths.logs_dir, Local::now());
        write_transcript(&history, &transcript)?;
        self.emit_event(PipelineEvent::TranscriptSaved {
            path: transcript.clone(),
        });

        let video = if self.render_video {
            Some(self.assemble_and_render().await?)
        } else {
            None
        };

        Ok(RunSummary {
            history,
            artifacts,
            transcript,
            video,
        })
    }

    /// Generate every turn, synthesizing each one as soon as it is final.
    pub async fn generate(&self) -> Result<(Vec<Turn>, Vec<PathBuf>), DuetError> {
        let mut orchestrator =
            DialogOrchestrator::new(self.config.clone(), self.model.clone(), &self.settings.topic)?;
        let synthesizer = SpeechSynthesizer::new(self.speech.clone(), &self.config.paths.audio_dir);
        let total = self.settings.turns;
        let mut artifacts = Vec::with_capacity(total);

        info!(topic = %self.settings.topic, turns = total, "generating dialog");

        for index in 1..=total {
            let agent = orchestrator.next_agent().clone();
            self.emit_event(PipelineEvent::TurnStart {
                index,
                total,
                speaker: agent.display_name(),
                role: agent.role.display_name().to_string(),
            });

            let turn = orchestrator.next_turn().await?.clone();
            self.emit_event(PipelineEvent::TurnFinished {
                index,
                speaker: turn.speaker.clone(),
                text: turn.text.clone(),
            });

            match synthesizer
                .synthesize_turn(&turn.text, &turn.speaker, turn.index, &agent.voice)
                .await
            {
                Ok(path) => {
                    self.emit_event(PipelineEvent::AudioSaved {
                        index,
                        path: path.clone(),
                    });
                    artifacts.push(path);
                }
                Err(e) => {
                    warn!(turn = index, error = %e, "could not synthesize turn, continuing without audio");
                    self.emit_event(PipelineEvent::AudioFailed {
                        index,
                        speaker: turn.speaker.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        Ok((orchestrator.history().to_vec(), artifacts))
    }

    /// Build the timeline from the audio directory and render it.
    pub async fn assemble_and_render(&self) -> Result<PathBuf, DuetError> {
        let mut assembler =
            TimelineAssembler::new(&self.config, self.speech.clone(), self.probe.clone())?
                .with_max_audio_files(self.settings.max_audio_files);

        let clips = assembler
            .assemble(
                &self.config.paths.audio_dir,
                &self.settings.topic,
                &self.config.avatar_map(),
            )
            .await?;

        self.emit_event(PipelineEvent::TimelineReady {
            clips: clips.len(),
            introductions: clips
                .iter()
                .filter(|c| matches!(c.kind, ClipKind::SpeakerIntro { .. }))
                .count(),
            seconds: clips.iter().map(|c| c.duration()).sum(),
        });

        let output = self.config.paths.output.clone();
        self.emit_event(PipelineEvent::RenderStart {
            output: output.clone(),
        });
        self.renderer.render(&clips, &output).await?;

        info!(output = %output.display(), "video saved");
        self.emit_event(PipelineEvent::VideoSaved {
            path: output.clone(),
        });
        Ok(output)
    }

    /// Emit an event if a callback is registered.
    fn emit_event(&self, event: PipelineEvent) {
        if let Some(ref callback) = self.callback {
            callback(event);
        }
    }
}
