//! DuetCast CLI - science dialog video generator
//!
//! Runs a scripted conversation between two AI personas, voices it and
//! renders the result as an MP4 with avatar frames.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use colored::Colorize;
use duetcast_core::{
    ApiCredentials, Config, DuetError, FFMPEG_HINT, Pipeline, PipelineEvent, RunSettings,
    default_config,
};
use tracing_subscriber::EnvFilter;

/// Looked up in the working directory when `--config` is not given.
const DEFAULT_CONFIG_FILE: &str = "duetcast.toml";

#[derive(Parser)]
#[command(
    name = "duetcast",
    version,
    about = "Turn an AI science dialog into a narrated video",
    long_about = "Generates a Russian-language dialog between a scientist and a skeptic using \
OpenAI-compatible APIs, synthesizes every line and renders an MP4 with ffmpeg."
)]
struct Cli {
    /// The topic of the episode (overrides TOPIC)
    #[arg(value_name = "TOPIC")]
    topic: Option<String>,

    /// Number of dialog turns (overrides TURNS)
    #[arg(short, long, value_name = "TURNS")]
    turns: Option<usize>,

    /// Path to a TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Only assemble the first N audio files, 0 for all (overrides MAX_AUDIO_FILES)
    #[arg(long, value_name = "N")]
    max_audio_files: Option<usize>,

    /// Keep audio from previous runs (overrides CLEAN_AUDIO_BEFORE_RUN)
    #[arg(long)]
    keep_audio: bool,

    /// Stop after the transcript without rendering a video
    #[arg(long)]
    skip_video: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load environment variables from .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e.to_string().red());
            if e.is_render() {
                eprintln!("{}", FFMPEG_HINT.yellow());
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), DuetError> {
    let config = load_config(cli.config.as_deref())?;
    let settings = apply_overrides(RunSettings::from_env(), &cli);
    let credentials = ApiCredentials::from_env();

    print_header(&config, &settings);

    let mut pipeline = Pipeline::from_credentials(config, settings, &credentials)?
        .with_callback(create_console_callback());
    if cli.skip_video {
        pipeline = pipeline.without_video();
    }

    let summary = pipeline.run().await?;

    println!();
    println!("{}", "═".repeat(70).bright_blue());
    println!(
        "{}",
        format!(
            "  Dialog finished: {} turns, {} audio files.",
            summary.history.len(),
            summary.artifacts.len()
        )
        .bright_green()
        .bold()
    );
    if let Some(video) = summary.video {
        println!("  {} {}", "Video:".bold(), video.display().to_string().bright_white());
    }
    println!("{}", "═".repeat(70).bright_blue());
    println!();

    Ok(())
}

/// Explicit file, then `duetcast.toml` if present, then the built-in defaults.
fn load_config(path: Option<&Path>) -> Result<Config, DuetError> {
    match path {
        Some(path) => Config::load(path),
        None if Path::new(DEFAULT_CONFIG_FILE).is_file() => Config::load(DEFAULT_CONFIG_FILE),
        None => Ok(default_config()),
    }
}

fn apply_overrides(mut settings: RunSettings, cli: &Cli) -> RunSettings {
    if let Some(topic) = cli.topic.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        settings.topic = topic.to_string();
    }
    if let Some(turns) = cli.turns {
        settings.turns = turns;
    }
    if settings.turns == 0 {
        eprintln!("{}", "Warning: Turns increased to minimum of 1 (was 0).".yellow());
        settings.turns = 1;
    }
    if let Some(limit) = cli.max_audio_files {
        settings.max_audio_files = (limit > 0).then_some(limit);
    }
    if cli.keep_audio {
        settings.clean_audio = false;
    }
    settings
}

fn print_header(config: &Config, settings: &RunSettings) {
    println!();
    println!("{}", "═".repeat(70).bright_blue());
    println!("{}", "  DuetCast - science dialog".bright_blue().bold());
    println!("{}", "═".repeat(70).bright_blue());
    println!();
    println!("{} {}", "Topic:".bold(), settings.topic.bright_white());
    println!("{} {}", "Turns:".bold(), settings.turns);
    println!();
    println!("{}", "Speakers:".bold());
    for (i, agent) in config.agents.iter().enumerate() {
        println!(
            "  {}. {} ({}) - voice {}",
            i + 1,
            agent.display_name().bright_cyan(),
            agent.role.display_name().yellow(),
            agent.voice.dimmed()
        );
    }
    println!();
    println!("{}", "─".repeat(70).dimmed());
}

/// Create a callback that prints pipeline events to the console.
fn create_console_callback() -> Box<dyn Fn(PipelineEvent) + Send + Sync> {
    Box::new(move |event| match event {
        PipelineEvent::AudioCleaned { removed } => {
            if removed > 0 {
                println!("{}", format!("Removed {} stale audio files.", removed).dimmed());
            }
        }
        PipelineEvent::TurnStart {
            index,
            total,
            speaker,
            role,
        } => {
            println!(
                "{} {} {} {}",
                "▶".bright_cyan(),
                format!("[{}/{}]", index, total).dimmed(),
                speaker.bright_cyan().bold(),
                format!("({})", role).yellow()
            );
        }
        PipelineEvent::TurnFinished { text, .. } => {
            let wrapped = textwrap(&text, 66);
            for line in wrapped.lines() {
                println!("  {}", line);
            }
        }
        PipelineEvent::AudioSaved { path, .. } => {
            println!("  {} {}", "♪".green(), path.display().to_string().dimmed());
            println!();
        }
        PipelineEvent::AudioFailed {
            index,
            speaker,
            error,
        } => {
            println!(
                "  {}",
                format!("No audio for turn {} ({}): {}", index, speaker, error).yellow()
            );
            println!();
        }
        PipelineEvent::TranscriptSaved { path } => {
            println!("{}", "─".repeat(70).dimmed());
            println!("{} {}", "Transcript:".bold(), path.display());
        }
        PipelineEvent::TimelineReady {
            clips,
            introductions,
            seconds,
        } => {
            println!(
                "{} {} clips ({} introductions), {:.1}s",
                "Timeline:".bold(),
                clips,
                introductions,
                seconds
            );
        }
        PipelineEvent::RenderStart { output } => {
            println!(
                "{}",
                format!("Rendering {} ...", output.display()).bright_magenta()
            );
        }
        PipelineEvent::VideoSaved { .. } => {
            // Handled in run
        }
    })
}

/// Simple text wrapping function.
fn textwrap(text: &str, width: usize) -> String {
    let mut result = String::new();
    let mut current_line_len = 0;

    for word in text.split_whitespace() {
        let word_len = word.chars().count();
        if current_line_len + word_len + 1 > width && current_line_len > 0 {
            result.push('\n');
            current_line_len = 0;
        }
        if current_line_len > 0 {
            result.push(' ');
            current_line_len += 1;
        }
        result.push_str(word);
        current_line_len += word_len;
    }

    result
}
