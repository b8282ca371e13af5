//! Video rendering with the system `ffmpeg` binary.
//!
//! Each clip is encoded into its own segment (looped still frame plus its
//! audio track), then the segments are joined with the concat demuxer.
//! Segments are scaled and padded to the canvas, so a frame of a different
//! size can not break the concatenation.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::canvas::Canvas;
use crate::error::DuetError;
use crate::timeline::Clip;

/// Hint printed alongside encoder failures.
pub const FFMPEG_HINT: &str = "Make sure ffmpeg is installed and available on PATH \
(e.g. `apt install ffmpeg`, `brew install ffmpeg` or `choco install ffmpeg`).";

#[async_trait]
pub trait Renderer: Send + Sync {
    /// Encode `clips` in order into a single file at `output`.
    async fn render(&self, clips: &[Clip], output: &Path) -> Result<(), DuetError>;
}

pub async fn is_ffmpeg_on_path() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

pub struct FfmpegRenderer {
    canvas: Canvas,
    fps: u32,
    work_dir: PathBuf,
}

impl FfmpegRenderer {
    pub fn new(canvas: Canvas, fps: u32, work_dir: impl Into<PathBuf>) -> Result<Self, DuetError> {
        if fps == 0 {
            return Err(DuetError::Configuration("video fps must be non-zero".to_string()));
        }
        Ok(Self {
            canvas,
            fps,
            work_dir: work_dir.into(),
        })
    }

    /// Arguments encoding one clip into `segment`.
    fn segment_args(&self, clip: &Clip, segment: &Path) -> Vec<String> {
        let (w, h) = (self.canvas.width, self.canvas.height);
        let [r, g, b] = self.canvas.background;
        let filter = format!(
            "scale={w}:{h}:force_original_aspect_ratio=decrease,\
             pad={w}:{h}:(ow-iw)/2:(oh-ih)/2:color=0x{r:02x}{g:02x}{b:02x},format=yuv420p"
        );

        vec![
            "-y".into(),
            "-loglevel".into(),
            "error".into(),
            "-loop".into(),
            "1".into(),
            "-framerate".into(),
            self.fps.to_string(),
            "-i".into(),
            clip.visual.frame.to_string_lossy().into_owned(),
            "-i".into(),
            clip.audio.to_string_lossy().into_owned(),
            "-t".into(),
            format!("{:.3}", clip.duration()),
            "-vf".into(),
            filter,
            "-c:v".into(),
            "libx264".into(),
            "-tune".into(),
            "stillimage".into(),
            "-r".into(),
            self.fps.to_string(),
            "-c:a".into(),
            "aac".into(),
            "-ar".into(),
            "44100".into(),
            "-ac".into(),
            "2".into(),
            "-shortest".into(),
            segment.to_string_lossy().into_owned(),
        ]
    }

    async fn encode(&self, clips: &[Clip], output: &Path, segments: &mut Vec<PathBuf>) -> Result<(), DuetError> {
        let segments_dir = self.work_dir.join("segments");
        tokio::fs::create_dir_all(&segments_dir).await?;

        for (i, clip) in clips.iter().enumerate() {
            let segment = segments_dir.join(format!("segment_{:04}.mp4", i));
            segments.push(segment.clone());
            debug!(segment = %segment.display(), duration = clip.duration(), "encoding segment");
            run_ffmpeg(&self.segment_args(clip, &segment)).await?;
        }

        let list = segments_dir.join("segments.txt");
        tokio::fs::write(&list, concat_list(segments)).await?;
        segments.push(list.clone());

        info!(output = %output.display(), segments = clips.len(), "joining segments");
        let args: Vec<String> = vec![
            "-y".into(),
            "-loglevel".into(),
            "error".into(),
            "-f".into(),
            "concat".into(),
            "-safe".into(),
            "0".into(),
            "-i".into(),
            list.to_string_lossy().into_owned(),
            "-c".into(),
            "copy".into(),
            "-movflags".into(),
            "+faststart".into(),
            output.to_string_lossy().into_owned(),
        ];
        run_ffmpeg(&args).await
    }
}

#[async_trait]
impl Renderer for FfmpegRenderer {
    async fn render(&self, clips: &[Clip], output: &Path) -> Result<(), DuetError> {
        if clips.is_empty() {
            return Err(DuetError::NoClips);
        }
        if !is_ffmpeg_on_path().await {
            return Err(DuetError::Render(
                "ffmpeg is required for MP4 encoding, but was not found on PATH".to_string(),
            ));
        }
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut segments = Vec::with_capacity(clips.len() + 1);
        let result = self.encode(clips, output, &mut segments).await;
        finish(result, &segments, output).await
    }
}

/// Remove the temporary segment files, and the output too when encoding failed.
async fn finish(result: Result<(), DuetError>, segments: &[PathBuf], output: &Path) -> Result<(), DuetError> {
    for path in segments {
        if let Err(e) = tokio::fs::remove_file(path).await {
            debug!(path = %path.display(), error = %e, "could not remove temporary file");
        }
    }
    if result.is_err() && tokio::fs::try_exists(output).await.unwrap_or(false) {
        warn!(output = %output.display(), "removing incomplete video");
        if let Err(e) = tokio::fs::remove_file(output).await {
            warn!(output = %output.display(), error = %e, "could not remove incomplete video");
        }
    }
    result
}

/// Concat demuxer input listing `segments` in order.
///
/// Entries are file names, which the demuxer resolves next to the list file.
fn concat_list(segments: &[PathBuf]) -> String {
    segments
        .iter()
        .filter_map(|p| p.file_name())
        .map(|name| format!("file '{}'\n", name.to_string_lossy().replace('\'', r"'\''")))
        .collect()
}

async fn run_ffmpeg(args: &[String]) -> Result<(), DuetError> {
    let output = Command::new("ffmpeg")
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| DuetError::Render(format!("failed to run ffmpeg: {}", e)))?;

    if !output.status.success() {
        return Err(DuetError::Render(format!(
            "ffmpeg exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod fakes {
    use std::sync::Mutex;

    use super::*;

    /// Records what it was asked to render and writes a placeholder file.
    #[derive(Default)]
    pub struct RecordingRenderer {
        pub rendered: Mutex<Vec<(Vec<Clip>, PathBuf)>>,
    }

    #[async_trait]
    impl Renderer for RecordingRenderer {
        async fn render(&self, clips: &[Clip], output: &Path) -> Result<(), DuetError> {
            if let Some(parent) = output.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(output, b"mp4")?;
            self.rendered
                .lock()
                .unwrap()
                .push((clips.to_vec(), output.to_path_buf()));
            Ok(())
        }
    }
}
