//! Timeline assembly.
//!
//! Turns the ordered dialog artifacts into the ordered clip list handed to
//! the renderer: one narrated topic introduction, then for every artifact
//! the speaker's one-time introduction (first appearance only) followed by
//! the avatar clip carrying that artifact's audio.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::agent::Agent;
use crate::canvas::{CanvasFitter, Visual};
use crate::config::Config;
use crate::error::DuetError;
use crate::probe::DurationProbe;
use crate::speech::{SpeechEngine, SpeechSynthesizer};

#[derive(Debug, Clone, PartialEq)]
pub enum ClipKind {
    TopicIntro,
    SpeakerIntro { speaker: String },
    Turn { speaker: String },
}

/// A still visual bound to an audio track of the same duration.
#[derive(Debug, Clone, PartialEq)]
pub struct Clip {
    pub kind: ClipKind,
    pub visual: Visual,
    pub audio: PathBuf,
}

impl Clip {
    pub fn duration(&self) -> f64 {
        self.visual.duration
    }
}

/// Which speakers have already been introduced during this run.
#[derive(Debug, Clone, Default)]
pub struct IntroductionState {
    introduced: HashMap<String, bool>,
}

impl IntroductionState {
    pub fn new<'a>(keys: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            introduced: keys.into_iter().map(|k| (k.to_string(), false)).collect(),
        }
    }

    /// True for a known speaker who has not been introduced yet.
    pub fn needs_introduction(&self, key: &str) -> bool {
        self.introduced.get(key) == Some(&false)
    }

    pub fn mark_introduced(&mut self, key: &str) {
        if let Some(flag) = self.introduced.get_mut(key) {
            *flag = true;
        }
    }
}

/// Dialog artifacts in `dir`: mp3 files whose names start with three digits,
/// sorted by name and capped at `limit` when given.
pub fn list_artifacts(dir: &Path, limit: Option<usize>) -> Result<Vec<PathBuf>, DuetError> {
    let mut artifacts: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_artifact_name(path))
        .collect();

    artifacts.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    if let Some(limit) = limit {
        artifacts.truncate(limit);
    }
    Ok(artifacts)
}

fn is_artifact_name(path: &Path) -> bool {
    let has_mp3_ext = path.extension().is_some_and(|ext| ext == "mp3");
    let numbered = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.len() > 3 && n.as_bytes()[..3].iter().all(u8::is_ascii_digit));
    has_mp3_ext && numbered
}

/// Infer who speaks in an artifact from its file name.
///
/// Case-insensitive substring match of each agent's given name and key; when
/// several agents match, the first one in speaking order wins.
pub fn classify_speaker<'a>(file_name: &str, agents: &'a [Agent]) -> Option<&'a Agent> {
    let lower = file_name.to_lowercase();
    agents
        .iter()
        .find(|agent| agent.match_tokens().iter().any(|token| lower.contains(token.as_str())))
}

pub struct TimelineAssembler {
    agents: [Agent; 2],
    narrator: SpeechSynthesizer,
    narrator_voice: String,
    probe: Arc<dyn DurationProbe>,
    fitter: CanvasFitter,
    cover: PathBuf,
    config: Config,
    tmp_dir: PathBuf,
    max_audio_files: Option<usize>,
}

impl TimelineAssembler {
    pub fn new(
        config: &Config,
        engine: Arc<dyn SpeechEngine>,
        probe: Arc<dyn DurationProbe>,
    ) -> Result<Self, DuetError> {
        let tmp_dir = config.paths.tmp_dir.clone();

        Ok(Self {
            agents: config.agents(),
            narrator: SpeechSynthesizer::new(engine, tmp_dir.clone()),
            narrator_voice: config.speech.narrator_voice.clone(),
            probe,
            fitter: CanvasFitter::new(config.canvas()?, tmp_dir.join("frames")),
            cover: config.video.cover.clone(),
            config: config.clone(),
            tmp_dir,
            max_audio_files: None,
        })
    }

    /// Only assemble the first `limit` artifacts.
    pub fn with_max_audio_files(mut self, limit: Option<usize>) -> Self {
        self.max_audio_files = limit.filter(|n| *n > 0);
        self
    }

    /// Build the ordered clip list for the artifacts in `audio_dir`.
    ///
    /// Fails without producing anything when a speaker's avatar is missing.
    pub async fn assemble(
        &mut self,
        audio_dir: &Path,
        topic: &str,
        avatars: &HashMap<String, PathBuf>,
    ) -> Result<Vec<Clip>, DuetError> {
        if !audio_dir.is_dir() {
            return Err(DuetError::NoArtifacts(audio_dir.to_path_buf()));
        }
        let artifacts = list_artifacts(audio_dir, self.max_audio_files)?;
        if artifacts.is_empty() {
            return Err(DuetError::NoArtifacts(audio_dir.to_path_buf()));
        }
        info!(count = artifacts.len(), "found dialog audio files");

        self.check_avatars(avatars)?;

        let mut clips = Vec::with_capacity(artifacts.len() + 3);
        clips.push(self.topic_intro_clip(topic).await?);

        let agents = self.agents.clone();
        let mut introductions = IntroductionState::new(agents.iter().map(|a| a.key.as_str()));

        for (step, artifact) in artifacts.iter().enumerate() {
            let file_name = artifact
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            let Some(agent) = classify_speaker(&file_name, &agents) else {
                warn!(file = %file_name, "could not tell the speaker from the file name, skipping");
                continue;
            };
            // checked in check_avatars
            let Some(avatar) = avatars.get(&agent.key) else {
                continue;
            };

            let duration = match self.probe.duration(artifact).await {
                Ok(duration) => duration,
                Err(e) => {
                    warn!(file = %file_name, error = %e, "could not read audio, skipping");
                    continue;
                }
            };
            info!(
                step = step + 1,
                file = %file_name,
                speaker = %agent.key,
                duration_secs = duration,
                "adding turn"
            );

            if introductions.needs_introduction(&agent.key) {
                clips.push(self.speaker_intro_clip(agent).await?);
                introductions.mark_introduced(&agent.key);
            }

            match self.fitter.fit(avatar, duration) {
                Ok(visual) => clips.push(Clip {
                    kind: ClipKind::Turn {
                        speaker: agent.key.clone(),
                    },
                    visual,
                    audio: artifact.clone(),
                }),
                Err(e) => warn!(file = %file_name, error = %e, "could not build turn clip, skipping"),
            }
        }

        if clips.len() <= 1 {
            return Err(DuetError::NoClips);
        }
        Ok(clips)
    }

    fn check_avatars(&self, avatars: &HashMap<String, PathBuf>) -> Result<(), DuetError> {
        for agent in &self.agents {
            match avatars.get(&agent.key) {
                Some(path) if path.is_file() => {}
                Some(path) => {
                    return Err(DuetError::AssetMissing {
                        speaker: agent.display_name(),
                        path: path.clone(),
                    });
                }
                None => {
                    return Err(DuetError::AssetMissing {
                        speaker: agent.display_name(),
                        path: PathBuf::new(),
                    });
                }
            }
        }
        Ok(())
    }

    async fn topic_intro_clip(&mut self, topic: &str) -> Result<Clip, DuetError> {
        info!("adding topic introduction");
        let text = self.config.topic_intro(topic);
        self.narrated_clip(&text, "intro_topic.mp3", ClipKind::TopicIntro)
            .await
    }

    async fn speaker_intro_clip(&mut self, agent: &Agent) -> Result<Clip, DuetError> {
        info!(speaker = %agent.key, "adding speaker introduction");
        self.narrated_clip(
            &agent.introduction,
            &format!("intro_{}.mp3", agent.key),
            ClipKind::SpeakerIntro {
                speaker: agent.key.clone(),
            },
        )
        .await
    }

    /// Narrator voice over the cover background.
    async fn narrated_clip(
        &mut self,
        text: &str,
        file_name: &str,
        kind: ClipKind,
    ) -> Result<Clip, DuetError> {
        let audio = self.tmp_dir.join(file_name);
        self.narrator
            .synthesize_to(text, &self.narrator_voice, &audio)
            .await?;
        let duration = self.probe.duration(&audio).await?;

        Ok(Clip {
            kind,
            visual: self.cover_visual(duration)?,
            audio,
        })
    }

    /// Cover image fitted to the canvas, or the plain background when it is unavailable.
    fn cover_visual(&mut self, duration: f64) -> Result<Visual, DuetError> {
        if !self.cover.is_file() {
            warn!(path = %self.cover.display(), "cover image not found, using plain background");
            return self.fitter.blank(duration);
        }

        let cover = self.cover.clone();
        match self.fitter.fit(&cover, duration) {
            Ok(visual) => Ok(visual),
            Err(e) => {
                warn!(path = %cover.display(), error = %e, "cover image unreadable, using plain background");
                self.fitter.blank(duration)
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fakes::FakeProbe;
    use super::*;
    use crate::agent::fixtures::{alexey, irina};
    use crate::config::default_config;
    use crate::speech::fakes::FakeSpeech;
    use image::RgbImage;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        config: Config,
        avatars: HashMap<String, PathBuf>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let mut config = default_config();
            config.video.width = 64;
            config.video.height = 36;
            config.video.cover = dir.path().join("assets/cover.png");
            config.paths.tmp_dir = dir.path().join("tmp");

            let avatars_dir = dir.path().join("avatars");
            fs::create_dir_all(&avatars_dir).unwrap();
            let mut avatars = HashMap::new();
            for key in ["irina", "alexey"] {
                let path = avatars_dir.join(format!("{key}.png"));
                RgbImage::from_pixel(10, 20, image::Rgb([200, 100, 50]))
                    .save(&path)
                    .unwrap();
                avatars.insert(key.to_string(), path);
            }

            fs::create_dir_all(dir.path().join("audio")).unwrap();
            Self {
                dir,
                config,
                avatars,
            }
        }

        fn audio_dir(&self) -> PathBuf {
            self.dir.path().join("audio")
        }

        fn add_audio(&self, names: &[&str]) {
            for name in names {
                fs::write(self.audio_dir().join(name), b"mp3").unwrap();
            }
        }

        fn assembler(&self, speech: Arc<FakeSpeech>, probe: FakeProbe) -> TimelineAssembler {
            TimelineAssembler::new(&self.config, speech, Arc::new(probe)).unwrap()
        }
    }

    fn kinds(clips: &[Clip]) -> Vec<ClipKind> {
        clips.iter().map(|c| c.kind.clone()).collect()
    }

    #[test]
    fn test_list_artifacts_filters_and_sorts() {
        let fixture = Fixture::new();
        fixture.add_audio(&["010_alexey.mp3", "002_irina.mp3", "001_irina.mp3", "intro.mp3", "12_x.mp3"]);
        fs::write(fixture.audio_dir().join("003_irina.wav"), b"").unwrap();

        let names: Vec<String> = list_artifacts(&fixture.audio_dir(), None)
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["001_irina.mp3", "002_irina.mp3", "010_alexey.mp3"]);

        assert_eq!(list_artifacts(&fixture.audio_dir(), Some(2)).unwrap().len(), 2);
    }

    #[test]
    fn test_classify_speaker() {
        let agents = [irina(), alexey()];
        assert_eq!(classify_speaker("003_alexey.mp3", &agents).unwrap().key, "alexey");
        assert_eq!(
            classify_speaker("001_д-риринаучёный.mp3", &agents).unwrap().key,
            "irina"
        );
        assert_eq!(
            classify_speaker("002_Д-рАЛЕКСЕЙскептик.mp3", &agents).unwrap().key,
            "alexey"
        );
        assert!(classify_speaker("004_narrator.mp3", &agents).is_none());
    }

    #[test]
    fn test_classify_speaker_first_match_wins() {
        let agents = [irina(), alexey()];
        assert_eq!(classify_speaker("005_alexey_irina.mp3", &agents).unwrap().key, "irina");
    }

    #[test]
    fn test_introduction_state() {
        let mut state = IntroductionState::new(["irina", "alexey"]);
        assert!(state.needs_introduction("irina"));
        state.mark_introduced("irina");
        assert!(!state.needs_introduction("irina"));
        assert!(state.needs_introduction("alexey"));
        assert!(!state.needs_introduction("stranger"));
    }

    #[tokio::test]
    async fn test_turn_clip_takes_artifact_duration() {
        let fixture = Fixture::new();
        fixture.add_audio(&["003_alexey.mp3"]);
        let mut assembler = fixture.assembler(
            Arc::new(FakeSpeech::default()),
            FakeProbe::with(&[("003_alexey.mp3", 5.2)]),
        );

        let clips = assembler
            .assemble(&fixture.audio_dir(), "X", &fixture.avatars)
            .await
            .unwrap();

        let turn = clips.last().unwrap();
        assert_eq!(turn.kind, ClipKind::Turn { speaker: "alexey".to_string() });
        assert_eq!(turn.duration(), 5.2);
        assert_eq!(turn.audio, fixture.audio_dir().join("003_alexey.mp3"));
        assert!(turn.visual.frame.is_file());
    }

    #[tokio::test]
    async fn test_introductions_once_and_before_first_turn() {
        let fixture = Fixture::new();
        fixture.add_audio(&["001_irina.mp3", "002_alexey.mp3", "003_irina.mp3", "004_alexey.mp3"]);
        let speech = Arc::new(FakeSpeech::default());
        let mut assembler = fixture.assembler(speech.clone(), FakeProbe::default());

        let clips = assembler
            .assemble(&fixture.audio_dir(), "Сон", &fixture.avatars)
            .await
            .unwrap();

        let irina = || "irina".to_string();
        let alexey = || "alexey".to_string();
        assert_eq!(
            kinds(&clips),
            vec![
                ClipKind::TopicIntro,
                ClipKind::SpeakerIntro { speaker: irina() },
                ClipKind::Turn { speaker: irina() },
                ClipKind::SpeakerIntro { speaker: alexey() },
                ClipKind::Turn { speaker: alexey() },
                ClipKind::Turn { speaker: irina() },
                ClipKind::Turn { speaker: alexey() },
            ]
        );

        let calls = speech.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].0, "Сегодня мы обсуждаем научную тему. Тема выпуска: Сон");
        assert!(calls.iter().all(|(_, voice)| voice == "onyx"));
    }

    #[tokio::test]
    async fn test_unknown_and_unreadable_artifacts_are_skipped() {
        let fixture = Fixture::new();
        fixture.add_audio(&["001_irina.mp3", "002_guest.mp3", "003_alexey.mp3"]);
        let mut assembler = fixture.assembler(
            Arc::new(FakeSpeech::default()),
            FakeProbe::with(&[("003_alexey.mp3", 0.0)]),
        );

        let clips = assembler
            .assemble(&fixture.audio_dir(), "X", &fixture.avatars)
            .await
            .unwrap();

        assert_eq!(
            kinds(&clips),
            vec![
                ClipKind::TopicIntro,
                ClipKind::SpeakerIntro { speaker: "irina".to_string() },
                ClipKind::Turn { speaker: "irina".to_string() },
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_avatar_aborts_before_any_clip() {
        let fixture = Fixture::new();
        fixture.add_audio(&["001_irina.mp3", "002_alexey.mp3"]);
        fs::remove_file(&fixture.avatars["alexey"]).unwrap();
        let speech = Arc::new(FakeSpeech::default());
        let mut assembler = fixture.assembler(speech.clone(), FakeProbe::default());

        let result = assembler
            .assemble(&fixture.audio_dir(), "X", &fixture.avatars)
            .await;

        assert!(matches!(result, Err(DuetError::AssetMissing { .. })));
        assert!(speech.calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_cover_falls_back_to_plain_background() {
        let fixture = Fixture::new();
        fixture.add_audio(&["001_irina.mp3"]);
        let mut assembler = fixture.assembler(Arc::new(FakeSpeech::default()), FakeProbe::default());

        let clips = assembler
            .assemble(&fixture.audio_dir(), "X", &fixture.avatars)
            .await
            .unwrap();

        let frame = image::open(&clips[0].visual.frame).unwrap().to_rgb8();
        assert_eq!(frame.dimensions(), (64, 36));
        assert!(frame.pixels().all(|p| p.0 == [17, 17, 17]));
    }

    #[tokio::test]
    async fn test_cover_used_for_introductions() {
        let fixture = Fixture::new();
        fixture.add_audio(&["001_irina.mp3"]);
        fs::create_dir_all(fixture.dir.path().join("assets")).unwrap();
        RgbImage::from_pixel(64, 36, image::Rgb([0, 0, 255]))
            .save(&fixture.config.video.cover)
            .unwrap();
        let mut assembler = fixture.assembler(Arc::new(FakeSpeech::default()), FakeProbe::default());

        let clips = assembler
            .assemble(&fixture.audio_dir(), "X", &fixture.avatars)
            .await
            .unwrap();

        assert_eq!(clips[0].visual.frame, clips[1].visual.frame);
        let frame = image::open(&clips[0].visual.frame).unwrap().to_rgb8();
        assert_eq!(frame.get_pixel(32, 18).0, [0, 0, 255]);
    }

    #[tokio::test]
    async fn test_empty_audio_dir_is_an_error() {
        let fixture = Fixture::new();
        let mut assembler = fixture.assembler(Arc::new(FakeSpeech::default()), FakeProbe::default());
        let result = assembler
            .assemble(&fixture.audio_dir(), "X", &fixture.avatars)
            .await;
        assert!(matches!(result, Err(DuetError::NoArtifacts(_))));
    }

    #[tokio::test]
    async fn test_max_audio_files_caps_turns() {
        let fixture = Fixture::new();
        fixture.add_audio(&["001_irina.mp3", "002_alexey.mp3", "003_irina.mp3"]);
        let mut assembler = fixture
            .assembler(Arc::new(FakeSpeech::default()), FakeProbe::default())
            .with_max_audio_files(Some(1));

        let clips = assembler
            .assemble(&fixture.audio_dir(), "X", &fixture.avatars)
            .await
            .unwrap();
        assert_eq!(clips.len(), 3);
    }
}
