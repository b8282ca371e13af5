//! Configuration module for loading TOML config files.
//!
//! Every section falls back to the embedded defaults, so a config file only
//! needs to list the values it overrides.

use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::agent::{Agent, AgentRole, Gender};
use crate::canvas::Canvas;
use crate::error::DuetError;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub dialog: DialogConfig,
    pub prompts: PromptsConfig,
    pub agents: Vec<Agent>,
    pub speech: SpeechConfig,
    pub video: VideoConfig,
    pub paths: PathsConfig,
}

/// Text generation settings and the fixed first-line phrases.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DialogConfig {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub rewrite_max_tokens: u32,
    pub rewrite_temperature: f32,
    /// Phrase the expert's first line must start with.
    pub opening_phrase: String,
    /// Greeting placed once in front of the opening phrase.
    pub preface: String,
}

/// Prompt templates. `{topic}`, `{opening_phrase}` and `{text}` are substituted.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PromptsConfig {
    pub style_rules: String,
    pub topic_line: String,
    pub opening_instruction: String,
    pub continue_instruction: String,
    pub rewrite_rule: String,
    pub rewrite_instruction: String,
    pub topic_intro_template: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    pub model: String,
    /// Neutral voice for the topic and speaker introductions.
    pub narrator_voice: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub width: u32,
    pub height: u32,
    /// Canvas background as `#rrggbb`.
    pub background: String,
    pub fps: u32,
    /// Full-screen image behind the narrated introductions.
    pub cover: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub audio_dir: PathBuf,
    /// Avatars are looked up as `{avatars_dir}/{agent key}.jpg`.
    pub avatars_dir: PathBuf,
    pub tmp_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub output: PathBuf,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, DuetError> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            DuetError::Configuration(format!(
                "Failed to read config {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        Self::parse(&content)
    }

    /// Parse and validate configuration from TOML content.
    pub fn parse(content: &str) -> Result<Self, DuetError> {
        let config: Config = toml::from_str(content)
            .map_err(|e| DuetError::Configuration(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), DuetError> {
        match self.agents.as_slice() {
            [first, second]
                if first.role == AgentRole::Expert && second.role == AgentRole::Skeptic => {}
            [_, _] => {
                return Err(DuetError::Configuration(
                    "the first agent must be the expert and the second the skeptic".to_string(),
                ));
            }
            agents => {
                return Err(DuetError::Configuration(format!(
                    "exactly two agents are required, got {}",
                    agents.len()
                )));
            }
        }

        if self.agents[0].key.eq_ignore_ascii_case(&self.agents[1].key) {
            return Err(DuetError::Configuration(
                "agent keys must be distinct".to_string(),
            ));
        }

        self.canvas().map(|_| ())
    }

    /// The expert and the skeptic, in speaking order.
    pub fn agents(&self) -> [Agent; 2] {
        [self.agents[0].clone(), self.agents[1].clone()]
    }

    /// The canvas all frames are composed onto.
    pub fn canvas(&self) -> Result<Canvas, DuetError> {
        Canvas::new(
            self.video.width,
            self.video.height,
            parse_hex_color(&self.video.background)?,
        )
    }

    /// Avatar path per agent key.
    pub fn avatar_map(&self) -> HashMap<String, PathBuf> {
        self.agents
            .iter()
            .map(|a| (a.key.clone(), self.paths.avatars_dir.join(format!("{}.jpg", a.key))))
            .collect()
    }

    /// System prompt for an agent; the topic line is only present when a topic is given.
    pub fn system_prompt(&self, agent: &Agent, topic: Option<&str>) -> String {
        let mut prompt = format!("{}\n\n{}", agent.persona.trim(), self.prompts.style_rules.trim());
        if let Some(topic) = topic {
            prompt.push('\n');
            prompt.push_str(&self.prompts.topic_line.replace("{topic}", topic));
        }
        prompt.trim().to_string()
    }

    /// Instruction for the turn about to be generated.
    pub fn turn_instruction(&self, opening: bool) -> String {
        if opening {
            self.prompts
                .opening_instruction
                .replace("{opening_phrase}", &self.dialog.opening_phrase)
        } else {
            self.prompts.continue_instruction.clone()
        }
    }

    /// Narration text for the topic introduction clip.
    pub fn topic_intro(&self, topic: &str) -> String {
        self.prompts.topic_intro_template.replace("{topic}", topic)
    }
}

impl Default for Config {
    fn default() -> Self {
        default_config()
    }
}

impl Default for DialogConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            max_tokens: 350,
            temperature: 0.7,
            rewrite_max_tokens: 260,
            rewrite_temperature: 0.3,
            opening_phrase: "Давай начнём с самого простого.".to_string(),
            preface: "Добрый день. Да, спасибо.".to_string(),
        }
    }
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            style_rules: DEFAULT_STYLE_RULES.to_string(),
            topic_line: "Тема: {topic}.".to_string(),
            opening_instruction: DEFAULT_OPENING_INSTRUCTION.to_string(),
            continue_instruction: DEFAULT_CONTINUE_INSTRUCTION.to_string(),
            rewrite_rule: DEFAULT_REWRITE_RULE.to_string(),
            rewrite_instruction: "Перепиши текст так, чтобы смысл остался прежним, но в нём не \
                                  осталось ни одной латинской буквы.\n\nТекст:\n{text}"
                .to_string(),
            topic_intro_template: "Сегодня мы обсуждаем научную тему. Тема выпуска: {topic}"
                .to_string(),
        }
    }
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini-tts".to_string(),
            narrator_voice: "onyx".to_string(),
        }
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            background: "#111111".to_string(),
            fps: 24,
            cover: PathBuf::from("assets/cover.png"),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            audio_dir: PathBuf::from("audio"),
            avatars_dir: PathBuf::from("avatars"),
            tmp_dir: PathBuf::from("video/_tmp"),
            logs_dir: PathBuf::from("logs"),
            output: PathBuf::from("video/dialog.mp4"),
        }
    }
}

/// Parse a `#rrggbb` color.
pub fn parse_hex_color(value: &str) -> Result<[u8; 3], DuetError> {
    let invalid = || DuetError::Configuration(format!("invalid color '{}', expected #rrggbb", value));
    let hex = value.trim().strip_prefix('#').ok_or_else(invalid)?;
    if hex.len() != 6 || !hex.is_ascii() {
        return Err(invalid());
    }

    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| invalid());
    Ok([channel(0)?, channel(2)?, channel(4)?])
}

/// Default configuration embedded in the binary.
pub fn default_config() -> Config {
    Config {
        dialog: DialogConfig::default(),
        prompts: PromptsConfig::default(),
        agents: default_agents(),
        speech: SpeechConfig::default(),
        video: VideoConfig::default(),
        paths: PathsConfig::default(),
    }
}

fn default_agents() -> Vec<Agent> {
    vec![
        Agent {
            key: "irina".to_string(),
            title: "Д-р".to_string(),
            given_name: "Ирина".to_string(),
            role_label: "учёный".to_string(),
            role: AgentRole::Expert,
            gender: Gender::Feminine,
            voice: "nova".to_string(),
            persona: DEFAULT_EXPERT_PERSONA.to_string(),
            introduction: "Ирина — учёный и исследователь. Она поможет разобраться в теме."
                .to_string(),
        },
        Agent {
            key: "alexey".to_string(),
            title: "Д-р".to_string(),
            given_name: "Алексей".to_string(),
            role_label: "скептик".to_string(),
            role: AgentRole::Skeptic,
            gender: Gender::Masculine,
            voice: "alloy".to_string(),
            persona: DEFAULT_SKEPTIC_PERSONA.to_string(),
            introduction: "Алексей — собеседник, который задаёт неудобные вопросы и проверяет \
                           аргументы."
                .to_string(),
        },
    ]
}

const DEFAULT_EXPERT_PERSONA: &str = r#"Ты — исследовательница и популяризатор науки. Говоришь спокойно, уверенно и ясно, как умная собеседница в подкасте.
Объясняй сложное человеческим языком и на простых примерах, не упрощая до сюсюканья и не приукрашивая факты.
Говори от первого лица в женском роде: «я согласна», «я считаю», «мне кажется». Избегай мужских форм.
Ты эксперт: ведёшь разговор, объясняешь и делаешь выводы. Вопросы задавай редко и только по делу.
Юмор лёгкий и интеллигентный, в меру.
СТРОГО: никаких английских слов, латиницы и транслитерации."#;

const DEFAULT_SKEPTIC_PERSONA: &str = r#"Ты — скептичный учёный, который задаёт неудобные, но уместные вопросы.
Говори от первого лица в мужском роде и избегай женских форм.
Твоя задача — уточнять и проверять: данные, метод, ограничения, альтернативные объяснения.
Реплика строится так: одно-два предложения сомнения или уточнения, затем один-два прицельных вопроса. Без длинных монологов.
Юмор лёгкий, чуть ехидный, без грубости.
СТРОГО: никаких английских слов, латиницы и транслитерации."#;

const DEFAULT_STYLE_RULES: &str = r#"Общие правила:
- Отвечай только на русском языке.
- Два–четыре предложения.
- Научно, но понятно, без сухого академизма.
- ЗАПРЕЩЕНО: английские слова, вставки, транслитерация, любые латинские буквы.
- Не называй своё имя и должность в начале реплики, говори просто от первого лица.
- Вопросы не должны занимать всю реплику: сначала мысль, затем, если уместно, один прицельный вопрос.
- Эксперт чаще утверждает и объясняет, скептик чаще спрашивает и сомневается."#;

const DEFAULT_OPENING_INSTRUCTION: &str = r#"Сделай ПЕРВУЮ реплику диалога по указанной теме.
До этого никто ничего не говорил.
Реплика обязательно начинается ровно с фразы: «{opening_phrase}».
Дальше — спокойное, уверенное введение в тему в два–четыре предложения, без ощущения, что спор уже идёт.
Не используй английские слова и латиницу. Не перечисляй правила и не используй разметку."#;

const DEFAULT_CONTINUE_INSTRUCTION: &str = r#"Продолжи диалог следующей репликой от лица своего персонажа.
Эксперт объясняет и ведёт разговор, скептик задаёт неудобные уточняющие вопросы.
Не используй английские слова и латиницу. Не перечисляй правила и не используй разметку."#;

const DEFAULT_REWRITE_RULE: &str = "ЖЁСТКОЕ ПРАВИЛО: в ответе не должно быть ни одной латинской \
буквы (A–Z, a–z). Никаких английских слов, вставок и транслитерации. Только кириллица, цифры и \
знаки препинания.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = default_config();
        assert!(config.validate().is_ok());
        assert_eq!(config.agents()[0].key, "irina");
        assert_eq!(config.agents()[1].key, "alexey");
    }

    #[test]
    fn test_parse_partial_override() {
        let config = Config::parse(
            r##"
            [dialog]
            model = "gpt-4o"
            max_tokens = 200

            [video]
            background = "#202020"
            "##,
        )
        .unwrap();

        assert_eq!(config.dialog.model, "gpt-4o");
        assert_eq!(config.dialog.max_tokens, 200);
        assert_eq!(config.dialog.opening_phrase, "Давай начнём с самого простого.");
        assert_eq!(config.canvas().unwrap().background, [0x20, 0x20, 0x20]);
        assert_eq!(config.agents.len(), 2);
    }

    #[test]
    fn test_parse_rejects_single_agent() {
        let result = Config::parse(
            r#"
            [[agents]]
            key = "solo"
            given_name = "Соло"
            role_label = "учёный"
            role = "expert"
            gender = "feminine"
            voice = "nova"
            persona = "..."
            introduction = "..."
            "#,
        );
        assert!(matches!(result, Err(DuetError::Configuration(_))));
    }

    #[test]
    fn test_validate_rejects_skeptic_first() {
        let mut config = default_config();
        config.agents.swap(0, 1);
        assert!(matches!(config.validate(), Err(DuetError::Configuration(_))));
    }

    #[test]
    fn test_parse_hex_color() {
        assert_eq!(parse_hex_color("#111111").unwrap(), [17, 17, 17]);
        assert_eq!(parse_hex_color("#FF8000").unwrap(), [255, 128, 0]);
        assert!(parse_hex_color("111111").is_err());
        assert!(parse_hex_color("#12345").is_err());
        assert!(parse_hex_color("#gg0000").is_err());
    }

    #[test]
    fn test_system_prompt_topic_line_only_when_given() {
        let config = default_config();
        let agent = &config.agents()[0];

        let with_topic = config.system_prompt(agent, Some("Сон"));
        assert!(with_topic.starts_with(agent.persona.trim()));
        assert!(with_topic.ends_with("Тема: Сон."));

        let without_topic = config.system_prompt(agent, None);
        assert!(!without_topic.contains("Тема:"));
    }

    #[test]
    fn test_turn_instruction_embeds_opening_phrase() {
        let config = default_config();
        assert!(config.turn_instruction(true).contains("«Давай начнём с самого простого.»"));
        assert!(!config.turn_instruction(false).contains("Давай начнём"));
    }

    #[test]
    fn test_avatar_map_uses_agent_keys() {
        let config = default_config();
        let avatars = config.avatar_map();
        assert_eq!(avatars["irina"], PathBuf::from("avatars/irina.jpg"));
        assert_eq!(avatars["alexey"], PathBuf::from("avatars/alexey.jpg"));
    }
}
