//! Constraint enforcement for generated lines.
//!
//! Every raw completion goes through the same ordered steps before it joins
//! the history:
//!
//! 1. a leading speaker self-label (`Д-р Ирина (учёный):`) is stripped;
//! 2. on the expert's first turn, the mandated opening phrase is prepended
//!    if missing, then the greeting preface is placed in front of it once;
//! 3. any Latin letter triggers a single rewrite request. If the rewrite
//!    still contains Latin letters the original line is kept.

use regex::Regex;
use tracing::{debug, warn};

use crate::agent::Agent;
use crate::config::Config;
use crate::error::DuetError;
use crate::llm::{ChatMessage, ChatModel, ChatRequest};

/// Which known self-label form a line starts with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelForm {
    /// `[title] name (role):`
    NameAndRole,
    /// `[title] name:`
    NameOnly,
}

/// Classification of the start of a generated line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadingLabel {
    /// A self-label covering the first `len` bytes, including trailing whitespace.
    Recognized { form: LabelForm, len: usize },
    Unlabeled,
}

/// Whether the one allowed rewrite has been used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteBudget {
    Available,
    Spent,
}

impl RewriteBudget {
    /// Use the budget; returns `false` when it was already spent.
    pub fn spend(&mut self) -> bool {
        match self {
            RewriteBudget::Available => {
                *self = RewriteBudget::Spent;
                true
            }
            RewriteBudget::Spent => false,
        }
    }
}

/// True when the text contains a letter outside the target alphabet.
pub fn has_foreign_letters(text: &str) -> bool {
    text.chars().any(|c| c.is_ascii_alphabetic())
}

pub struct ConstraintEnforcer {
    name_and_role: Regex,
    name_only: Regex,
    opening_phrase: String,
    preface: String,
    rewrite_rule: String,
    rewrite_instruction: String,
    rewrite_max_tokens: u32,
    rewrite_temperature: f32,
}

impl ConstraintEnforcer {
    pub fn new(config: &Config) -> Result<Self, DuetError> {
        let alternation = |values: Vec<String>| values.join("|");

        let titles: Vec<String> = config
            .agents
            .iter()
            .filter(|a| !a.title.is_empty())
            // "Д-р", "Др" and "Д р" are all seen in the wild
            .map(|a| regex::escape(&a.title).replace(r"\-", "[-\\s]?"))
            .collect();
        let names = config
            .agents
            .iter()
            .map(|a| regex::escape(&a.given_name))
            .collect();
        let roles = config
            .agents
            .iter()
            .map(|a| regex::escape(&a.role_label))
            .collect();

        let title = if titles.is_empty() {
            String::new()
        } else {
            format!(r"(?:(?:{})\.?\s*)?", alternation(titles))
        };
        let names = alternation(names);
        let roles = alternation(roles);

        let compile = |pattern: String| {
            Regex::new(&pattern)
                .map_err(|e| DuetError::Configuration(format!("invalid speaker label pattern: {}", e)))
        };

        Ok(Self {
            name_and_role: compile(format!(
                r"(?i)^\s*{title}(?:{names})\s*\((?:{roles})\)\s*:\s*"
            ))?,
            name_only: compile(format!(r"(?i)^\s*{title}(?:{names})\s*:\s*"))?,
            opening_phrase: config.dialog.opening_phrase.clone(),
            preface: config.dialog.preface.clone(),
            rewrite_rule: config.prompts.rewrite_rule.clone(),
            rewrite_instruction: config.prompts.rewrite_instruction.clone(),
            rewrite_max_tokens: config.dialog.rewrite_max_tokens,
            rewrite_temperature: config.dialog.rewrite_temperature,
        })
    }

    /// Classify the start of `text` against the known self-label forms.
    pub fn classify_label(&self, text: &str) -> LeadingLabel {
        if let Some(m) = self.name_and_role.find(text) {
            return LeadingLabel::Recognized {
                form: LabelForm::NameAndRole,
                len: m.end(),
            };
        }
        if let Some(m) = self.name_only.find(text) {
            return LeadingLabel::Recognized {
                form: LabelForm::NameOnly,
                len: m.end(),
            };
        }
        LeadingLabel::Unlabeled
    }

    /// Remove a leading self-label. Unlabeled text is only trimmed.
    pub fn strip_speaker_label(&self, text: &str) -> String {
        match self.classify_label(text) {
            LeadingLabel::Recognized { len, .. } => text[len..].trim().to_string(),
            LeadingLabel::Unlabeled => text.trim().to_string(),
        }
    }

    fn prefaced_opening(&self) -> String {
        format!("{} {}", self.preface, self.opening_phrase)
    }

    /// Make sure the line starts with the mandated opening phrase.
    ///
    /// A greeting the model already wrote in front of its line is dropped,
    /// so [`add_preface`](Self::add_preface) can place it exactly once.
    pub fn enforce_opening(&self, text: &str) -> String {
        let cleaned = text.trim_start();
        if cleaned.starts_with(&self.opening_phrase) || cleaned.starts_with(&self.prefaced_opening()) {
            return cleaned.to_string();
        }

        let body = cleaned
            .strip_prefix(self.preface.as_str())
            .map(str::trim_start)
            .unwrap_or(cleaned);
        if body.starts_with(&self.opening_phrase) {
            return body.to_string();
        }
        format!("{} {}", self.opening_phrase, body).trim().to_string()
    }

    /// Put the preface in front of the opening phrase, once.
    pub fn add_preface(&self, text: &str) -> String {
        let cleaned = text.trim_start();
        if !cleaned.starts_with(&self.opening_phrase) {
            return cleaned.to_string();
        }
        format!("{} {}", self.preface, cleaned).trim().to_string()
    }

    /// Opening phrase then preface; a no-op on an already correct line.
    pub fn apply_opening(&self, text: &str) -> String {
        self.add_preface(&self.enforce_opening(text))
    }

    /// Rewrite `text` without Latin letters, spending at most one request.
    ///
    /// Falls back to the original text when the rewrite still contains Latin
    /// letters, comes back empty, or the request fails.
    pub async fn sanitize(&self, text: String, agent: &Agent, model: &dyn ChatModel) -> String {
        let mut budget = RewriteBudget::Available;
        let mut candidate = text.clone();

        while has_foreign_letters(&candidate) {
            if !budget.spend() {
                warn!(
                    speaker = %agent.display_name(),
                    "rewrite still contains Latin letters, keeping original line"
                );
                return text;
            }

            debug!(speaker = %agent.display_name(), "requesting rewrite without Latin letters");
            match model.complete(self.rewrite_request(&text, agent)).await {
                Ok(rewritten) if !rewritten.trim().is_empty() => candidate = rewritten,
                Ok(_) => {
                    warn!(speaker = %agent.display_name(), "empty rewrite, keeping original line");
                    return text;
                }
                Err(e) => {
                    warn!(speaker = %agent.display_name(), error = %e, "rewrite failed, keeping original line");
                    return text;
                }
            }
        }

        candidate
    }

    fn rewrite_request(&self, text: &str, agent: &Agent) -> ChatRequest {
        ChatRequest {
            messages: vec![
                ChatMessage::System(format!("{}\n\n{}", agent.persona.trim(), self.rewrite_rule)),
                ChatMessage::User(self.rewrite_instruction.replace("{text}", text)),
            ],
            max_tokens: self.rewrite_max_tokens,
            temperature: self.rewrite_temperature,
        }
    }

    /// Run the full pipeline on one raw completion.
    pub async fn finalize(
        &self,
        raw: &str,
        agent: &Agent,
        opening_turn: bool,
        model: &dyn ChatModel,
    ) -> String {
        let opening = opening_turn && agent.is_expert();

        let mut text = self.strip_speaker_label(raw);
        if opening {
            text = self.apply_opening(&text);
        }

        let text = self.sanitize(text, agent, model).await;

        // A rewrite may have reworded the mandated opening.
        if opening {
            self.apply_opening(&text)
        } else {
            text
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::fixtures::{alexey, irina};
    use crate::config::default_config;
    use crate::llm::fakes::{FailingModel, ScriptedModel};

    const PREFIX: &str = "Добрый день. Да, спасибо. Давай начнём с самого простого.";

    fn enforcer() -> ConstraintEnforcer {
        ConstraintEnforcer::new(&default_config()).unwrap()
    }

    #[test]
    fn test_classify_full_label() {
        let e = enforcer();
        let text = "Д-р Ирина (учёный): Клетки стареют по-разному.";
        match e.classify_label(text) {
            LeadingLabel::Recognized { form, len } => {
                assert_eq!(form, LabelForm::NameAndRole);
                assert_eq!(&text[len..], "Клетки стареют по-разному.");
            }
            LeadingLabel::Unlabeled => panic!("label not recognized"),
        }
    }

    #[test]
    fn test_strip_label_variants() {
        let e = enforcer();
        assert_eq!(
            e.strip_speaker_label("  Д-р Алексей (скептик):   А где данные?"),
            "А где данные?"
        );
        assert_eq!(e.strip_speaker_label("др ирина (УЧЁНЫЙ): Да."), "Да.");
        assert_eq!(e.strip_speaker_label("Алексей (скептик): Да."), "Да.");
        assert_eq!(e.strip_speaker_label("Алексей: Почему?"), "Почему?");
    }

    #[test]
    fn test_strip_label_only_trims_unlabeled_text() {
        let e = enforcer();
        let inputs = [
            "Как сказала Д-р Ирина (учёный): всё сложно.",
            "  Просто текст без метки.  ",
            "Ирина права, но не во всём.",
            "",
        ];
        for input in inputs {
            assert_eq!(e.classify_label(input), LeadingLabel::Unlabeled);
            assert_eq!(e.strip_speaker_label(input), input.trim());
        }
    }

    #[test]
    fn test_enforce_opening_prepends_phrase() {
        let e = enforcer();
        assert_eq!(
            e.enforce_opening("Органы стареют неравномерно."),
            "Давай начнём с самого простого. Органы стареют неравномерно."
        );
        assert_eq!(
            e.enforce_opening("Давай начнём с самого простого. Органы."),
            "Давай начнём с самого простого. Органы."
        );
    }

    #[test]
    fn test_add_preface_only_in_front_of_opening() {
        let e = enforcer();
        assert_eq!(
            e.add_preface("Давай начнём с самого простого. Органы."),
            format!("{} Органы.", PREFIX)
        );
        assert_eq!(e.add_preface("Органы."), "Органы.");
    }

    #[test]
    fn test_apply_opening_is_idempotent() {
        let e = enforcer();
        let once = e.apply_opening("Органы стареют неравномерно.");
        let twice = e.apply_opening(&once);
        assert_eq!(once, twice);
        assert_eq!(once, format!("{} Органы стареют неравномерно.", PREFIX));
        assert_eq!(once.matches("Добрый день.").count(), 1);
    }

    #[test]
    fn test_has_foreign_letters() {
        assert!(has_foreign_letters("Это DNA."));
        assert!(!has_foreign_letters("Это ДНК, 42 %!"));
    }

    #[test]
    fn test_rewrite_budget_spends_once() {
        let mut budget = RewriteBudget::Available;
        assert!(budget.spend());
        assert_eq!(budget, RewriteBudget::Spent);
        assert!(!budget.spend());
    }

    #[tokio::test]
    async fn test_sanitize_clean_text_makes_no_request() {
        let model = ScriptedModel::new(Vec::<String>::new());
        let text = enforcer()
            .sanitize("Чистый текст.".to_string(), &alexey(), &model)
            .await;
        assert_eq!(text, "Чистый текст.");
        assert!(model.requests().is_empty());
    }

    #[tokio::test]
    async fn test_sanitize_uses_clean_rewrite() {
        let model = ScriptedModel::new(["Это ДНК."]);
        let text = enforcer()
            .sanitize("Это DNA.".to_string(), &alexey(), &model)
            .await;
        assert_eq!(text, "Это ДНК.");

        let requests = model.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].max_tokens, 260);
        assert!(requests[0].messages[0].content().starts_with("Ты скептик."));
        assert!(requests[0].messages[1].content().ends_with("Это DNA."));
    }

    #[tokio::test]
    async fn test_sanitize_keeps_original_after_one_failed_rewrite() {
        let model = ScriptedModel::new(["Всё ещё DNA.", "Это ДНК."]);
        let text = enforcer()
            .sanitize("Это DNA.".to_string(), &alexey(), &model)
            .await;
        assert_eq!(text, "Это DNA.");
        assert_eq!(model.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_sanitize_keeps_original_when_rewrite_errors() {
        let text = enforcer()
            .sanitize("Это DNA.".to_string(), &alexey(), &FailingModel)
            .await;
        assert_eq!(text, "Это DNA.");
    }

    #[tokio::test]
    async fn test_finalize_expert_opening_turn() {
        let model = ScriptedModel::new(Vec::<String>::new());
        let e = enforcer();
        let raw = "Д-р Ирина (учёный): Органы стареют с разной скоростью.";
        let text = e.finalize(raw, &irina(), true, &model).await;
        assert_eq!(text, format!("{} Органы стареют с разной скоростью.", PREFIX));
    }

    #[tokio::test]
    async fn test_finalize_opening_survives_rewrite() {
        // The rewrite drops the greeting; it is restored afterwards.
        let model = ScriptedModel::new(["Давай начнём с самого простого. Это ДНК."]);
        let e = enforcer();
        let text = e.finalize("Это DNA.", &irina(), true, &model).await;
        assert_eq!(text, format!("{} Это ДНК.", PREFIX));
    }

    #[test]
    fn test_enforce_opening_drops_leading_greeting() {
        let e = enforcer();
        assert_eq!(
            e.enforce_opening("Добрый день. Да, спасибо. Органы."),
            "Давай начнём с самого простого. Органы."
        );
        assert_eq!(
            e.enforce_opening("Добрый день. Да, спасибо.  Давай начнём с самого простого. Органы."),
            "Давай начнём с самого простого. Органы."
        );
    }

    #[tokio::test]
    async fn test_finalize_raw_greeting_not_duplicated() {
        let model = ScriptedModel::new(Vec::<String>::new());
        let e = enforcer();
        let raw = "Добрый день. Да, спасибо. Органы стареют по-разному.";
        let text = e.finalize(raw, &irina(), true, &model).await;

        assert_eq!(text, format!("{} Органы стареют по-разному.", PREFIX));
        assert_eq!(text.matches("Добрый день. Да, спасибо.").count(), 1);
        assert_eq!(e.apply_opening(&text), text);
    }

    #[tokio::test]
    async fn test_finalize_greeting_from_rewrite_not_duplicated() {
        let model = ScriptedModel::new(["Добрый день. Да, спасибо. Это ДНК."]);
        let text = enforcer().finalize("Это DNA.", &irina(), true, &model).await;
        assert_eq!(text, format!("{} Это ДНК.", PREFIX));
    }

    #[tokio::test]
    async fn test_finalize_skeptic_first_turn_has_no_opening() {
        let model = ScriptedModel::new(Vec::<String>::new());
        let text = enforcer().finalize("Сомневаюсь.", &alexey(), true, &model).await;
        assert_eq!(text, "Сомневаюсь.");
    }

    #[tokio::test]
    async fn test_finalize_expert_later_turn_untouched() {
        let model = ScriptedModel::new(Vec::<String>::new());
        let text = enforcer().finalize("Продолжим.", &irina(), false, &model).await;
        assert_eq!(text, "Продолжим.");
    }
}
