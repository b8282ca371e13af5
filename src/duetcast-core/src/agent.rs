//! Dialog personas.
//!
//! Exactly two agents take part in a run: the expert, who opens and leads
//! the conversation, and the skeptic, who questions it.

use serde::{Deserialize, Serialize};

/// Conversational role of an agent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    /// Explains and leads; always speaks first.
    Expert,
    /// Asks the uncomfortable questions.
    Skeptic,
}

impl AgentRole {
    pub fn display_name(&self) -> &str {
        match self {
            AgentRole::Expert => "EXPERT",
            AgentRole::Skeptic => "SKEPTIC",
        }
    }
}

/// Grammatical gender the agent uses when speaking in the first person.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Feminine,
    Masculine,
}

/// An immutable dialog persona.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Agent {
    /// Stable ASCII key used for asset lookup (`irina`, `alexey`).
    pub key: String,
    /// Honorific shown before the given name, e.g. `Д-р`.
    #[serde(default)]
    pub title: String,
    /// Given name, e.g. `Ирина`.
    pub given_name: String,
    /// Role label shown in parentheses, e.g. `учёный`.
    pub role_label: String,
    pub role: AgentRole,
    pub gender: Gender,
    /// Voice identity for text-to-speech.
    pub voice: String,
    /// Persona instruction text placed at the top of every system prompt.
    pub persona: String,
    /// Script the narrator reads the first time this agent appears on screen.
    pub introduction: String,
}

impl Agent {
    /// Full display name, e.g. `Д-р Ирина (учёный)`.
    pub fn display_name(&self) -> String {
        if self.title.is_empty() {
            format!("{} ({})", self.given_name, self.role_label)
        } else {
            format!("{} {} ({})", self.title, self.given_name, self.role_label)
        }
    }

    pub fn is_expert(&self) -> bool {
        self.role == AgentRole::Expert
    }

    /// Tokens that identify this agent inside an artifact file name.
    pub fn match_tokens(&self) -> [String; 2] {
        [self.given_name.to_lowercase(), self.key.to_lowercase()]
    }
}
