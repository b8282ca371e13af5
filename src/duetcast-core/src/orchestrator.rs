//! Dialog orchestration logic.
//!
//! Alternates the expert and the skeptic, feeding each of them the full
//! history so far, and appends every finalized line to that history.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::agent::{Agent, AgentRole};
use crate::config::Config;
use crate::constraints::ConstraintEnforcer;
use crate::error::DuetError;
use crate::llm::{ChatMessage, ChatModel, ChatRequest};

/// One finalized line of dialog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    /// 1-based position in the history.
    pub index: usize,
    pub speaker: String,
    pub role: AgentRole,
    pub text: String,
}

/// Drives the conversation one turn at a time.
pub struct DialogOrchestrator {
    config: Config,
    agents: [Agent; 2],
    model: Arc<dyn ChatModel>,
    enforcer: ConstraintEnforcer,
    topic: String,
    /// Append-only; the only source of context and playback order.
    history: Vec<Turn>,
}

impl DialogOrchestrator {
    pub fn new(
        config: Config,
        model: Arc<dyn ChatModel>,
        topic: impl Into<String>,
    ) -> Result<Self, DuetError> {
        config.validate()?;
        let enforcer = ConstraintEnforcer::new(&config)?;
        let agents = config.agents();

        Ok(Self {
            config,
            agents,
            model,
            enforcer,
            topic: topic.into(),
            history: Vec::new(),
        })
    }

    /// The agent who speaks next; the expert always opens.
    pub fn next_agent(&self) -> &Agent {
        &self.agents[self.history.len() % 2]
    }

    /// Generate, finalize and append the next turn.
    pub async fn next_turn(&mut self) -> Result<&Turn, DuetError> {
        let agent = self.next_agent().clone();
        let opening = self.history.is_empty();

        let request = self.turn_request(&agent, opening);
        let raw = self.model.complete(request).await?;
        let text = self
            .enforcer
            .finalize(&raw, &agent, opening, self.model.as_ref())
            .await;

        let index = self.history.len() + 1;
        info!(turn = index, speaker = %agent.display_name(), "turn finalized");

        self.history.push(Turn {
            index,
            speaker: agent.display_name(),
            role: agent.role,
            text,
        });

        Ok(&self.history[index - 1])
    }

    /// Run `turns` turns and return the whole history.
    pub async fn run(&mut self, turns: usize) -> Result<Vec<Turn>, DuetError> {
        for _ in 0..turns {
            self.next_turn().await?;
        }
        Ok(self.history.clone())
    }

    /// Build the completion request for `agent`.
    ///
    /// The topic only appears in the system prompt of the very first turn;
    /// later turns already carry it in the history.
    fn turn_request(&self, agent: &Agent, opening: bool) -> ChatRequest {
        let topic = opening.then_some(self.topic.as_str());

        let mut messages = Vec::with_capacity(self.history.len() + 2);
        messages.push(ChatMessage::System(self.config.system_prompt(agent, topic)));
        messages.extend(
            self.history
                .iter()
                .map(|turn| ChatMessage::User(format!("{}: {}", turn.speaker, turn.text).trim().to_string())),
        );
        messages.push(ChatMessage::User(
            self.config.turn_instruction(opening && agent.is_expert()),
        ));

        ChatRequest {
            messages,
            max_tokens: self.config.dialog.max_tokens,
            temperature: self.config.dialog.temperature,
        }
    }

    /// The history so far.
    pub fn history(&self) -> &[Turn] {
        &self.history
    }
}
