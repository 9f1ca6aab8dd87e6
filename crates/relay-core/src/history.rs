//! Channel history → backend conversation.
//!
//! The chat platform hands back the most recent messages newest-first; the
//! backend wants an oldest-first conversation that opens with a user turn.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Messages starting with this are commands for other bots.
pub const COMMAND_PREFIX: char = '!';

/// Speaker of a conversation turn, in the backend's vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// One turn of backend conversation context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
}

impl ConversationTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            text: text.into(),
        }
    }
}

/// Snapshot of a channel message as read from the chat platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub author_id: u64,
    pub is_bot_author: bool,
    pub content: String,
    pub created_at_ms: i64,
}

/// Filters applied while building context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryLimits {
    /// Most recent messages considered.
    pub max_count: usize,
    /// Messages older than this are dropped.
    pub max_age: Duration,
    /// Messages longer than this (in characters) are dropped.
    pub max_len_chars: usize,
}

/// Source of recent channel messages, newest first.
pub trait HistorySource: Send + Sync {
    fn recent_messages(
        &self,
        limit: usize,
    ) -> impl Future<Output = anyhow::Result<Vec<RawMessage>>> + Send;
}

/// Build the backend conversation from newest-first `raw` messages.
///
/// The result is either empty or starts with a [`Role::User`] turn.
pub fn normalize(
    raw: Vec<RawMessage>,
    bot_id: u64,
    now_ms: i64,
    limits: &HistoryLimits,
) -> Vec<ConversationTurn> {
    let max_age_ms = limits.max_age.as_millis() as i64;

    let mut turns: Vec<ConversationTurn> = raw
        .into_iter()
        .take(limits.max_count)
        .rev()
        .filter(|msg| !msg.content.starts_with(COMMAND_PREFIX))
        .filter(|msg| !(msg.is_bot_author && msg.author_id != bot_id))
        .filter(|msg| now_ms - msg.created_at_ms <= max_age_ms)
        .filter(|msg| msg.content.chars().count() <= limits.max_len_chars)
        .map(|msg| {
            if msg.author_id == bot_id {
                ConversationTurn::model(msg.content)
            } else {
                ConversationTurn::user(msg.content)
            }
        })
        .collect();

    let leading_model = turns
        .iter()
        .take_while(|turn| turn.role == Role::Model)
        .count();
    turns.drain(..leading_model);

    if turns.first().map(|turn| turn.role) != Some(Role::User) {
        turns.clear();
    }
    turns
}

/// Fetch and normalize. History is best-effort: a failed fetch yields an
/// empty conversation instead of an error.
pub async fn load_conversation<H: HistorySource>(
    source: &H,
    bot_id: u64,
    now_ms: i64,
    limits: &HistoryLimits,
) -> Vec<ConversationTurn> {
    match source.recent_messages(limits.max_count).await {
        Ok(raw) => normalize(raw, bot_id, now_ms, limits),
        Err(e) => {
            warn!(error = %e, "Failed to fetch channel history, continuing without it");
            Vec::new()
        }
    }
}
