//! Seams between the orchestrator and the text-generation service.
//!
//! A [`CompletionBackend`] knows how to probe a credential and how to bind a
//! [`CompletionModel`] to one. The key pool rebinds whenever it activates a
//! different key.

use std::future::Future;

use crate::error::Result;
use crate::history::ConversationTurn;

/// Everything the backend needs for one generation.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    /// Prior conversation, oldest first, empty or starting with a user turn.
    pub history: Vec<ConversationTurn>,
    /// Opaque personality / instruction text.
    pub system_prompt: String,
    /// The cleaned text of the triggering mention.
    pub message: String,
    pub max_output_tokens: u32,
    pub temperature: f32,
}

/// A model handle bound to a single credential.
pub trait CompletionModel: Clone + Send + Sync + 'static {
    fn generate(&self, request: &ChatRequest) -> impl Future<Output = Result<String>> + Send;
}

/// Factory and health check for [`CompletionModel`]s.
pub trait CompletionBackend: Send + Sync + 'static {
    type Model: CompletionModel;

    /// Lightweight validity check of `key`.
    fn probe(&self, key: &str) -> impl Future<Output = Result<()>> + Send;

    /// Build a model handle that authenticates with `key`.
    fn bind(&self, key: &str) -> Self::Model;
}
