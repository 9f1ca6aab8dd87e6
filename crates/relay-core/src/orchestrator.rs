//! Turns one mention into one [`Outcome`].
//!
//! The request path is split in two so the platform layer can act between
//! the steps (it shows a typing indicator once the input is accepted):
//!
//! 1. [`Orchestrator::admit`] runs the cooldown gate, strips the mention and
//!    applies the input gates.
//! 2. [`Orchestrator::respond`] loads history and calls the backend through
//!    key failover wrapped in retry with linear backoff.
//!
//! [`Orchestrator::handle_mention`] runs both.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::backend::{ChatRequest, CompletionBackend, CompletionModel};
use crate::clock::Clock;
use crate::content_guard;
use crate::cooldown::{CooldownDecision, CooldownTracker};
use crate::error::{BackendError, Result};
use crate::history::{self, HistorySource};
use crate::key_pool::KeyPool;
use crate::outcome::{Outcome, Refusal};
use crate::settings::RelaySettings;

/// An inbound message that mentions the bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MentionEvent {
    pub author_id: u64,
    pub channel_id: u64,
    pub content: String,
}

/// Mention text that passed every input gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmittedMessage {
    pub author_id: u64,
    pub text: String,
}

pub struct Orchestrator<B: CompletionBackend, C: Clock> {
    pool: Arc<KeyPool<B>>,
    cooldowns: Arc<CooldownTracker>,
    clock: C,
    settings: RelaySettings,
}

impl<B: CompletionBackend, C: Clock> Orchestrator<B, C> {
    pub fn new(
        pool: Arc<KeyPool<B>>,
        cooldowns: Arc<CooldownTracker>,
        clock: C,
        settings: RelaySettings,
    ) -> Self {
        Self {
            pool,
            cooldowns,
            clock,
            settings,
        }
    }

    pub fn pool(&self) -> &Arc<KeyPool<B>> {
        &self.pool
    }

    pub async fn handle_mention<H: HistorySource>(
        &self,
        event: &MentionEvent,
        bot_id: u64,
        history: &H,
    ) -> Outcome {
        match self.admit(event, bot_id) {
            Ok(message) => self.respond(&message, bot_id, history).await,
            Err(refusal) => Outcome::Refusal(refusal),
        }
    }

    /// Cooldown and input gates. No backend traffic happens here.
    pub fn admit(
        &self,
        event: &MentionEvent,
        bot_id: u64,
    ) -> std::result::Result<AdmittedMessage, Refusal> {
        let now = self.clock.now_ms();
        if let CooldownDecision::Wait { retry_after } =
            self.cooldowns.check_and_stamp(event.author_id, now)
        {
            debug!(user_id = event.author_id, ?retry_after, "User is on cooldown");
            return Err(Refusal::Cooldown { retry_after });
        }

        let text = strip_mention(&event.content, bot_id);
        if text.is_empty() {
            return Err(Refusal::EmptyInput);
        }

        let max = self.settings.max_message_length;
        if text.chars().count() > max {
            return Err(Refusal::TooLong { max });
        }

        if content_guard::is_blocked(&text) {
            info!(user_id = event.author_id, "Mention matched a blocked pattern");
            return Err(Refusal::BlockedContent);
        }

        Ok(AdmittedMessage {
            author_id: event.author_id,
            text,
        })
    }

    /// History, backend call and output policy for an admitted message.
    pub async fn respond<H: HistorySource>(
        &self,
        message: &AdmittedMessage,
        bot_id: u64,
        history: &H,
    ) -> Outcome {
        let turns =
            history::load_conversation(history, bot_id, self.clock.now_ms(), &self.settings.history)
                .await;

        let request = ChatRequest {
            history: turns,
            system_prompt: self.settings.system_prompt.clone(),
            message: message.text.clone(),
            max_output_tokens: self.settings.max_output_tokens,
            temperature: self.settings.temperature,
        };

        match self.complete_with_retry(&request).await {
            Ok(text) if text.trim().is_empty() => {
                warn!(user_id = message.author_id, "Backend returned an empty response");
                Outcome::Refusal(Refusal::EmptyResponse)
            }
            Ok(text) => Outcome::from_backend_text(text),
            Err(e) => {
                error!(user_id = message.author_id, error = %e, "Failed to generate a reply");
                Outcome::Failed(e.category())
            }
        }
    }

    /// Outer retry: the whole failover loop is one attempt, and attempt `n`
    /// failing waits `n * backoff` before the next.
    async fn complete_with_retry(&self, request: &ChatRequest) -> Result<String> {
        let max_retries = self.settings.max_retries;
        let mut attempt: u32 = 0;

        loop {
            match self.complete_with_failover(request).await {
                Ok(text) => return Ok(text),
                Err(e) if attempt < max_retries => {
                    attempt += 1;
                    info!(
                        error = %e,
                        "API call failed, retrying... ({}/{})", attempt, max_retries
                    );
                    self.clock
                        .sleep(self.settings.backoff.saturating_mul(attempt))
                        .await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Inner loop: call the active key, rotating past keys whose failure
    /// marks them unusable. At most one full pass over the pool.
    async fn complete_with_failover(&self, request: &ChatRequest) -> Result<String> {
        let pool_size = self.pool.key_count();
        let mut tried = 0;

        loop {
            let active = self
                .pool
                .current_model()
                .ok_or(BackendError::NoActiveCredential)?;
            tried += 1;

            let err = match self.call_with_timeout(&active.model, request).await {
                Ok(text) => return Ok(text),
                Err(e) if e.rotates_key() => e,
                Err(e) => return Err(e),
            };

            warn!(key = active.ordinal + 1, error = %err, "API key failed, switching keys");

            let mut activated = false;
            while tried < pool_size {
                match self.pool.rotate_and_activate().await {
                    Ok(_) => {
                        activated = true;
                        break;
                    }
                    Err(_) => tried += 1,
                }
            }

            if !activated {
                return Err(BackendError::AllKeysExhausted {
                    tried,
                    last: Some(Box::new(err)),
                });
            }
        }
    }

    async fn call_with_timeout(&self, model: &B::Model, request: &ChatRequest) -> Result<String> {
        tokio::time::timeout(self.settings.call_timeout, model.generate(request))
            .await
            .unwrap_or(Err(BackendError::Timeout))
    }
}

/// Remove `<@id>` and `<@!id>` mentions of the bot and trim.
pub fn strip_mention(content: &str, bot_id: u64) -> String {
    content
        .replace(&format!("<@{bot_id}>"), "")
        .replace(&format!("<@!{bot_id}>"), "")
        .trim()
        .to_string()
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod orchestrator_tests;
