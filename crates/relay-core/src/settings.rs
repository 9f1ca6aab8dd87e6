//! Tunables for the request path.

use std::time::Duration;

use crate::history::HistoryLimits;

/// Hard ceiling the chat platform puts on one outgoing message.
pub const PLATFORM_MESSAGE_LIMIT: usize = 2000;

#[derive(Debug, Clone, PartialEq)]
pub struct RelaySettings {
    pub cooldown: Duration,
    /// Longest accepted mention text, in characters.
    pub max_message_length: usize,
    pub history: HistoryLimits,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Backoff unit; attempt `n` waits `n * backoff`.
    pub backoff: Duration,
    pub call_timeout: Duration,
    pub sweep_interval: Duration,
    pub system_prompt: String,
    pub max_output_tokens: u32,
    pub temperature: f32,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_millis(5_000),
            max_message_length: 2_000,
            history: HistoryLimits {
                max_count: 10,
                max_age: Duration::from_secs(24 * 60 * 60),
                max_len_chars: 2_000,
            },
            max_retries: 2,
            backoff: Duration::from_millis(1_000),
            call_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(60),
            system_prompt: String::new(),
            max_output_tokens: 1_000,
            temperature: 0.7,
        }
    }
}
