//! What a handled mention resolves to, and the text sent back for it.

use std::time::Duration;

use rand::seq::SliceRandom;

use crate::error::FailureCategory;
use crate::settings::PLATFORM_MESSAGE_LIMIT;

const ELLIPSIS: &str = "...";

/// Why a mention was answered without a backend reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Refusal {
    Cooldown { retry_after: Duration },
    EmptyInput,
    TooLong { max: usize },
    BlockedContent,
    EmptyResponse,
}

/// Terminal result of one mention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Reply(String),
    /// Backend text cut down to the platform limit.
    TruncatedReply(String),
    Refusal(Refusal),
    Failed(FailureCategory),
}

impl Outcome {
    /// Wrap backend text, truncating it if it would not fit in one message.
    pub fn from_backend_text(text: String) -> Self {
        if text.chars().count() > PLATFORM_MESSAGE_LIMIT {
            Self::TruncatedReply(truncate_for_platform(&text))
        } else {
            Self::Reply(text)
        }
    }

    /// Whether the platform should deliver this as a reply to the trigger
    /// rather than as a plain channel message.
    pub fn is_threaded_reply(&self) -> bool {
        matches!(self, Self::Refusal(_) | Self::Failed(_))
    }

    /// Text to deliver to the channel.
    pub fn render(&self) -> String {
        match self {
            Self::Reply(text) | Self::TruncatedReply(text) => text.clone(),
            Self::Refusal(refusal) => refusal.render(),
            Self::Failed(category) => failure_text(*category).to_string(),
        }
    }
}

impl Refusal {
    pub fn render(&self) -> String {
        match self {
            Self::Cooldown { retry_after } => format!(
                "⏱️ Please wait {} seconds before making another request.",
                retry_after.as_secs().max(1)
            ),
            Self::EmptyInput => "❓ Please include a message with your mention.".to_string(),
            Self::TooLong { max } => {
                format!("📏 Message too long. Please keep it under {max} characters.")
            }
            Self::BlockedContent => "🚫 I cannot respond to that type of content.".to_string(),
            Self::EmptyResponse => {
                "🤖 I generated an empty response. Please try rephrasing your question.".to_string()
            }
        }
    }
}

/// First `PLATFORM_MESSAGE_LIMIT - 3` characters followed by `...`.
pub fn truncate_for_platform(text: &str) -> String {
    let keep = PLATFORM_MESSAGE_LIMIT - ELLIPSIS.len();
    let mut out: String = text.chars().take(keep).collect();
    out.push_str(ELLIPSIS);
    out
}

const TIMEOUT_TEXTS: &[&str] = &[
    "⌛ That took too long to answer. Please try again in a moment.",
    "⌛ The request timed out before a reply came back. Give it another go.",
    "⌛ I ran out of time thinking about that one. Please ask again.",
];

const QUOTA_TEXTS: &[&str] = &[
    "📉 I've hit my usage limit for now. Please try again later.",
    "📉 Too many requests right now. Please wait a bit and try again.",
    "📉 My request quota is used up for the moment. Check back soon.",
];

const SAFETY_TEXTS: &[&str] = &[
    "🛡️ My safety filters stopped that reply. Try wording it differently.",
    "🛡️ I can't answer that one. Please rephrase your question.",
];

const GENERIC_TEXTS: &[&str] = &[
    "⚠️ Something went wrong while generating a reply. Please try again.",
    "⚠️ I couldn't come up with an answer just now. Please try again later.",
    "⚠️ An unexpected error occurred. Please try again.",
];

fn failure_pool(category: FailureCategory) -> &'static [&'static str] {
    match category {
        FailureCategory::Timeout => TIMEOUT_TEXTS,
        FailureCategory::Quota => QUOTA_TEXTS,
        FailureCategory::Safety => SAFETY_TEXTS,
        FailureCategory::Generic => GENERIC_TEXTS,
    }
}

/// A random message from the pool for `category`.
pub fn failure_text(category: FailureCategory) -> &'static str {
    let pool = failure_pool(category);
    pool.choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(GENERIC_TEXTS[0])
}
