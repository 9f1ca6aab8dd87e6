//! Request orchestration for a chat relay between a Discord channel and a
//! Gemini text-generation backend.
//!
//! The core is platform-agnostic. The Discord side supplies a
//! [`MentionEvent`] and a [`HistorySource`]; the core answers with an
//! [`Outcome`] that the platform renders and delivers.

pub mod backend;
pub mod clock;
pub mod content_guard;
pub mod cooldown;
pub mod error;
pub mod gemini;
pub mod history;
pub mod key_pool;
pub mod orchestrator;
pub mod outcome;
pub mod settings;

#[cfg(any(test, feature = "test-support"))]
pub mod mocks;

pub use backend::{ChatRequest, CompletionBackend, CompletionModel};
pub use clock::{Clock, SystemClock};
pub use cooldown::{CooldownDecision, CooldownTracker};
pub use error::{BackendError, FailureCategory, PoolError};
pub use gemini::{GeminiBackend, GeminiConfig};
pub use history::{ConversationTurn, HistoryLimits, HistorySource, RawMessage, Role};
pub use key_pool::KeyPool;
pub use orchestrator::{AdmittedMessage, MentionEvent, Orchestrator};
pub use outcome::{Outcome, Refusal};
pub use settings::RelaySettings;

#[cfg(any(test, feature = "test-support"))]
pub use clock::MockClock;
