//! Error types for the relay core.
//!
//! Backend failures are classified once, where the HTTP response is read,
//! into [`BackendError`]. Everything downstream matches on variants.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, BackendError>;

/// Failure of a backend call or credential probe.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("invalid API key: {0}")]
    InvalidCredential(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("credential probe failed: {0}")]
    ProbeFailed(String),

    #[error("quota or rate limit exceeded: {0}")]
    QuotaExceeded(String),

    #[error("request timeout")]
    Timeout,

    #[error("response blocked by safety filters: {0}")]
    SafetyBlocked(String),

    #[error("all {tried} API key(s) failed")]
    AllKeysExhausted {
        tried: usize,
        #[source]
        last: Option<Box<BackendError>>,
    },

    #[error("no active API key")]
    NoActiveCredential,

    #[error("backend error: {0}")]
    Generic(String),
}

/// Outward grouping of backend failures, used to pick a user-facing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureCategory {
    Timeout,
    Quota,
    Safety,
    Generic,
}

impl BackendError {
    /// Errors that mean "this key is unusable right now, try the next one".
    pub fn rotates_key(&self) -> bool {
        matches!(
            self,
            Self::InvalidCredential(_)
                | Self::PermissionDenied(_)
                | Self::QuotaExceeded(_)
                | Self::ProbeFailed(_)
        )
    }

    pub fn category(&self) -> FailureCategory {
        match self {
            Self::Timeout => FailureCategory::Timeout,
            Self::QuotaExceeded(_) => FailureCategory::Quota,
            Self::SafetyBlocked(_) => FailureCategory::Safety,
            Self::AllKeysExhausted {
                last: Some(last), ..
            } => last.category(),
            Self::InvalidCredential(_)
            | Self::PermissionDenied(_)
            | Self::ProbeFailed(_)
            | Self::AllKeysExhausted { last: None, .. }
            | Self::NoActiveCredential
            | Self::Generic(_) => FailureCategory::Generic,
        }
    }
}

/// Startup failure of the credential pool.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("no API keys configured")]
    Empty,

    #[error("none of the {0} configured API key(s) passed the health probe")]
    NoHealthyCredential(usize),
}
