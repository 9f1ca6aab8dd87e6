//! Test doubles for the backend and the history source.
//!
//! Enabled with the `test-support` feature:
//!
//! ```toml
//! [dev-dependencies]
//! relay-core = { path = "...", features = ["test-support"] }
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use crate::backend::{ChatRequest, CompletionBackend, CompletionModel};
use crate::error::{BackendError, Result};
use crate::history::{HistorySource, RawMessage};

pub const DEFAULT_MOCK_REPLY: &str = "mock reply";

// ── MockBackend ───────────────────────────────────────────────────────────────

/// Scripted response for one `generate` call.
#[derive(Debug, Clone)]
pub enum Scripted {
    Text(String),
    Error(BackendError),
    /// Never resolves; used to exercise call timeouts.
    Hang,
}

/// One recorded `generate` call.
#[derive(Debug, Clone)]
pub struct GenerateCall {
    pub key: String,
    pub request: ChatRequest,
}

#[derive(Default)]
struct BackendState {
    probe_failures: HashMap<String, BackendError>,
    scripts: HashMap<String, VecDeque<Scripted>>,
    probes: Vec<String>,
    calls: Vec<GenerateCall>,
}

/// Backend whose probes and generations are scripted per key.
///
/// Unscripted probes succeed. Unscripted generations return
/// [`DEFAULT_MOCK_REPLY`].
#[derive(Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<BackendState>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every probe of `key` fail with `error`.
    pub fn fail_probe(&self, key: &str, error: BackendError) {
        self.state
            .lock()
            .unwrap()
            .probe_failures
            .insert(key.to_string(), error);
    }

    /// Queue a response for the next `generate` call made with `key`.
    pub fn script(&self, key: &str, response: Scripted) {
        self.state
            .lock()
            .unwrap()
            .scripts
            .entry(key.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn reply(&self, key: &str, text: impl Into<String>) {
        self.script(key, Scripted::Text(text.into()));
    }

    pub fn fail(&self, key: &str, error: BackendError) {
        self.script(key, Scripted::Error(error));
    }

    pub fn probed_keys(&self) -> Vec<String> {
        self.state.lock().unwrap().probes.clone()
    }

    pub fn calls(&self) -> Vec<GenerateCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().unwrap().calls.len()
    }

    /// Keys used by `generate`, in call order.
    pub fn called_keys(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .map(|c| c.key.clone())
            .collect()
    }
}

impl CompletionBackend for MockBackend {
    type Model = MockModel;

    async fn probe(&self, key: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.probes.push(key.to_string());
        match state.probe_failures.get(key) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn bind(&self, key: &str) -> MockModel {
        MockModel {
            key: key.to_string(),
            state: Arc::clone(&self.state),
        }
    }
}

/// Model handle produced by [`MockBackend::bind`].
#[derive(Clone)]
pub struct MockModel {
    key: String,
    state: Arc<Mutex<BackendState>>,
}

impl MockModel {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl std::fmt::Debug for MockModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockModel").field("key", &self.key).finish()
    }
}

impl CompletionModel for MockModel {
    async fn generate(&self, request: &ChatRequest) -> Result<String> {
        let next = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(GenerateCall {
                key: self.key.clone(),
                request: request.clone(),
            });
            state
                .scripts
                .get_mut(&self.key)
                .and_then(|queue| queue.pop_front())
        };

        match next {
            Some(Scripted::Text(text)) => Ok(text),
            Some(Scripted::Error(err)) => Err(err),
            Some(Scripted::Hang) => std::future::pending().await,
            None => Ok(DEFAULT_MOCK_REPLY.to_string()),
        }
    }
}

// ── MockHistory ───────────────────────────────────────────────────────────────

/// Fixed channel history, newest first.
#[derive(Clone, Default)]
pub struct MockHistory {
    messages: Vec<RawMessage>,
    fail: bool,
    requested_limits: Arc<Mutex<Vec<usize>>>,
}

impl MockHistory {
    pub fn new(messages: Vec<RawMessage>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// A source whose fetch always fails.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn requested_limits(&self) -> Vec<usize> {
        self.requested_limits.lock().unwrap().clone()
    }
}

impl HistorySource for MockHistory {
    async fn recent_messages(&self, limit: usize) -> anyhow::Result<Vec<RawMessage>> {
        self.requested_limits.lock().unwrap().push(limit);
        if self.fail {
            anyhow::bail!("channel history unavailable");
        }
        Ok(self.messages.iter().take(limit).cloned().collect())
    }
}
