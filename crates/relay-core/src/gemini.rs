//! Google Gemini backend.
//!
//! Talks to the `generateContent` REST endpoint and the model-listing
//! endpoint used as a credential probe. HTTP and API failures are turned
//! into [`BackendError`] here and nowhere else.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client as HttpClient, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::{ChatRequest, CompletionBackend, CompletionModel};
use crate::error::{BackendError, Result};
use crate::history::{ConversationTurn, Role};

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Gemini connection settings shared by every bound model.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_base: String,
    pub model: String,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
        }
    }
}

/// Probes keys and hands out [`GeminiModel`]s.
#[derive(Debug, Clone)]
pub struct GeminiBackend {
    http: HttpClient,
    config: Arc<GeminiConfig>,
}

impl GeminiBackend {
    pub fn new(config: GeminiConfig) -> Self {
        Self {
            http: HttpClient::new(),
            config: Arc::new(config),
        }
    }
}

impl CompletionBackend for GeminiBackend {
    type Model = GeminiModel;

    async fn probe(&self, key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(BackendError::InvalidCredential("API key is not set".to_string()));
        }

        let url = format!("{}/v1/models", self.config.api_base.trim_end_matches('/'));
        let response = self
            .http
            .get(&url)
            .query(&[("key", key)])
            .header("content-type", "application/json")
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .map_err(|e| BackendError::ProbeFailed(e.without_url().to_string()))?;

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| BackendError::ProbeFailed(e.without_url().to_string()))?;

        if let Some(error) = body.get("error") {
            let message = error["message"]
                .as_str()
                .unwrap_or("unknown error")
                .to_string();
            return Err(BackendError::InvalidCredential(message));
        }

        Ok(())
    }

    fn bind(&self, key: &str) -> GeminiModel {
        GeminiModel {
            http: self.http.clone(),
            config: Arc::clone(&self.config),
            key: Arc::from(key),
        }
    }
}

/// Gemini model handle authenticated with one key.
#[derive(Clone)]
pub struct GeminiModel {
    http: HttpClient,
    config: Arc<GeminiConfig>,
    key: Arc<str>,
}

impl std::fmt::Debug for GeminiModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiModel")
            .field("model", &self.config.model)
            .field("key", &"<REDACTED>")
            .finish()
    }
}

impl CompletionModel for GeminiModel {
    async fn generate(&self, request: &ChatRequest) -> Result<String> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.api_base.trim_end_matches('/'),
            self.config.model
        );
        let body = GenerateContentRequest::from_chat(request);

        debug!(
            model = %self.config.model,
            history_turns = request.history.len(),
            "Sending generateContent request"
        );

        let response = self
            .http
            .post(&url)
            .query(&[("key", &*self.key)])
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let text = response.text().await.map_err(transport_error)?;

        if !status.is_success() {
            return Err(classify_api_error(status, &text));
        }

        let parsed: GenerateContentResponse = serde_json::from_str(&text)
            .map_err(|e| BackendError::Generic(format!("malformed response: {e}")))?;
        parsed.into_text()
    }
}

fn transport_error(e: reqwest::Error) -> BackendError {
    if e.is_timeout() {
        BackendError::Timeout
    } else {
        BackendError::Generic(e.without_url().to_string())
    }
}

/// Map a non-success HTTP response to the error taxonomy, preferring the
/// API's own `error.status` over the bare HTTP code.
pub(crate) fn classify_api_error(status: StatusCode, body: &str) -> BackendError {
    let api = serde_json::from_str::<ApiErrorEnvelope>(body)
        .ok()
        .map(|e| e.error);
    let message = api
        .as_ref()
        .map(|e| e.message.clone())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| format!("HTTP {status}"));

    match api.as_ref().map(|e| e.status.as_str()) {
        Some("RESOURCE_EXHAUSTED") => return BackendError::QuotaExceeded(message),
        Some("PERMISSION_DENIED") => return BackendError::PermissionDenied(message),
        Some("UNAUTHENTICATED") => return BackendError::InvalidCredential(message),
        Some("INVALID_ARGUMENT") if message.contains("API key") => {
            return BackendError::InvalidCredential(message)
        }
        _ => {}
    }

    match status {
        StatusCode::TOO_MANY_REQUESTS => BackendError::QuotaExceeded(message),
        StatusCode::UNAUTHORIZED => BackendError::InvalidCredential(message),
        StatusCode::FORBIDDEN => BackendError::PermissionDenied(message),
        _ => BackendError::Generic(message),
    }
}

// ── Wire types ───────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    generation_config: GenerationConfig,
}

impl GenerateContentRequest {
    fn from_chat(request: &ChatRequest) -> Self {
        let mut contents: Vec<Content> = request.history.iter().map(Content::from).collect();
        contents.push(Content::from(&ConversationTurn::user(request.message.clone())));

        let system_instruction = (!request.system_prompt.trim().is_empty()).then(|| Content {
            role: None,
            parts: vec![Part {
                text: Some(request.system_prompt.clone()),
            }],
        });

        Self {
            contents,
            system_instruction,
            generation_config: GenerationConfig {
                max_output_tokens: request.max_output_tokens,
                temperature: request.temperature,
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<Role>,
    #[serde(default)]
    parts: Vec<Part>,
}

impl From<&ConversationTurn> for Content {
    fn from(turn: &ConversationTurn) -> Self {
        Self {
            role: Some(turn.role),
            parts: vec![Part {
                text: Some(turn.text.clone()),
            }],
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

impl GenerateContentResponse {
    fn into_text(self) -> Result<String> {
        if let Some(reason) = self.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(BackendError::SafetyBlocked(format!("prompt blocked: {reason}")));
        }

        let Some(candidate) = self.candidates.into_iter().next() else {
            return Ok(String::new());
        };

        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.is_empty() && candidate.finish_reason.as_deref() == Some("SAFETY") {
            return Err(BackendError::SafetyBlocked(
                "candidate blocked: SAFETY".to_string(),
            ));
        }
        Ok(text)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

#[cfg(test)]
#[path = "gemini_tests.rs"]
mod gemini_tests;
