//! Health check endpoint

use std::sync::Arc;
use std::time::SystemTime;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use relay_core::{CompletionBackend, CooldownTracker, KeyPool};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub bot_username: Option<String>,
    pub uptime_secs: u64,
    /// 1-based position of the key in use.
    pub active_key: Option<usize>,
    pub key_count: usize,
    pub cooldown_entries: usize,
}

/// Read-only view of the key pool for reporting.
pub trait PoolStatus: Send + Sync {
    fn active_ordinal(&self) -> Option<usize>;
    fn key_count(&self) -> usize;
}

impl<B: CompletionBackend> PoolStatus for KeyPool<B> {
    fn active_ordinal(&self) -> Option<usize> {
        KeyPool::active_ordinal(self)
    }

    fn key_count(&self) -> usize {
        KeyPool::key_count(self)
    }
}

/// Shared application state for health checks
#[derive(Clone)]
pub struct AppState {
    pub start_time: SystemTime,
    pub bot_username: Arc<RwLock<Option<String>>>,
    pool: Arc<dyn PoolStatus>,
    cooldowns: Arc<CooldownTracker>,
}

impl AppState {
    pub fn new(pool: Arc<dyn PoolStatus>, cooldowns: Arc<CooldownTracker>) -> Self {
        Self {
            start_time: SystemTime::now(),
            bot_username: Arc::new(RwLock::new(None)),
            pool,
            cooldowns,
        }
    }

    pub async fn set_bot_username(&self, username: String) {
        let mut guard = self.bot_username.write().await;
        *guard = Some(username);
    }

    async fn snapshot(&self) -> HealthStatus {
        let active_key = self.pool.active_ordinal().map(|i| i + 1);
        HealthStatus {
            status: if active_key.is_some() { "ok" } else { "degraded" }.to_string(),
            bot_username: self.bot_username.read().await.clone(),
            uptime_secs: self.start_time.elapsed().unwrap_or_default().as_secs(),
            active_key,
            key_count: self.pool.key_count(),
            cooldown_entries: self.cooldowns.tracked_users(),
        }
    }
}

async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<HealthStatus>) {
    let status = state.snapshot().await;
    let code = if status.active_key.is_some() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(status))
}

async fn live_handler() -> StatusCode {
    StatusCode::OK
}

/// Create the health check router
pub fn create_health_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/live", get(live_handler))
        .with_state(state)
}

/// Start the health check server
pub async fn start_health_server(state: AppState, port: u16) -> anyhow::Result<()> {
    let app = create_health_router(state);
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Health check server listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
