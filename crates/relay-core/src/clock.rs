//! Clock trait abstraction for mocking time in tests.
//!
//! - `SystemClock`: wall-clock epoch milliseconds and real `tokio::time::sleep`
//! - `MockClock`: a settable epoch, `sleep()` returns immediately and records
//!   the requested duration

use std::future::Future;
#[cfg(any(test, feature = "test-support"))]
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Abstraction over the system clock.
///
/// Timestamps are milliseconds since the Unix epoch because that is what the
/// chat platform stamps messages with.
pub trait Clock: Send + Sync + 'static {
    /// Current time in epoch milliseconds.
    fn now_ms(&self) -> i64;

    /// Suspend for `duration` (no-op in mock implementations).
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}

/// Live implementation: delegates to `chrono` and tokio time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Mock clock for unit tests.
/// - `now_ms()` only moves when you call `advance()` or `set()`
/// - `sleep()` is a no-op that logs the requested duration
#[cfg(any(test, feature = "test-support"))]
#[derive(Clone, Default)]
pub struct MockClock {
    inner: Arc<Mutex<MockClockInner>>,
}

#[cfg(any(test, feature = "test-support"))]
#[derive(Default)]
struct MockClockInner {
    now_ms: i64,
    sleeps: Vec<Duration>,
}

#[cfg(any(test, feature = "test-support"))]
impl MockClock {
    /// Create a mock clock fixed at `now_ms`.
    pub fn at(now_ms: i64) -> Self {
        let clock = Self::default();
        clock.set(now_ms);
        clock
    }

    pub fn advance(&self, duration: Duration) {
        self.inner.lock().unwrap().now_ms += duration.as_millis() as i64;
    }

    pub fn set(&self, now_ms: i64) {
        self.inner.lock().unwrap().now_ms = now_ms;
    }

    /// Every duration passed to `sleep()` so far, in call order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.inner.lock().unwrap().sleeps.clone()
    }
}

#[cfg(any(test, feature = "test-support"))]
impl Clock for MockClock {
    fn now_ms(&self) -> i64 {
        self.inner.lock().unwrap().now_ms
    }

    async fn sleep(&self, duration: Duration) {
        self.inner.lock().unwrap().sleeps.push(duration);
    }
}
