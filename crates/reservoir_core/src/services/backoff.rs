//! Linear backoff between connect attempts, and the clock it sleeps on.
//!
//! The delay after failed attempt `n` (1-based) is `n * base`.

use async_trait::async_trait;
use std::time::Duration;

/// Linear backoff strategy for connect retries.
///
/// # Example
///
/// ```
/// use reservoir_core::services::backoff::LinearBackoff;
/// use std::time::Duration;
///
/// let backoff = LinearBackoff::new(Duration::from_millis(500));
/// assert_eq!(backoff.delay_after(1), Duration::from_millis(500));
/// assert_eq!(backoff.delay_after(2), Duration::from_millis(1000));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearBackoff {
    base: Duration,
}

impl LinearBackoff {
    /// Create a backoff with the given base interval.
    pub fn new(base: Duration) -> Self {
        Self { base }
    }

    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base.saturating_mul(attempt)
    }

    /// Total time spent sleeping across a full run of `max_attempts`.
    pub fn total_delay(&self, max_attempts: u32) -> Duration {
        (1..max_attempts).map(|attempt| self.delay_after(attempt)).sum()
    }

    /// Get the base interval.
    pub fn base(&self) -> Duration {
        self.base
    }
}

impl Default for LinearBackoff {
    /// Default backoff: 500ms base
    fn default() -> Self {
        Self::new(Duration::from_millis(500))
    }
}

/// Source of backoff sleeps.
///
/// Injected into the pool so tests can observe or skip waiting.
#[async_trait]
pub trait Clock: Send + Sync + 'static {
    /// Suspend the current task for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Clock backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
