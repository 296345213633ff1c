//! Pool lifecycle state and health reporting models.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Lifecycle state of the shared pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolState {
    /// No handle exists
    #[default]
    Absent,
    /// A connect sequence is in flight
    Connecting,
    /// A healthy handle is cached
    Ready,
    /// Shut down; no new handles may be created
    Closed,
}

impl PoolState {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Absent => "absent",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Closed => "closed",
        }
    }
}

impl std::fmt::Display for PoolState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Underlying connection pool status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    /// Maximum pool capacity
    pub max_size: usize,
    /// Current connections (idle + active)
    pub size: usize,
    /// Idle connections (can be negative during contention)
    pub available: isize,
    /// Tasks waiting for connections
    pub waiting: usize,
}

impl PoolStatus {
    /// Check if the pool is keeping up with demand.
    pub fn is_healthy(&self) -> bool {
        self.available >= 0 && self.waiting == 0
    }

    /// Get the number of active (in-use) connections.
    pub fn active(&self) -> usize {
        self.size.saturating_sub(self.available.max(0) as usize)
    }

    /// Get pool utilization as a percentage.
    pub fn utilization(&self) -> f64 {
        if self.max_size == 0 {
            0.0
        } else {
            (self.active() as f64 / self.max_size as f64) * 100.0
        }
    }
}

/// Point-in-time view of the pool manager.
#[derive(Debug, Clone, Serialize)]
pub struct PoolSnapshot {
    /// Lifecycle state
    pub state: PoolState,
    /// Number of connect sequences started so far
    pub generation: u64,
    /// Number of individual connect attempts made so far
    pub connect_attempts: u64,
    /// When the current handle became ready
    pub ready_since: Option<DateTime<Utc>>,
    /// Underlying pool status when a handle is ready
    pub pool: Option<PoolStatus>,
}

/// Result of a health check.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Whether acquire and the health statement both succeeded
    pub healthy: bool,
    /// Round-trip time of the health statement
    pub latency_ms: Option<u64>,
    /// Terminal error message on failure
    pub error: Option<String>,
    /// When the check completed
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    /// Create a successful report.
    pub fn healthy(latency_ms: u64) -> Self {
        Self { healthy: true, latency_ms: Some(latency_ms), error: None, checked_at: Utc::now() }
    }

    /// Create a failed report.
    pub fn unhealthy(error: impl Into<String>) -> Self {
        Self { healthy: false, latency_ms: None, error: Some(error.into()), checked_at: Utc::now() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_status_math() {
        let status = PoolStatus { max_size: 10, size: 6, available: 2, waiting: 0 };
        assert!(status.is_healthy());
        assert_eq!(status.active(), 4);
        assert!((status.utilization() - 40.0).abs() < f64::EPSILON);

        let starved = PoolStatus { max_size: 2, size: 2, available: -3, waiting: 3 };
        assert!(!starved.is_healthy());
        assert_eq!(starved.active(), 2);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(PoolState::default(), PoolState::Absent);
        assert_eq!(PoolState::Connecting.to_string(), "connecting");
        assert_eq!(serde_json::to_string(&PoolState::Ready).unwrap(), "\"ready\"");
    }

    #[test]
    fn test_health_report_constructors() {
        let ok = HealthReport::healthy(3);
        assert!(ok.healthy);
        assert_eq!(ok.latency_ms, Some(3));

        let bad = HealthReport::unhealthy("Connection error: refused");
        assert!(!bad.healthy);
        assert_eq!(bad.error.as_deref(), Some("Connection error: refused"));
    }
}
