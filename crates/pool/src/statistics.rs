//! Connection Pool Statistics
//!
//! Point-in-time metric snapshots and the rolling wait-time window that
//! feeds `avg_wait_time_ms`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

/// Number of wait samples kept for the rolling average
pub const WAIT_SAMPLE_WINDOW: usize = 100;

/// Immutable snapshot of pool occupancy
///
/// `active_connections + idle_connections == current_size` always holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolMetrics {
    pub current_size: usize,
    pub active_connections: usize,
    pub idle_connections: usize,
    pub queue_length: usize,
    pub avg_wait_time_ms: f64,
    /// active / current_size, 0 for an empty pool
    pub utilization: f64,
    /// idle / current_size, 0 for an empty pool
    pub idle_ratio: f64,
    pub timestamp: DateTime<Utc>,
}

impl PoolMetrics {
    /// Derive a snapshot from raw counts
    pub fn from_counts(
        current_size: usize,
        active_connections: usize,
        queue_length: usize,
        avg_wait_time_ms: f64,
    ) -> Self {
        let active_connections = active_connections.min(current_size);
        let idle_connections = current_size - active_connections;
        let (utilization, idle_ratio) = if current_size > 0 {
            (
                active_connections as f64 / current_size as f64,
                idle_connections as f64 / current_size as f64,
            )
        } else {
            (0.0, 0.0)
        };

        Self {
            current_size,
            active_connections,
            idle_connections,
            queue_length,
            avg_wait_time_ms,
            utilization,
            idle_ratio,
            timestamp: Utc::now(),
        }
    }

    /// Metrics for a pool that holds no connections
    pub fn empty() -> Self {
        Self::from_counts(0, 0, 0, 0.0)
    }
}

/// Rolling window of the most recent acquire wait times
#[derive(Debug, Clone, Default)]
pub struct WaitTimeWindow {
    samples: VecDeque<f64>,
}

impl WaitTimeWindow {
    pub fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(WAIT_SAMPLE_WINDOW),
        }
    }

    pub fn record(&mut self, wait: Duration) {
        if self.samples.len() == WAIT_SAMPLE_WINDOW {
            self.samples.pop_front();
        }
        self.samples.push_back(wait.as_secs_f64() * 1000.0);
    }

    /// Mean of the recorded samples in milliseconds (0 when empty)
    pub fn average_ms(&self) -> f64 {
        if self.samples.is_empty() {
            0.0
        } else {
            self.samples.iter().sum::<f64>() / self.samples.len() as f64
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Pool metrics plus lifetime acquire counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtendedPoolStats {
    pub metrics: PoolMetrics,
    pub acquire_count: u64,
    pub acquire_errors: u64,
    pub uptime: Duration,
}

impl ExtendedPoolStats {
    /// Calculate the error rate as a percentage
    pub fn error_rate(&self) -> f64 {
        if self.acquire_count > 0 {
            (self.acquire_errors as f64 / self.acquire_count as f64) * 100.0
        } else {
            0.0
        }
    }

    /// Calculate success rate as a percentage
    pub fn success_rate(&self) -> f64 {
        100.0 - self.error_rate()
    }

    /// Check if the pool is under stress (utilization above `threshold`, 0..1)
    pub fn is_under_stress(&self, threshold: f64) -> bool {
        self.metrics.utilization > threshold
    }
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`
pub(crate) fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_saturating_millis() {
        assert_eq!(saturating_millis(Duration::from_millis(2500)), 2500);
        assert_eq!(saturating_millis(Duration::MAX), u64::MAX);
    }

    #[test]
    fn test_metrics_invariants() {
        let metrics = PoolMetrics::from_counts(4, 3, 2, 12.5);
        assert_eq!(metrics.active_connections + metrics.idle_connections, metrics.current_size);
        assert_eq!(metrics.utilization, 0.75);
        assert_eq!(metrics.idle_ratio, 0.25);
        assert_eq!(metrics.queue_length, 2);
    }

    #[test]
    fn test_empty_pool_ratios_are_zero() {
        let metrics = PoolMetrics::empty();
        assert_eq!(metrics.utilization, 0.0);
        assert_eq!(metrics.idle_ratio, 0.0);
    }

    #[test]
    fn test_wait_window_is_bounded() {
        let mut window = WaitTimeWindow::new();
        assert_eq!(window.average_ms(), 0.0);

        for _ in 0..WAIT_SAMPLE_WINDOW {
            window.record(Duration::from_millis(1000));
        }
        for _ in 0..WAIT_SAMPLE_WINDOW {
            window.record(Duration::from_millis(10));
        }

        assert_eq!(window.len(), WAIT_SAMPLE_WINDOW);
        assert!((window.average_ms() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_extended_stats_error_rate() {
        let stats = ExtendedPoolStats {
            metrics: PoolMetrics::from_counts(2, 2, 0, 0.0),
            acquire_count: 200,
            acquire_errors: 10,
            uptime: Duration::from_secs(30),
        };
        assert_eq!(stats.error_rate(), 5.0);
        assert_eq!(stats.success_rate(), 95.0);
        assert!(stats.is_under_stress(0.9));
    }
}
