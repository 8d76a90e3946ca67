//! Connection Pool Health Monitoring

use crate::statistics::ExtendedPoolStats;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Probe round trips slower than this mark the pool unresponsive
const RESPONSIVE_THRESHOLD: Duration = Duration::from_millis(1000);

/// Detailed pool health report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolHealthReport {
    /// Round trip of the probe query
    pub check_duration: Duration,
    pub stats: ExtendedPoolStats,
}

impl PoolHealthReport {
    /// Check if the pool is healthy based on standard metrics
    pub fn is_healthy(&self) -> bool {
        self.status_summary() == HealthStatus::Healthy
    }

    pub fn is_responsive(&self) -> bool {
        self.check_duration < RESPONSIVE_THRESHOLD
    }

    pub fn has_acceptable_error_rate(&self) -> bool {
        self.stats.error_rate() < 5.0
    }

    /// Callers are queued behind a saturated pool
    pub fn is_saturated(&self) -> bool {
        self.stats.metrics.queue_length > 0
    }

    /// Generate health status summary
    pub fn status_summary(&self) -> HealthStatus {
        let error_rate = self.stats.error_rate();
        if !self.is_responsive() {
            HealthStatus::Unhealthy {
                reason: format!("Probe took {}ms", self.check_duration.as_millis()),
            }
        } else if !self.has_acceptable_error_rate() {
            HealthStatus::Degraded {
                reason: format!("High error rate: {:.1}%", error_rate),
                severity: if error_rate > 25.0 {
                    Severity::High
                } else if error_rate > 10.0 {
                    Severity::Medium
                } else {
                    Severity::Low
                },
            }
        } else if self.is_saturated() {
            HealthStatus::Degraded {
                reason: format!("{} callers waiting", self.stats.metrics.queue_length),
                // More callers queued than the pool can serve in one round
                severity: if self.stats.metrics.queue_length > self.stats.metrics.current_size {
                    Severity::High
                } else {
                    Severity::Medium
                },
            }
        } else if self.stats.metrics.utilization > 0.8 {
            HealthStatus::Warning {
                reason: format!("High utilization: {:.1}%", self.stats.metrics.utilization * 100.0),
            }
        } else {
            HealthStatus::Healthy
        }
    }
}

/// Health status enumeration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    Warning { reason: String },
    Degraded { reason: String, severity: Severity },
    Unhealthy { reason: String },
}

/// Issue severity levels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "HEALTHY"),
            HealthStatus::Warning { reason } => write!(f, "WARNING: {}", reason),
            HealthStatus::Degraded { reason, severity } => {
                write!(f, "DEGRADED ({:?}): {}", severity, reason)
            }
            HealthStatus::Unhealthy { reason } => write!(f, "UNHEALTHY: {}", reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statistics::PoolMetrics;

    fn report(active: usize, queue: usize, errors: u64, probe_ms: u64) -> PoolHealthReport {
        PoolHealthReport {
            check_duration: Duration::from_millis(probe_ms),
            stats: ExtendedPoolStats {
                metrics: PoolMetrics::from_counts(10, active, queue, 0.0),
                acquire_count: 100,
                acquire_errors: errors,
                uptime: Duration::from_secs(60),
            },
        }
    }

    #[test]
    fn test_healthy_pool() {
        let report = report(2, 0, 0, 5);
        assert!(report.is_healthy());
        assert_eq!(report.status_summary().to_string(), "HEALTHY");
    }

    #[test]
    fn test_status_ordering() {
        assert!(matches!(report(2, 0, 0, 1500).status_summary(), HealthStatus::Unhealthy { .. }));
        assert!(matches!(
            report(2, 0, 30, 5).status_summary(),
            HealthStatus::Degraded { severity: Severity::High, .. }
        ));
        assert!(matches!(report(10, 3, 0, 5).status_summary(), HealthStatus::Degraded { .. }));
        assert!(matches!(report(9, 0, 0, 5).status_summary(), HealthStatus::Warning { .. }));
    }

    #[test]
    fn test_degraded_severity_levels() {
        assert!(matches!(
            report(2, 0, 7, 5).status_summary(),
            HealthStatus::Degraded { severity: Severity::Low, .. }
        ));
        assert!(matches!(
            report(2, 0, 15, 5).status_summary(),
            HealthStatus::Degraded { severity: Severity::Medium, .. }
        ));
        assert!(matches!(
            report(10, 12, 0, 5).status_summary(),
            HealthStatus::Degraded { severity: Severity::High, .. }
        ));
    }
}
