//! Scaling decisions, events and status snapshots

use chrono::{DateTime, Utc};
use erpgate_pool::PoolMetrics;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Direction of a scaling decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScaleAction {
    Up,
    Down,
    None,
}

impl fmt::Display for ScaleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScaleAction::Up => write!(f, "up"),
            ScaleAction::Down => write!(f, "down"),
            ScaleAction::None => write!(f, "none"),
        }
    }
}

/// One evaluated trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingCondition {
    pub name: String,
    pub met: bool,
    /// Value in the newest sample
    pub current_value: f64,
    pub threshold: f64,
    /// Span covered by the samples inside the window
    pub duration: Duration,
}

impl ScalingCondition {
    pub(crate) fn describe(&self) -> String {
        format!(
            "{} {:.2} vs {:.2} over {}s",
            self.name,
            self.current_value,
            self.threshold,
            self.duration.as_secs()
        )
    }
}

/// Record of an attempted resize
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaleEvent {
    pub connection_id: String,
    pub action: ScaleAction,
    pub old_size: usize,
    pub new_size: usize,
    pub reason: String,
    pub metrics: PoolMetrics,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
}

/// Outcome of one `check_and_scale` or forced scaling call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingDecision {
    pub connection_id: String,
    pub action: ScaleAction,
    pub current_size: usize,
    pub target_size: usize,
    pub reason: String,
    pub conditions: Vec<ScalingCondition>,
    pub metrics: Option<PoolMetrics>,
}

impl ScalingDecision {
    /// A decision that leaves the pool untouched
    pub fn none<S: Into<String>, R: Into<String>>(connection_id: S, current_size: usize, reason: R) -> Self {
        Self {
            connection_id: connection_id.into(),
            action: ScaleAction::None,
            current_size,
            target_size: current_size,
            reason: reason.into(),
            conditions: Vec::new(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: PoolMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_conditions(mut self, conditions: Vec<ScalingCondition>) -> Self {
        self.conditions = conditions;
        self
    }

    /// Whether the decision resized the pool
    pub fn is_scaling(&self) -> bool {
        self.action != ScaleAction::None
    }
}

/// A metrics snapshot taken by `check_and_scale`
#[derive(Debug, Clone)]
pub struct MetricHistory {
    pub recorded_at: Instant,
    pub metrics: PoolMetrics,
}

/// Read-only diagnostic view of one autoscaler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolScalerStatus {
    pub connection_id: String,
    pub enabled: bool,
    pub running: bool,
    pub current_size: usize,
    pub min_pool_size: usize,
    pub max_pool_size: usize,
    pub metrics: PoolMetrics,
    pub last_event: Option<ScaleEvent>,
    pub cooldown_remaining: Duration,
    /// Up to the last 10 events, oldest first
    pub recent_events: Vec<ScaleEvent>,
}
