//! Where autoscalers report what they observe and do

use crate::types::ScaleEvent;
use erpgate_pool::PoolMetrics;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

/// Receives scale events and per-check metric snapshots
pub trait MetricsSink: Send + Sync {
    fn record_scale_event(&self, event: &ScaleEvent);

    fn record_pool_metrics(&self, _connection_id: &str, _metrics: &PoolMetrics) {}
}

/// Default sink: emits structured tracing events
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMetricsSink;

impl MetricsSink for TracingMetricsSink {
    fn record_scale_event(&self, event: &ScaleEvent) {
        if event.success {
            info!(
                connection_id = %event.connection_id,
                action = %event.action,
                old_size = event.old_size,
                new_size = event.new_size,
                utilization = event.metrics.utilization,
                "pool scaled: {}",
                event.reason
            );
        } else {
            warn!(
                connection_id = %event.connection_id,
                action = %event.action,
                old_size = event.old_size,
                new_size = event.new_size,
                error = event.error.as_deref().unwrap_or("unknown"),
                "pool scaling failed"
            );
        }
    }

    fn record_pool_metrics(&self, connection_id: &str, metrics: &PoolMetrics) {
        debug!(
            connection_id,
            size = metrics.current_size,
            active = metrics.active_connections,
            queue = metrics.queue_length,
            avg_wait_ms = metrics.avg_wait_time_ms,
            "pool metrics sampled"
        );
    }
}

/// Sink that keeps every event in memory
#[derive(Debug, Default)]
pub struct RecordingMetricsSink {
    events: Mutex<Vec<ScaleEvent>>,
    samples: Mutex<usize>,
}

impl RecordingMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ScaleEvent> {
        self.events.lock().clone()
    }

    /// Number of metric snapshots reported
    pub fn sample_count(&self) -> usize {
        *self.samples.lock()
    }
}

impl MetricsSink for RecordingMetricsSink {
    fn record_scale_event(&self, event: &ScaleEvent) {
        self.events.lock().push(event.clone());
    }

    fn record_pool_metrics(&self, _connection_id: &str, _metrics: &PoolMetrics) {
        *self.samples.lock() += 1;
    }
}
