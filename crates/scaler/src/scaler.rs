//! Per-pool autoscaler
//!
//! A [`PoolScaler`] samples its pool's metrics on every check, keeps an hour
//! of history, and resizes the pool when a trigger has held for its whole
//! trailing window. Growth reacts to any one of utilization, queue length or
//! wait time; shrinking reacts to any one of low utilization, an empty queue
//! or a high idle ratio. A cooldown separates executed actions.

use crate::config::PoolScalerConfig;
use crate::error::{ScalerError, ScalerResult};
use crate::history::{EventLog, MetricsWindow};
use crate::sink::{MetricsSink, TracingMetricsSink};
use crate::types::{
    MetricHistory, PoolScalerStatus, ScaleAction, ScaleEvent, ScalingCondition, ScalingDecision,
};
use chrono::Utc;
use erpgate_pool::{PoolMetrics, ScalablePool};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Events included in [`PoolScalerStatus::recent_events`]
const STATUS_EVENT_COUNT: usize = 10;

// Fractions of the scaling windows used by the secondary triggers
const QUEUE_WINDOW_FRACTION: f64 = 0.6;
const WAIT_WINDOW_FRACTION: f64 = 0.4;
const SCALE_DOWN_SECONDARY_FRACTION: f64 = 0.67;

#[derive(Debug, Default)]
struct ScalerState {
    history: MetricsWindow,
    events: EventLog,
    last_scaled_at: Option<Instant>,
}

/// Autoscaler bound to one pool
pub struct PoolScaler {
    connection_id: String,
    config: PoolScalerConfig,
    pool: Arc<dyn ScalablePool>,
    sink: Arc<dyn MetricsSink>,
    running: AtomicBool,
    state: Mutex<ScalerState>,
    decision_lock: tokio::sync::Mutex<()>,
}

impl PoolScaler {
    /// Create a stopped autoscaler.
    ///
    /// The size bounds are narrowed to what the pool itself accepts.
    pub fn new<S: Into<String>>(
        connection_id: S,
        pool: Arc<dyn ScalablePool>,
        config: PoolScalerConfig,
    ) -> ScalerResult<Self> {
        let connection_id = connection_id.into();
        config.validate()?;

        let (pool_min, pool_max) = pool.size_bounds();
        let narrowed = config.narrowed_to(pool_min, pool_max)?;
        if (narrowed.get_min_pool_size(), narrowed.get_max_pool_size())
            != (config.get_min_pool_size(), config.get_max_pool_size())
        {
            warn!(
                "Narrowed scaling bounds for '{}' to [{}, {}] to fit the pool",
                connection_id,
                narrowed.get_min_pool_size(),
                narrowed.get_max_pool_size()
            );
        }

        Ok(Self {
            connection_id,
            config: narrowed,
            pool,
            sink: Arc::new(TracingMetricsSink),
            running: AtomicBool::new(false),
            state: Mutex::new(ScalerState::default()),
            decision_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn with_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Effective policy, with bounds narrowed to the pool's
    pub fn config(&self) -> &PoolScalerConfig {
        &self.config
    }

    pub fn start(&self) {
        if !self.running.swap(true, Ordering::SeqCst) {
            info!("Autoscaler for '{}' started", self.connection_id);
        }
    }

    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("Autoscaler for '{}' stopped", self.connection_id);
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Sample the pool, then grow, shrink or leave it alone
    pub async fn check_and_scale(&self) -> ScalerResult<ScalingDecision> {
        let _decision = self.decision_lock.lock().await;

        if !*self.config.get_enabled() {
            let size = self.pool.pool_metrics().current_size;
            return Ok(ScalingDecision::none(&self.connection_id, size, "autoscaling disabled"));
        }
        if !self.is_running() {
            let size = self.pool.pool_metrics().current_size;
            return Ok(ScalingDecision::none(&self.connection_id, size, "autoscaler is stopped"));
        }

        let metrics = self.pool.pool_metrics();
        let now = Instant::now();
        self.sink.record_pool_metrics(&self.connection_id, &metrics);

        let (cooldown, up_conditions, down_conditions) = {
            let mut state = self.state.lock();
            state.history.push(metrics.clone(), now);
            let cooldown = self.cooldown_remaining_at(&state, now);
            if cooldown.is_zero() {
                let up = self.scale_up_conditions(&state.history, now);
                let down = if up.iter().any(|c| c.met) {
                    Vec::new()
                } else {
                    self.scale_down_conditions(&state.history, now)
                };
                (cooldown, up, down)
            } else {
                (cooldown, Vec::new(), Vec::new())
            }
        };

        let current = metrics.current_size;
        if !cooldown.is_zero() {
            debug!("'{}' in cooldown for another {:?}", self.connection_id, cooldown);
            return Ok(ScalingDecision::none(
                &self.connection_id,
                current,
                format!("in cooldown period ({}s remaining)", cooldown.as_secs()),
            )
            .with_metrics(metrics));
        }

        if up_conditions.iter().any(|c| c.met) {
            let reason = format!("scale up: {}", met_reasons(&up_conditions));
            return self
                .apply(ScaleAction::Up, metrics, reason, up_conditions)
                .await;
        }

        if down_conditions.iter().any(|c| c.met) {
            let reason = format!("scale down: {}", met_reasons(&down_conditions));
            return self
                .apply(ScaleAction::Down, metrics, reason, down_conditions)
                .await;
        }

        let mut conditions = up_conditions;
        conditions.extend(down_conditions);
        Ok(ScalingDecision::none(&self.connection_id, current, "no scaling conditions met")
            .with_metrics(metrics)
            .with_conditions(conditions))
    }

    /// Grow by the scale-up factor now, ignoring triggers and cooldown
    pub async fn force_scale_up(&self) -> ScalerResult<ScalingDecision> {
        let _decision = self.decision_lock.lock().await;
        let metrics = self.pool.pool_metrics();
        self.apply(ScaleAction::Up, metrics, "manual scale up".to_string(), Vec::new())
            .await
    }

    /// Shrink by the scale-down factor now, ignoring triggers and cooldown
    pub async fn force_scale_down(&self) -> ScalerResult<ScalingDecision> {
        let _decision = self.decision_lock.lock().await;
        let metrics = self.pool.pool_metrics();
        self.apply(ScaleAction::Down, metrics, "manual scale down".to_string(), Vec::new())
            .await
    }

    /// Live pool metrics
    pub fn metrics(&self) -> PoolMetrics {
        self.pool.pool_metrics()
    }

    /// Pool size in the newest recorded sample, without probing the pool
    pub fn last_known_size(&self) -> usize {
        self.state
            .lock()
            .history
            .latest()
            .map_or(0, |m| m.current_size)
    }

    /// Up to `limit` most recent scale events, oldest first
    pub fn history(&self, limit: usize) -> Vec<ScaleEvent> {
        self.state.lock().events.recent(limit)
    }

    /// Metric samples from the last hour, oldest first
    pub fn metrics_history(&self) -> Vec<MetricHistory> {
        self.state.lock().history.snapshot()
    }

    pub fn status(&self) -> PoolScalerStatus {
        let metrics = self.pool.pool_metrics();
        let state = self.state.lock();
        PoolScalerStatus {
            connection_id: self.connection_id.clone(),
            enabled: *self.config.get_enabled(),
            running: self.is_running(),
            current_size: metrics.current_size,
            min_pool_size: *self.config.get_min_pool_size(),
            max_pool_size: *self.config.get_max_pool_size(),
            metrics,
            last_event: state.events.last().cloned(),
            cooldown_remaining: self.cooldown_remaining_at(&state, Instant::now()),
            recent_events: state.events.recent(STATUS_EVENT_COUNT),
        }
    }

    fn cooldown_remaining_at(&self, state: &ScalerState, now: Instant) -> Duration {
        state
            .last_scaled_at
            .map(|at| (at + *self.config.get_cooldown_period()).saturating_duration_since(now))
            .unwrap_or(Duration::ZERO)
    }

    fn scale_up_conditions(&self, history: &MetricsWindow, now: Instant) -> Vec<ScalingCondition> {
        let cfg = &self.config;
        let latest = history.latest();
        let wait_threshold_ms = cfg.get_avg_wait_time_threshold().as_secs_f64() * 1000.0;

        let utilization = history.sustained(*cfg.get_scale_up_duration(), now, |m| {
            m.utilization > *cfg.get_scale_up_threshold()
        });
        let queue = history.sustained(cfg.get_scale_up_duration().mul_f64(QUEUE_WINDOW_FRACTION), now, |m| {
            m.queue_length > *cfg.get_queue_length_threshold()
        });
        let wait = history.sustained(cfg.get_scale_up_duration().mul_f64(WAIT_WINDOW_FRACTION), now, |m| {
            m.avg_wait_time_ms > wait_threshold_ms
        });

        vec![
            ScalingCondition {
                name: "high utilization".into(),
                met: utilization.met,
                current_value: latest.map_or(0.0, |m| m.utilization),
                threshold: *cfg.get_scale_up_threshold(),
                duration: utilization.span,
            },
            ScalingCondition {
                name: "queue length".into(),
                met: queue.met,
                current_value: latest.map_or(0.0, |m| m.queue_length as f64),
                threshold: *cfg.get_queue_length_threshold() as f64,
                duration: queue.span,
            },
            ScalingCondition {
                name: "average wait ms".into(),
                met: wait.met,
                current_value: latest.map_or(0.0, |m| m.avg_wait_time_ms),
                threshold: wait_threshold_ms,
                duration: wait.span,
            },
        ]
    }

    fn scale_down_conditions(&self, history: &MetricsWindow, now: Instant) -> Vec<ScalingCondition> {
        let cfg = &self.config;
        let latest = history.latest();
        let secondary_window = cfg.get_scale_down_duration().mul_f64(SCALE_DOWN_SECONDARY_FRACTION);

        let utilization = history.sustained(*cfg.get_scale_down_duration(), now, |m| {
            m.utilization < *cfg.get_scale_down_threshold()
        });
        let empty_queue = history.sustained(secondary_window, now, |m| m.queue_length == 0);
        let idle = history.sustained(secondary_window, now, |m| m.idle_ratio > *cfg.get_idle_threshold());

        vec![
            ScalingCondition {
                name: "low utilization".into(),
                met: utilization.met,
                current_value: latest.map_or(0.0, |m| m.utilization),
                threshold: *cfg.get_scale_down_threshold(),
                duration: utilization.span,
            },
            ScalingCondition {
                name: "empty queue".into(),
                met: empty_queue.met,
                current_value: latest.map_or(0.0, |m| m.queue_length as f64),
                threshold: 0.0,
                duration: empty_queue.span,
            },
            ScalingCondition {
                name: "idle ratio".into(),
                met: idle.met,
                current_value: latest.map_or(0.0, |m| m.idle_ratio),
                threshold: *cfg.get_idle_threshold(),
                duration: idle.span,
            },
        ]
    }

    fn target_size(&self, action: ScaleAction, current: usize) -> usize {
        let (min, max) = (*self.config.get_min_pool_size(), *self.config.get_max_pool_size());
        match action {
            ScaleAction::Up => {
                let grown = (current as f64 * *self.config.get_scale_up_factor()).ceil() as usize;
                // An empty pool still grows by one
                grown.max(current + 1).min(max)
            }
            ScaleAction::Down => {
                let shrunk = (current as f64 * *self.config.get_scale_down_factor()).floor() as usize;
                shrunk.max(min)
            }
            ScaleAction::None => current,
        }
    }

    /// Resize in `action`'s direction, record the attempt and start the cooldown
    async fn apply(
        &self,
        action: ScaleAction,
        metrics: PoolMetrics,
        reason: String,
        conditions: Vec<ScalingCondition>,
    ) -> ScalerResult<ScalingDecision> {
        let current = metrics.current_size;
        let target = self.target_size(action, current);

        let unchanged = match action {
            ScaleAction::Up => (target <= current).then_some("already at maximum pool size"),
            ScaleAction::Down => (target >= current).then_some("already at minimum pool size"),
            ScaleAction::None => Some("no scaling requested"),
        };
        if let Some(why) = unchanged {
            debug!("'{}' not scaled {}: {}", self.connection_id, action, why);
            return Ok(ScalingDecision::none(&self.connection_id, current, why)
                .with_metrics(metrics)
                .with_conditions(conditions));
        }

        let result = self.pool.resize_pool(target).await;
        let event = ScaleEvent {
            connection_id: self.connection_id.clone(),
            action,
            old_size: current,
            new_size: target,
            reason: reason.clone(),
            metrics: metrics.clone(),
            timestamp: Utc::now(),
            success: result.is_ok(),
            error: result.as_ref().err().map(|e| e.to_string()),
        };
        {
            let mut state = self.state.lock();
            state.events.push(event.clone());
            state.last_scaled_at = Some(Instant::now());
        }
        self.sink.record_scale_event(&event);

        match result {
            Ok(()) => {
                info!(
                    "Scaled '{}' {} from {} to {} ({})",
                    self.connection_id, action, current, target, reason
                );
                Ok(ScalingDecision {
                    connection_id: self.connection_id.clone(),
                    action,
                    current_size: current,
                    target_size: target,
                    reason,
                    conditions,
                    metrics: Some(metrics),
                })
            }
            Err(e) => {
                error!(
                    "Failed to scale '{}' {} from {} to {}: {}",
                    self.connection_id, action, current, target, e
                );
                Err(ScalerError::ScalingFailed {
                    connection_id: self.connection_id.clone(),
                    action,
                    source: e,
                })
            }
        }
    }
}

impl std::fmt::Debug for PoolScaler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolScaler")
            .field("connection_id", &self.connection_id)
            .field("running", &self.is_running())
            .field("config", &self.config)
            .finish()
    }
}

fn met_reasons(conditions: &[ScalingCondition]) -> String {
    conditions
        .iter()
        .filter(|c| c.met)
        .map(ScalingCondition::describe)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolScalerConfigBuilder;
    use crate::sink::RecordingMetricsSink;
    use async_trait::async_trait;
    use erpgate_pool::{PoolError, PoolResult};

    /// Pool stand-in whose occupancy is set by the test
    struct FakePool {
        bounds: (usize, usize),
        state: Mutex<(usize, usize, usize)>,
        fail_resize: AtomicBool,
    }

    impl FakePool {
        fn new(size: usize, min: usize, max: usize) -> Arc<Self> {
            Arc::new(Self {
                bounds: (min, max),
                state: Mutex::new((size, 0, 0)),
                fail_resize: AtomicBool::new(false),
            })
        }

        fn set_utilization(&self, utilization: f64) {
            let mut state = self.state.lock();
            state.1 = (state.0 as f64 * utilization).round() as usize;
        }

        fn set_queue(&self, queue: usize) {
            self.state.lock().2 = queue;
        }

        fn size(&self) -> usize {
            self.state.lock().0
        }
    }

    #[async_trait]
    impl ScalablePool for FakePool {
        fn pool_metrics(&self) -> PoolMetrics {
            let (size, active, queue) = *self.state.lock();
            PoolMetrics::from_counts(size, active, queue, 0.0)
        }

        async fn resize_pool(&self, new_size: usize) -> PoolResult<()> {
            if self.fail_resize.load(Ordering::SeqCst) {
                return Err(PoolError::ResizeFailed {
                    requested: new_size,
                    reason: "backend down".into(),
                });
            }
            let mut state = self.state.lock();
            state.1 = state.1.min(new_size);
            state.0 = new_size;
            Ok(())
        }

        fn size_bounds(&self) -> (usize, usize) {
            self.bounds
        }
    }

    fn config() -> PoolScalerConfig {
        PoolScalerConfigBuilder::new()
            .min_pool_size(2)
            .max_pool_size(10)
            .build()
            .expect("Failed to build config")
    }

    fn scaler(pool: &Arc<FakePool>, config: PoolScalerConfig) -> PoolScaler {
        let scaler = PoolScaler::new("erp-main", pool.clone(), config).unwrap();
        scaler.start();
        scaler
    }

    #[tokio::test(start_paused = true)]
    async fn test_sustained_high_utilization_scales_two_to_three() {
        let pool = FakePool::new(2, 2, 10);
        pool.set_utilization(1.0);
        let scaler = scaler(&pool, config());

        let first = scaler.check_and_scale().await.unwrap();
        assert_eq!(first.action, ScaleAction::None);

        tokio::time::advance(Duration::from_secs(300)).await;
        let decision = scaler.check_and_scale().await.unwrap();
        assert_eq!(decision.action, ScaleAction::Up);
        assert_eq!(decision.target_size, 3);
        assert_eq!(pool.size(), 3);
        assert!(decision.reason.contains("high utilization"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_dip_resets_condition() {
        let pool = FakePool::new(4, 2, 10);
        let scaler = scaler(&pool, config());

        for minute in 0..=5 {
            // One quiet sample in the middle of the window
            pool.set_utilization(if minute == 3 { 0.5 } else { 1.0 });
            let decision = scaler.check_and_scale().await.unwrap();
            assert_eq!(decision.action, ScaleAction::None, "minute {}", minute);
            tokio::time::advance(Duration::from_secs(60)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_at_maximum_is_a_no_op() {
        let pool = FakePool::new(10, 2, 10);
        pool.set_utilization(1.0);
        let scaler = scaler(&pool, config());

        scaler.check_and_scale().await.unwrap();
        tokio::time::advance(Duration::from_secs(300)).await;
        let decision = scaler.check_and_scale().await.unwrap();

        assert_eq!(decision.action, ScaleAction::None);
        assert_eq!(decision.reason, "already at maximum pool size");
        assert!(scaler.history(10).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_blocks_second_action() {
        let pool = FakePool::new(2, 2, 10);
        pool.set_utilization(1.0);
        let scaler = scaler(&pool, config());

        scaler.check_and_scale().await.unwrap();
        tokio::time::advance(Duration::from_secs(300)).await;
        assert_eq!(scaler.check_and_scale().await.unwrap().action, ScaleAction::Up);

        tokio::time::advance(Duration::from_secs(60)).await;
        pool.set_utilization(1.0);
        let decision = scaler.check_and_scale().await.unwrap();
        assert_eq!(decision.action, ScaleAction::None);
        assert!(decision.reason.contains("cooldown"));
        assert_eq!(scaler.status().cooldown_remaining, Duration::from_secs(240));

        tokio::time::advance(Duration::from_secs(240)).await;
        assert_eq!(scaler.check_and_scale().await.unwrap().action, ScaleAction::Up);
        assert_eq!(pool.size(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_trigger_uses_shorter_window() {
        let pool = FakePool::new(4, 2, 10);
        pool.set_utilization(0.5);
        pool.set_queue(20);
        let scaler = scaler(&pool, config());

        scaler.check_and_scale().await.unwrap();
        // 60% of the five minute window
        tokio::time::advance(Duration::from_secs(180)).await;
        let decision = scaler.check_and_scale().await.unwrap();
        assert_eq!(decision.action, ScaleAction::Up);
        assert!(decision.reason.contains("queue length"));
        assert_eq!(decision.target_size, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sustained_idle_scales_down() {
        let pool = FakePool::new(10, 2, 10);
        pool.set_utilization(0.1);
        let scaler = scaler(&pool, config());

        scaler.check_and_scale().await.unwrap();
        // Empty queue and idle ratio hold for over 67% of fifteen minutes
        tokio::time::advance(Duration::from_secs(610)).await;
        let decision = scaler.check_and_scale().await.unwrap();
        assert_eq!(decision.action, ScaleAction::Down);
        assert_eq!(decision.target_size, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scale_down_stops_at_minimum() {
        let pool = FakePool::new(2, 2, 10);
        let scaler = scaler(&pool, config());

        let decision = scaler.force_scale_down().await.unwrap();
        assert_eq!(decision.action, ScaleAction::None);
        assert_eq!(decision.reason, "already at minimum pool size");
    }

    #[tokio::test]
    async fn test_disabled_and_stopped_are_no_ops() {
        let pool = FakePool::new(2, 2, 10);
        let disabled = PoolScaler::new(
            "off",
            pool.clone(),
            PoolScalerConfigBuilder::new()
                .enabled(false)
                .build()
                .expect("Failed to build config"),
        )
        .unwrap();
        disabled.start();
        assert_eq!(disabled.check_and_scale().await.unwrap().reason, "autoscaling disabled");
        assert!(disabled.metrics_history().is_empty());

        let stopped = PoolScaler::new("idle", pool.clone(), config()).unwrap();
        let decision = stopped.check_and_scale().await.unwrap();
        assert_eq!(decision.reason, "autoscaler is stopped");
    }

    #[tokio::test]
    async fn test_forced_scaling_records_events() {
        let pool = FakePool::new(4, 2, 10);
        let sink = Arc::new(RecordingMetricsSink::new());
        let scaler = PoolScaler::new("erp-main", pool.clone(), config())
            .unwrap()
            .with_sink(sink.clone());

        assert_eq!(scaler.force_scale_up().await.unwrap().target_size, 6);
        assert_eq!(scaler.force_scale_down().await.unwrap().target_size, 4);

        let history = scaler.history(10);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].action, ScaleAction::Up);
        assert!(history[1].success);
        assert_eq!(history[1].reason, "manual scale down");
        assert_eq!(sink.events().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_resize_is_recorded() {
        let pool = FakePool::new(4, 2, 10);
        pool.fail_resize.store(true, Ordering::SeqCst);
        let scaler = scaler(&pool, config());

        let err = scaler.force_scale_up().await.unwrap_err();
        assert!(matches!(err, ScalerError::ScalingFailed { action: ScaleAction::Up, .. }));

        let status = scaler.status();
        let last = status.last_event.unwrap();
        assert!(!last.success);
        assert!(last.error.unwrap().contains("backend down"));
        assert_eq!(status.current_size, 4);
    }

    #[test]
    fn test_bounds_narrowed_to_pool() {
        let pool = FakePool::new(3, 3, 6);
        let scaler = PoolScaler::new("narrow", pool, config()).unwrap();
        assert_eq!(*scaler.config().get_min_pool_size(), 3);
        assert_eq!(*scaler.config().get_max_pool_size(), 6);

        let disjoint = FakePool::new(20, 20, 30);
        assert!(PoolScaler::new("disjoint", disjoint, config()).is_err());
    }
}
