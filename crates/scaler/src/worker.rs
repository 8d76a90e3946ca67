//! Periodic task driving every registered autoscaler

use crate::config::WorkerConfig;
use crate::manager::PoolScalerManager;
use crate::types::ScalingDecision;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

#[derive(Debug, Default)]
struct WorkerCounters {
    check_count: AtomicU64,
    scaling_events_count: AtomicU64,
    failed_checks: AtomicU64,
    last_run_at: Mutex<Option<DateTime<Utc>>>,
}

/// Worker counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStats {
    pub running: bool,
    pub check_interval: Duration,
    /// Completed ticks
    pub check_count: u64,
    /// Decisions that resized a pool
    pub scaling_events_count: u64,
    /// Per-pool checks that errored or panicked
    pub failed_checks: u64,
    pub last_run_at: Option<DateTime<Utc>>,
}

/// Runs `check_and_scale` on every registered autoscaler each interval
pub struct PoolScalerWorker {
    manager: Arc<PoolScalerManager>,
    config: WorkerConfig,
    counters: Arc<WorkerCounters>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PoolScalerWorker {
    pub fn new(manager: Arc<PoolScalerManager>, config: WorkerConfig) -> Self {
        Self {
            manager,
            config,
            counters: Arc::new(WorkerCounters::default()),
            handle: Mutex::new(None),
        }
    }

    pub fn manager(&self) -> &Arc<PoolScalerManager> {
        &self.manager
    }

    /// Start the periodic loop; the first tick fires one interval from now.
    /// Returns false if already running.
    pub fn start(&self) -> bool {
        let mut handle = self.handle.lock();
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            warn!("Pool scaler worker already running");
            return false;
        }

        let manager = self.manager.clone();
        let counters = self.counters.clone();
        let period = *self.config.get_check_interval();

        *handle = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                run_tick(&manager, &counters).await;
            }
        }));

        info!("Pool scaler worker started (interval: {:?})", period);
        true
    }

    pub fn stop(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
            info!("Pool scaler worker stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.lock().as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Run one tick now and return every decision it produced
    pub async fn run_once(&self) -> Vec<ScalingDecision> {
        run_tick(&self.manager, &self.counters).await
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            running: self.is_running(),
            check_interval: *self.config.get_check_interval(),
            check_count: self.counters.check_count.load(Ordering::Relaxed),
            scaling_events_count: self.counters.scaling_events_count.load(Ordering::Relaxed),
            failed_checks: self.counters.failed_checks.load(Ordering::Relaxed),
            last_run_at: *self.counters.last_run_at.lock(),
        }
    }
}

impl Drop for PoolScalerWorker {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
        }
    }
}

/// Check every autoscaler concurrently, each in its own task so one failing
/// or panicking pool cannot hold up the others
async fn run_tick(manager: &PoolScalerManager, counters: &WorkerCounters) -> Vec<ScalingDecision> {
    let scalers = manager.scalers().await;
    debug!("Running scaling checks for {} pools", scalers.len());

    let checks = scalers.iter().map(|scaler| {
        let scaler = scaler.clone();
        tokio::spawn(async move { scaler.check_and_scale().await })
    });
    let results = join_all(checks).await;

    let mut decisions = Vec::with_capacity(results.len());
    for (scaler, result) in scalers.iter().zip(results) {
        let decision = match result {
            Ok(Ok(decision)) => {
                if decision.is_scaling() {
                    counters.scaling_events_count.fetch_add(1, Ordering::Relaxed);
                }
                decision
            }
            Ok(Err(e)) => {
                counters.failed_checks.fetch_add(1, Ordering::Relaxed);
                warn!("Scaling check for '{}' failed: {}", scaler.connection_id(), e);
                ScalingDecision::none(scaler.connection_id(), scaler.last_known_size(), e.to_string())
            }
            Err(join_error) => {
                counters.failed_checks.fetch_add(1, Ordering::Relaxed);
                error!("Scaling check for '{}' aborted: {}", scaler.connection_id(), join_error);
                ScalingDecision::none(
                    scaler.connection_id(),
                    scaler.last_known_size(),
                    format!("scaling check aborted: {}", join_error),
                )
            }
        };
        decisions.push(decision);
    }

    counters.check_count.fetch_add(1, Ordering::Relaxed);
    *counters.last_run_at.lock() = Some(Utc::now());
    decisions
}
