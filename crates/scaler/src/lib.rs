//! # erpgate-scaler
//!
//! Autoscaling for erpgate connection pools.
//!
//! A [`PoolScaler`] watches one pool through the [`ScalablePool`](erpgate_pool::ScalablePool)
//! trait and resizes it once utilization, queueing or wait-time triggers have
//! held for their full window. [`PoolScalerManager`] keeps one autoscaler per
//! connection identifier and [`PoolScalerWorker`] checks them all on a fixed
//! interval.
//!
//! ```rust,no_run
//! use erpgate_scaler::{PoolScalerConfig, PoolScalerManager, PoolScalerWorker, WorkerConfig};
//! use erpgate_pool::PooledConnection;
//! use std::sync::Arc;
//!
//! # async fn example(pool: Arc<PooledConnection>) -> erpgate_scaler::ScalerResult<()> {
//! let manager = Arc::new(PoolScalerManager::new(PoolScalerConfig::from_env("erp-main")?));
//! manager.register_connection("erp-main", pool, None).await?;
//! manager.start_all().await;
//!
//! let worker = PoolScalerWorker::new(manager.clone(), WorkerConfig::from_env()?);
//! worker.start();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod history;
pub mod manager;
pub mod scaler;
pub mod sink;
pub mod types;
pub mod worker;

pub use config::{PoolScalerConfig, PoolScalerConfigBuilder, PoolScalerOverrides, WorkerConfig, WorkerConfigBuilder};
pub use error::{ScalerError, ScalerResult};
pub use history::{HISTORY_RETENTION, MAX_SCALE_EVENTS};
pub use manager::PoolScalerManager;
pub use scaler::PoolScaler;
pub use sink::{MetricsSink, RecordingMetricsSink, TracingMetricsSink};
pub use types::{MetricHistory, PoolScalerStatus, ScaleAction, ScaleEvent, ScalingCondition, ScalingDecision};
pub use worker::{PoolScalerWorker, WorkerStats};
