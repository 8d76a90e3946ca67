//! # erpgate-pool
//!
//! A dynamically resizable connection pool for legacy ERP database backends.
//!
//! The pool lends connections through RAII guards, queues callers in FIFO
//! order once every connection is busy, sweeps idle connections in the
//! background, and exposes occupancy metrics plus a runtime resize operation
//! through [`ScalablePool`] so an autoscaler can drive it.
//!
//! ```rust,no_run
//! use erpgate_pool::{PoolConfig, PooledConnection, ConnectionFactory};
//! use std::sync::Arc;
//!
//! # async fn example(factory: Arc<dyn ConnectionFactory>) -> erpgate_pool::PoolResult<()> {
//! let pool = PooledConnection::new("erp-main", PoolConfig::from_env("erp-main")?, factory)?;
//! pool.connect().await?;
//!
//! let rows = pool.query("SELECT ITEMNO FROM ICITEM").await?;
//! println!("{} items", rows.len());
//!
//! pool.resize_pool(6).await?;
//! pool.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod health;
pub mod pool;
pub mod scalable;
pub mod statistics;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::{env_segment, PoolConfig, PoolConfigBuilder};
pub use connection::{ConnectionFactory, DatabaseConnection, DatabaseValue, ParamType, QueryParam, Row};
pub use error::{PoolError, PoolResult};
pub use health::{HealthStatus, PoolHealthReport, Severity};
pub use pool::{PoolGuard, PooledConnection};
pub use scalable::ScalablePool;
pub use statistics::{ExtendedPoolStats, PoolMetrics, WaitTimeWindow, WAIT_SAMPLE_WINDOW};
