//! Resizing contract consumed by the autoscaler

use crate::error::PoolResult;
use crate::statistics::PoolMetrics;
use async_trait::async_trait;

/// A pool that can report occupancy and be resized at runtime
#[async_trait]
pub trait ScalablePool: Send + Sync {
    /// Point-in-time occupancy snapshot
    fn pool_metrics(&self) -> PoolMetrics;

    /// Grow or shrink to `new_size`; sizes outside [`size_bounds`](Self::size_bounds) are rejected
    async fn resize_pool(&self, new_size: usize) -> PoolResult<()>;

    /// Inclusive `(min, max)` the pool accepts
    fn size_bounds(&self) -> (usize, usize);
}
