//! Registry of autoscalers keyed by connection identifier

use crate::config::{PoolScalerConfig, PoolScalerOverrides};
use crate::error::{ScalerError, ScalerResult};
use crate::scaler::PoolScaler;
use crate::sink::{MetricsSink, TracingMetricsSink};
use crate::types::PoolScalerStatus;
use erpgate_pool::ScalablePool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Owns one [`PoolScaler`] per registered connection
pub struct PoolScalerManager {
    base_config: PoolScalerConfig,
    sink: Arc<dyn MetricsSink>,
    scalers: RwLock<HashMap<String, Arc<PoolScaler>>>,
    running: AtomicBool,
}

impl PoolScalerManager {
    pub fn new(base_config: PoolScalerConfig) -> Self {
        Self {
            base_config,
            sink: Arc::new(TracingMetricsSink),
            scalers: RwLock::new(HashMap::new()),
            running: AtomicBool::new(false),
        }
    }

    /// Sink handed to every autoscaler registered afterwards
    pub fn with_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn base_config(&self) -> &PoolScalerConfig {
        &self.base_config
    }

    /// Build an autoscaler for `pool` from the base policy plus `overrides`.
    ///
    /// Registering an identifier twice keeps and returns the first autoscaler.
    pub async fn register_connection<S: Into<String>>(
        &self,
        connection_id: S,
        pool: Arc<dyn ScalablePool>,
        overrides: Option<PoolScalerOverrides>,
    ) -> ScalerResult<Arc<PoolScaler>> {
        let connection_id = connection_id.into();
        let mut scalers = self.scalers.write().await;

        if let Some(existing) = scalers.get(&connection_id) {
            warn!("Autoscaler for '{}' already registered", connection_id);
            return Ok(existing.clone());
        }

        let config = match overrides {
            Some(overrides) => overrides.apply(&self.base_config),
            None => self.base_config.clone(),
        };
        let scaler = Arc::new(
            PoolScaler::new(connection_id.clone(), pool, config)?.with_sink(self.sink.clone()),
        );
        if self.is_running() {
            scaler.start();
        }

        scalers.insert(connection_id.clone(), scaler.clone());
        info!("Registered autoscaler for '{}'", connection_id);
        Ok(scaler)
    }

    /// Stop and drop the autoscaler for `connection_id`
    pub async fn unregister_connection(&self, connection_id: &str) -> ScalerResult<()> {
        let removed = self.scalers.write().await.remove(connection_id);
        match removed {
            Some(scaler) => {
                scaler.stop();
                info!("Unregistered autoscaler for '{}'", connection_id);
                Ok(())
            }
            None => Err(ScalerError::UnknownConnection(connection_id.to_string())),
        }
    }

    pub async fn start_all(&self) {
        self.running.store(true, Ordering::SeqCst);
        let scalers = self.scalers.read().await;
        for scaler in scalers.values() {
            scaler.start();
        }
        info!("Started {} autoscalers", scalers.len());
    }

    pub async fn stop_all(&self) {
        self.running.store(false, Ordering::SeqCst);
        let scalers = self.scalers.read().await;
        for scaler in scalers.values() {
            scaler.stop();
        }
        info!("Stopped {} autoscalers", scalers.len());
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Registered identifiers, sorted
    pub async fn connection_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.scalers.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn get(&self, connection_id: &str) -> Option<Arc<PoolScaler>> {
        self.scalers.read().await.get(connection_id).cloned()
    }

    /// All registered autoscalers, sorted by identifier
    pub async fn scalers(&self) -> Vec<Arc<PoolScaler>> {
        let mut scalers: Vec<Arc<PoolScaler>> = self.scalers.read().await.values().cloned().collect();
        scalers.sort_by(|a, b| a.connection_id().cmp(b.connection_id()));
        scalers
    }

    pub async fn statuses(&self) -> Vec<PoolScalerStatus> {
        self.scalers().await.iter().map(|s| s.status()).collect()
    }

    pub async fn len(&self) -> usize {
        self.scalers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.scalers.read().await.is_empty()
    }
}

impl Default for PoolScalerManager {
    fn default() -> Self {
        Self::new(PoolScalerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use erpgate_pool::testing::MockConnectionFactory;
    use erpgate_pool::{PoolConfigBuilder, PooledConnection};

    fn pool(name: &str) -> Arc<PooledConnection> {
        let config = PoolConfigBuilder::testing()
            .min_pool_size(1)
            .max_pool_size(8)
            .build()
            .expect("Failed to build config");
        Arc::new(PooledConnection::new(name, config, Arc::new(MockConnectionFactory::new())).unwrap())
    }

    #[tokio::test]
    async fn test_register_and_unregister() {
        let manager = PoolScalerManager::default();
        let scaler = manager
            .register_connection("erp-b", pool("erp-b"), None)
            .await
            .unwrap();
        manager.register_connection("erp-a", pool("erp-a"), None).await.unwrap();

        assert_eq!(manager.connection_ids().await, vec!["erp-a", "erp-b"]);
        assert!(!scaler.is_running());

        manager.unregister_connection("erp-b").await.unwrap();
        assert_eq!(manager.len().await, 1);
        assert!(matches!(
            manager.unregister_connection("erp-b").await,
            Err(ScalerError::UnknownConnection(_))
        ));
    }

    #[tokio::test]
    async fn test_double_registration_returns_existing() {
        let manager = PoolScalerManager::default();
        let first = manager.register_connection("erp", pool("erp"), None).await.unwrap();
        let second = manager
            .register_connection(
                "erp",
                pool("erp"),
                Some(PoolScalerOverrides {
                    max_pool_size: Some(4),
                    ..Default::default()
                }),
            )
            .await
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(*second.config().get_max_pool_size(), 8);
    }

    #[tokio::test]
    async fn test_registration_while_running_starts_scaler() {
        let manager = PoolScalerManager::default();
        let early = manager.register_connection("early", pool("early"), None).await.unwrap();

        manager.start_all().await;
        assert!(early.is_running());

        let late = manager.register_connection("late", pool("late"), None).await.unwrap();
        assert!(late.is_running());

        manager.stop_all().await;
        assert!(!early.is_running());
        assert!(!late.is_running());
    }

    #[tokio::test]
    async fn test_overrides_and_invalid_config() {
        let manager = PoolScalerManager::default();
        let scaler = manager
            .register_connection(
                "tuned",
                pool("tuned"),
                Some(PoolScalerOverrides {
                    scale_up_threshold: Some(0.95),
                    ..Default::default()
                }),
            )
            .await
            .unwrap();
        assert_eq!(*scaler.config().get_scale_up_threshold(), 0.95);

        let rejected = manager
            .register_connection(
                "broken",
                pool("broken"),
                Some(PoolScalerOverrides {
                    scale_up_factor: Some(0.5),
                    ..Default::default()
                }),
            )
            .await;
        assert!(matches!(rejected, Err(ScalerError::Configuration { .. })));
        assert!(manager.get("broken").await.is_none());
    }

    #[tokio::test]
    async fn test_statuses() {
        let manager = PoolScalerManager::default();
        let erp = pool("erp");
        erp.connect().await.unwrap();
        manager.register_connection("erp", erp, None).await.unwrap();

        let statuses = manager.statuses().await;
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].connection_id, "erp");
        // Scaling minimum is narrowed up from the pool's 1 to the policy's 2
        assert_eq!(statuses[0].min_pool_size, 2);
        assert_eq!(statuses[0].current_size, 1);
    }
}
