//! Pool configuration types and builders

use crate::error::{PoolError, PoolResult};
use serde::{Deserialize, Serialize};
use service_builder::builder;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Configuration for one pooled DSN
#[derive(Debug, Clone, Serialize, Deserialize)]
#[builder]
pub struct PoolConfig {
    /// Connections created eagerly by `connect()`; idle eviction never goes below this
    #[builder(default = "2", getter)]
    pub min_pool_size: usize,

    /// Hard ceiling on live connections
    #[builder(default = "10", getter)]
    pub max_pool_size: usize,

    /// Idle connections unused for longer than this are closed by the sweep
    #[builder(default = "Duration::from_secs(600)", getter)]
    pub idle_timeout: Duration,

    /// How often the idle sweep runs
    #[builder(default = "Duration::from_secs(60)", getter)]
    pub cleanup_interval: Duration,

    /// Give up waiting in the queue after this long (None = wait indefinitely)
    #[builder(default = "None", getter)]
    pub acquire_timeout: Option<Duration>,

    /// Reject acquires once this many callers are queued (None = unbounded)
    #[builder(default = "None", getter)]
    pub max_queue_depth: Option<usize>,

    /// Statement used by `health_check()`
    #[builder(default = "\"SELECT 1\".to_string()", getter)]
    pub health_check_query: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_pool_size: 2,
            max_pool_size: 10,
            idle_timeout: Duration::from_secs(600), // 10 minutes
            cleanup_interval: Duration::from_secs(60),
            acquire_timeout: None,
            max_queue_depth: None,
            health_check_query: "SELECT 1".to_string(),
        }
    }
}

impl PoolConfig {
    /// Load the configuration for `dsn` from `ERP_POOL_<DSN>_*` variables,
    /// falling back to defaults for anything unset
    pub fn from_env(dsn: &str) -> PoolResult<Self> {
        let mut config = Self::default();
        let prefix = format!("ERP_POOL_{}", env_segment(dsn));

        if let Some(v) = read_env(&format!("{}_MIN_SIZE", prefix), "non-negative integer")? {
            config.min_pool_size = v;
        }
        if let Some(v) = read_env(&format!("{}_MAX_SIZE", prefix), "positive integer")? {
            config.max_pool_size = v;
        }
        if let Some(ms) = read_env::<u64>(&format!("{}_IDLE_TIMEOUT_MS", prefix), "milliseconds")? {
            config.idle_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) =
            read_env::<u64>(&format!("{}_ACQUIRE_TIMEOUT_MS", prefix), "milliseconds")?
        {
            config.acquire_timeout = Some(Duration::from_millis(ms));
        }
        if let Some(v) = read_env(&format!("{}_MAX_QUEUE_DEPTH", prefix), "positive integer")? {
            config.max_queue_depth = Some(v);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> PoolResult<()> {
        if self.max_pool_size == 0 {
            return Err(PoolError::configuration("max_pool_size must be at least 1"));
        }
        if self.min_pool_size > self.max_pool_size {
            return Err(PoolError::configuration(format!(
                "min_pool_size ({}) exceeds max_pool_size ({})",
                self.min_pool_size, self.max_pool_size
            )));
        }
        if self.cleanup_interval.is_zero() {
            return Err(PoolError::configuration("cleanup_interval must be non-zero"));
        }
        if self.max_queue_depth == Some(0) {
            return Err(PoolError::configuration(
                "max_queue_depth must be at least 1 when set",
            ));
        }
        Ok(())
    }
}

impl PoolConfigBuilder {
    /// Create a testing configuration with a small pool and fast sweeps
    pub fn testing() -> Self {
        PoolConfigBuilder::new()
            .min_pool_size(1)
            .max_pool_size(4)
            .idle_timeout(Duration::from_secs(5))
            .cleanup_interval(Duration::from_secs(1))
    }
}

/// Normalize a DSN into an environment variable segment (`erp-main` -> `ERP_MAIN`)
pub fn env_segment(dsn: &str) -> String {
    dsn.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

fn read_env<T: FromStr>(var: &str, expected: &str) -> PoolResult<Option<T>> {
    match env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| PoolError::InvalidEnvVar {
                var: var.to_string(),
                value: raw,
                expected: expected.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_pool_config() {
        let config = PoolConfig::default();
        assert_eq!(config.min_pool_size, 2);
        assert_eq!(config.max_pool_size, 10);
        assert_eq!(config.cleanup_interval, Duration::from_secs(60));
        assert!(config.acquire_timeout.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_pool_config_builder() {
        let config = PoolConfigBuilder::new()
            .max_pool_size(20)
            .max_queue_depth(Some(50))
            .build()
            .expect("Failed to build config");

        assert_eq!(*config.get_max_pool_size(), 20);
        assert_eq!(*config.get_min_pool_size(), 2); // Default
        assert_eq!(*config.get_max_queue_depth(), Some(50));
    }

    #[test]
    fn test_validation_rejects_inverted_bounds() {
        let config = PoolConfig {
            min_pool_size: 5,
            max_pool_size: 3,
            ..PoolConfig::default()
        };
        assert!(matches!(config.validate(), Err(PoolError::Configuration { .. })));
    }

    #[test]
    fn test_env_segment() {
        assert_eq!(env_segment("erp-main.prod"), "ERP_MAIN_PROD");
    }

    #[test]
    fn test_from_env_overrides() {
        env::set_var("ERP_POOL_CFG_TEST_A_MIN_SIZE", "3");
        env::set_var("ERP_POOL_CFG_TEST_A_MAX_SIZE", "12");
        env::set_var("ERP_POOL_CFG_TEST_A_ACQUIRE_TIMEOUT_MS", "2500");

        let config = PoolConfig::from_env("cfg-test-a").unwrap();
        assert_eq!(config.min_pool_size, 3);
        assert_eq!(config.max_pool_size, 12);
        assert_eq!(config.acquire_timeout, Some(Duration::from_millis(2500)));
        assert_eq!(config.idle_timeout, Duration::from_secs(600));
    }

    #[test]
    fn test_from_env_invalid_value() {
        env::set_var("ERP_POOL_CFG_TEST_B_MAX_SIZE", "lots");

        let err = PoolConfig::from_env("cfg-test-b").unwrap_err();
        assert!(matches!(err, PoolError::InvalidEnvVar { ref var, .. } if var == "ERP_POOL_CFG_TEST_B_MAX_SIZE"));
    }
}
