//! Autoscaler and worker configuration

use crate::error::{ScalerError, ScalerResult};
use crate::history::HISTORY_RETENTION;
use erpgate_pool::env_segment;
use serde::{Deserialize, Serialize};
use service_builder::builder;
use std::env;
use std::str::FromStr;
use std::time::Duration;

const ENV_PREFIX: &str = "POOL_SCALER";

/// Scaling policy for one pool
#[derive(Debug, Clone, Serialize, Deserialize)]
#[builder]
pub struct PoolScalerConfig {
    #[builder(default = "2", getter)]
    pub min_pool_size: usize,

    #[builder(default = "10", getter)]
    pub max_pool_size: usize,

    /// Utilization above which the pool counts as busy (0..1)
    #[builder(default = "0.85", getter)]
    pub scale_up_threshold: f64,

    /// Utilization below which the pool counts as underused (0..1)
    #[builder(default = "0.30", getter)]
    pub scale_down_threshold: f64,

    #[builder(default = "1.5", getter)]
    pub scale_up_factor: f64,

    #[builder(default = "0.7", getter)]
    pub scale_down_factor: f64,

    /// How long utilization must stay high before growing
    #[builder(default = "Duration::from_secs(300)", getter)]
    pub scale_up_duration: Duration,

    /// How long utilization must stay low before shrinking
    #[builder(default = "Duration::from_secs(900)", getter)]
    pub scale_down_duration: Duration,

    /// Minimum time between two executed scaling actions
    #[builder(default = "Duration::from_secs(300)", getter)]
    pub cooldown_period: Duration,

    #[builder(default = "10", getter)]
    pub queue_length_threshold: usize,

    #[builder(default = "Duration::from_millis(500)", getter)]
    pub avg_wait_time_threshold: Duration,

    /// Idle ratio above which the pool counts as oversized (0..1)
    #[builder(default = "0.7", getter)]
    pub idle_threshold: f64,

    #[builder(default = "true", getter)]
    pub enabled: bool,
}

impl Default for PoolScalerConfig {
    fn default() -> Self {
        Self {
            min_pool_size: 2,
            max_pool_size: 10,
            scale_up_threshold: 0.85,
            scale_down_threshold: 0.30,
            scale_up_factor: 1.5,
            scale_down_factor: 0.7,
            scale_up_duration: Duration::from_secs(300),   // 5 minutes
            scale_down_duration: Duration::from_secs(900), // 15 minutes
            cooldown_period: Duration::from_secs(300),
            queue_length_threshold: 10,
            avg_wait_time_threshold: Duration::from_millis(500),
            idle_threshold: 0.7,
            enabled: true,
        }
    }
}

impl PoolScalerConfig {
    /// Load the policy for `dsn`. Each key is read from
    /// `POOL_SCALER_<DSN>_<KEY>`, then `POOL_SCALER_<KEY>`, then the default.
    pub fn from_env(dsn: &str) -> ScalerResult<Self> {
        let source = EnvSource::for_dsn(dsn);
        let mut config = Self::default();

        if let Some(v) = source.read("MIN_SIZE", "non-negative integer")? {
            config.min_pool_size = v;
        }
        if let Some(v) = source.read("MAX_SIZE", "positive integer")? {
            config.max_pool_size = v;
        }
        if let Some(v) = source.read("SCALE_UP_THRESHOLD", "ratio between 0 and 1")? {
            config.scale_up_threshold = v;
        }
        if let Some(v) = source.read("SCALE_DOWN_THRESHOLD", "ratio between 0 and 1")? {
            config.scale_down_threshold = v;
        }
        if let Some(v) = source.read("SCALE_UP_FACTOR", "factor greater than 1")? {
            config.scale_up_factor = v;
        }
        if let Some(v) = source.read("SCALE_DOWN_FACTOR", "factor between 0 and 1")? {
            config.scale_down_factor = v;
        }
        if let Some(d) = source.read_millis("SCALE_UP_DURATION_MS")? {
            config.scale_up_duration = d;
        }
        if let Some(d) = source.read_millis("SCALE_DOWN_DURATION_MS")? {
            config.scale_down_duration = d;
        }
        if let Some(d) = source.read_millis("COOLDOWN_PERIOD_MS")? {
            config.cooldown_period = d;
        }
        if let Some(v) = source.read("QUEUE_LENGTH_THRESHOLD", "non-negative integer")? {
            config.queue_length_threshold = v;
        }
        if let Some(d) = source.read_millis("AVG_WAIT_TIME_THRESHOLD_MS")? {
            config.avg_wait_time_threshold = d;
        }
        if let Some(v) = source.read("IDLE_THRESHOLD", "ratio between 0 and 1")? {
            config.idle_threshold = v;
        }
        if let Some(v) = source.read_bool("ENABLED")? {
            config.enabled = v;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ScalerResult<()> {
        if self.max_pool_size == 0 {
            return Err(ScalerError::configuration("max_pool_size must be at least 1"));
        }
        if self.min_pool_size > self.max_pool_size {
            return Err(ScalerError::configuration(format!(
                "min_pool_size ({}) exceeds max_pool_size ({})",
                self.min_pool_size, self.max_pool_size
            )));
        }
        for (name, value) in [
            ("scale_up_threshold", self.scale_up_threshold),
            ("scale_down_threshold", self.scale_down_threshold),
            ("idle_threshold", self.idle_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ScalerError::configuration(format!(
                    "{} must be between 0 and 1, got {}",
                    name, value
                )));
            }
        }
        if self.scale_down_threshold >= self.scale_up_threshold {
            return Err(ScalerError::configuration(
                "scale_down_threshold must be below scale_up_threshold",
            ));
        }
        if self.scale_up_factor <= 1.0 {
            return Err(ScalerError::configuration("scale_up_factor must be greater than 1"));
        }
        if !(self.scale_down_factor > 0.0 && self.scale_down_factor < 1.0) {
            return Err(ScalerError::configuration(
                "scale_down_factor must be between 0 and 1 (exclusive)",
            ));
        }
        if self.scale_up_duration.is_zero() || self.scale_down_duration.is_zero() {
            return Err(ScalerError::configuration("scaling windows must be non-zero"));
        }
        for (name, window) in [
            ("scale_up_duration", self.scale_up_duration),
            ("scale_down_duration", self.scale_down_duration),
        ] {
            if window > HISTORY_RETENTION {
                return Err(ScalerError::configuration(format!(
                    "{} ({:?}) exceeds the metrics history retention of {:?}",
                    name, window, HISTORY_RETENTION
                )));
            }
        }
        Ok(())
    }

    /// Same policy with its size bounds intersected with `[pool_min, pool_max]`
    pub fn narrowed_to(&self, pool_min: usize, pool_max: usize) -> ScalerResult<Self> {
        let min = self.min_pool_size.max(pool_min);
        let max = self.max_pool_size.min(pool_max);
        if min > max {
            return Err(ScalerError::configuration(format!(
                "scaling bounds [{}, {}] do not overlap pool bounds [{}, {}]",
                self.min_pool_size, self.max_pool_size, pool_min, pool_max
            )));
        }
        Ok(Self {
            min_pool_size: min,
            max_pool_size: max,
            ..self.clone()
        })
    }
}

impl PoolScalerConfigBuilder {
    /// Short windows and no cooldown for tests and simulations
    pub fn testing() -> Self {
        PoolScalerConfigBuilder::new()
            .min_pool_size(1)
            .max_pool_size(8)
            .scale_up_duration(Duration::from_secs(10))
            .scale_down_duration(Duration::from_secs(30))
            .cooldown_period(Duration::ZERO)
            .queue_length_threshold(4)
            .avg_wait_time_threshold(Duration::from_millis(100))
    }
}

/// Per-connection deviations from the registry's base policy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolScalerOverrides {
    pub min_pool_size: Option<usize>,
    pub max_pool_size: Option<usize>,
    pub scale_up_threshold: Option<f64>,
    pub scale_down_threshold: Option<f64>,
    pub scale_up_factor: Option<f64>,
    pub scale_down_factor: Option<f64>,
    pub scale_up_duration: Option<Duration>,
    pub scale_down_duration: Option<Duration>,
    pub cooldown_period: Option<Duration>,
    pub queue_length_threshold: Option<usize>,
    pub avg_wait_time_threshold: Option<Duration>,
    pub idle_threshold: Option<f64>,
    pub enabled: Option<bool>,
}

impl PoolScalerOverrides {
    /// Base policy with every set override applied
    pub fn apply(&self, base: &PoolScalerConfig) -> PoolScalerConfig {
        PoolScalerConfig {
            min_pool_size: self.min_pool_size.unwrap_or(base.min_pool_size),
            max_pool_size: self.max_pool_size.unwrap_or(base.max_pool_size),
            scale_up_threshold: self.scale_up_threshold.unwrap_or(base.scale_up_threshold),
            scale_down_threshold: self.scale_down_threshold.unwrap_or(base.scale_down_threshold),
            scale_up_factor: self.scale_up_factor.unwrap_or(base.scale_up_factor),
            scale_down_factor: self.scale_down_factor.unwrap_or(base.scale_down_factor),
            scale_up_duration: self.scale_up_duration.unwrap_or(base.scale_up_duration),
            scale_down_duration: self.scale_down_duration.unwrap_or(base.scale_down_duration),
            cooldown_period: self.cooldown_period.unwrap_or(base.cooldown_period),
            queue_length_threshold: self
                .queue_length_threshold
                .unwrap_or(base.queue_length_threshold),
            avg_wait_time_threshold: self
                .avg_wait_time_threshold
                .unwrap_or(base.avg_wait_time_threshold),
            idle_threshold: self.idle_threshold.unwrap_or(base.idle_threshold),
            enabled: self.enabled.unwrap_or(base.enabled),
        }
    }
}

/// Settings for the periodic scaling worker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[builder]
pub struct WorkerConfig {
    #[builder(default = "Duration::from_millis(60_000)", getter)]
    pub check_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_millis(60_000),
        }
    }
}

impl WorkerConfig {
    /// Read `POOL_SCALER_CHECK_INTERVAL_MS`
    pub fn from_env() -> ScalerResult<Self> {
        let var = format!("{}_CHECK_INTERVAL_MS", ENV_PREFIX);
        let mut config = Self::default();
        if let Some(ms) = parse_var::<u64>(&var, "milliseconds")? {
            if ms == 0 {
                return Err(ScalerError::InvalidEnvVar {
                    var,
                    value: ms.to_string(),
                    expected: "positive milliseconds".to_string(),
                });
            }
            config.check_interval = Duration::from_millis(ms);
        }
        Ok(config)
    }
}

/// Looks up `POOL_SCALER_<DSN>_<KEY>` before `POOL_SCALER_<KEY>`
struct EnvSource {
    scoped_prefix: String,
}

impl EnvSource {
    fn for_dsn(dsn: &str) -> Self {
        Self {
            scoped_prefix: format!("{}_{}", ENV_PREFIX, env_segment(dsn)),
        }
    }

    fn read<T: FromStr>(&self, key: &str, expected: &str) -> ScalerResult<Option<T>> {
        let scoped = format!("{}_{}", self.scoped_prefix, key);
        match parse_var(&scoped, expected)? {
            Some(v) => Ok(Some(v)),
            None => parse_var(&format!("{}_{}", ENV_PREFIX, key), expected),
        }
    }

    fn read_millis(&self, key: &str) -> ScalerResult<Option<Duration>> {
        Ok(self.read::<u64>(key, "milliseconds")?.map(Duration::from_millis))
    }

    fn read_bool(&self, key: &str) -> ScalerResult<Option<bool>> {
        Ok(self.read::<Flag>(key, "true/false")?.map(|f| f.0))
    }
}

/// Boolean accepting `true/false`, `1/0`, `yes/no`, `on/off`
struct Flag(bool);

impl FromStr for Flag {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Flag(true)),
            "false" | "0" | "no" | "off" => Ok(Flag(false)),
            _ => Err(()),
        }
    }
}

fn parse_var<T: FromStr>(var: &str, expected: &str) -> ScalerResult<Option<T>> {
    match env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ScalerError::InvalidEnvVar {
                var: var.to_string(),
                value: raw,
                expected: expected.to_string(),
            }),
        Err(_) => Ok(None),
    }
}
