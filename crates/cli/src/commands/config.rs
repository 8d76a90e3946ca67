use anyhow::{Context, Result};
use erpgate_pool::PoolConfig;
use erpgate_scaler::{PoolScalerConfig, WorkerConfig};
use serde_json::json;

/// Print the configuration the pool, autoscaler and worker would use for `dsn`
pub fn run(dsn: &str) -> Result<()> {
    let pool = PoolConfig::from_env(dsn).with_context(|| format!("invalid pool config for '{}'", dsn))?;
    let scaler =
        PoolScalerConfig::from_env(dsn).with_context(|| format!("invalid scaler config for '{}'", dsn))?;
    let worker = WorkerConfig::from_env().context("invalid worker config")?;

    let report = json!({
        "dsn": dsn,
        "pool": pool,
        "scaler": scaler,
        "worker": worker,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
