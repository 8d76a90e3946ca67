use crate::SimulateArgs;
use anyhow::{anyhow, bail, Context, Result};
use erpgate_pool::testing::MockConnectionFactory;
use erpgate_pool::{PoolConfigBuilder, PoolMetrics, PooledConnection};
use erpgate_scaler::{PoolScalerConfigBuilder, PoolScalerManager, PoolScalerWorker, WorkerConfigBuilder};
use rand::Rng;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, Instant};
use tracing::{info, warn};

#[derive(Debug, Serialize)]
struct Sample {
    elapsed_ms: u128,
    size: usize,
    active: usize,
    queue: usize,
    avg_wait_ms: f64,
}

impl Sample {
    fn new(started: Instant, metrics: &PoolMetrics) -> Self {
        Self {
            elapsed_ms: started.elapsed().as_millis(),
            size: metrics.current_size,
            active: metrics.active_connections,
            queue: metrics.queue_length,
            avg_wait_ms: metrics.avg_wait_time_ms,
        }
    }
}

pub async fn run(args: SimulateArgs) -> Result<()> {
    if !(0.0..=1.0).contains(&args.busy_fraction) {
        bail!("--busy-fraction must be between 0 and 1");
    }
    if args.check_interval_ms == 0 {
        bail!("--check-interval-ms must be positive");
    }

    let check_interval = Duration::from_millis(args.check_interval_ms);
    let run_time = Duration::from_secs(args.duration_secs);
    let busy_time = run_time.mul_f64(args.busy_fraction);

    let pool_config = PoolConfigBuilder::new()
        .min_pool_size(args.min_size)
        .max_pool_size(args.max_size)
        .idle_timeout(run_time)
        .cleanup_interval(check_interval * 5)
        .build()
        .map_err(|e| anyhow!("invalid pool configuration: {:?}", e))?;
    let factory = MockConnectionFactory::new().with_query_delay(Duration::from_millis(args.query_latency_ms));
    let pool = Arc::new(
        PooledConnection::new(args.dsn.clone(), pool_config, Arc::new(factory.clone()))
            .context("invalid pool configuration")?,
    );
    pool.connect().await.context("failed to connect simulated pool")?;

    // Windows scaled to the check interval so a short run still shows both directions
    let scaler_config = PoolScalerConfigBuilder::new()
        .min_pool_size(args.min_size)
        .max_pool_size(args.max_size)
        .scale_up_duration(check_interval * 3)
        .scale_down_duration(check_interval * 8)
        .cooldown_period(check_interval * 2)
        .queue_length_threshold(4)
        .avg_wait_time_threshold(Duration::from_millis(args.query_latency_ms.max(1) * 2))
        .build()
        .map_err(|e| anyhow!("invalid scaler configuration: {:?}", e))?;
    let worker_config = WorkerConfigBuilder::new()
        .check_interval(check_interval)
        .build()
        .map_err(|e| anyhow!("invalid worker configuration: {:?}", e))?;
    let manager = Arc::new(PoolScalerManager::new(scaler_config));
    let scaler = manager
        .register_connection(args.dsn.clone(), pool.clone(), None)
        .await
        .context("failed to register autoscaler")?;
    manager.start_all().await;

    let worker = PoolScalerWorker::new(manager.clone(), worker_config);
    worker.start();

    info!(
        "Simulating {} clients against '{}' for {:?} ({:?} busy)",
        args.clients, args.dsn, run_time, busy_time
    );

    let started = Instant::now();
    let busy_until = started + busy_time;
    let run_until = started + run_time;

    let mut clients = Vec::with_capacity(args.clients + 1);
    for client in 0..args.clients {
        clients.push(tokio::spawn(client_loop(pool.clone(), client, busy_until, args.query_latency_ms)));
    }
    // One client keeps a trickle going through the quiet phase
    clients.push(tokio::spawn(client_loop(
        pool.clone(),
        args.clients,
        run_until,
        args.query_latency_ms * 20,
    )));

    let mut timeline = Vec::new();
    let mut ticker = interval(check_interval);
    while Instant::now() < run_until {
        ticker.tick().await;
        timeline.push(Sample::new(started, &pool.pool_metrics()));
    }

    worker.stop();
    let mut failed_queries = 0;
    for client in clients {
        failed_queries += client.await.unwrap_or(0);
    }

    let stats = worker.stats();
    let status = scaler.status();
    let events = scaler.history(100);
    let peak = timeline.iter().map(|s| s.size).max().unwrap_or(0);
    pool.close().await?;

    if args.json {
        let report = json!({
            "dsn": args.dsn,
            "queries": factory.queries(),
            "failed_queries": failed_queries,
            "connections_created": factory.created(),
            "peak_size": peak,
            "worker": stats,
            "status": status,
            "events": events,
            "timeline": timeline,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("📊 Simulation of '{}'", args.dsn);
    println!("   Queries run:         {} ({} failed)", factory.queries(), failed_queries);
    println!("   Connections created: {}", factory.created());
    println!("   Peak pool size:      {}", peak);
    println!("   Final pool size:     {}", status.current_size);
    println!(
        "   Scaling checks:      {} ({} resizes, {} failed)",
        stats.check_count, stats.scaling_events_count, stats.failed_checks
    );
    println!();

    if events.is_empty() {
        println!("⚠️ No scaling events; try a longer --duration-secs or more --clients");
    } else {
        println!("   {:<6} {:>4} → {:<4} {}", "ACTION", "FROM", "TO", "REASON");
        for event in &events {
            let marker = if event.success { "✅" } else { "❌" };
            println!(
                "{} {:<6} {:>4} → {:<4} {}",
                marker, event.action, event.old_size, event.new_size, event.reason
            );
        }
    }

    Ok(())
}

/// Run queries until `until`, pausing up to `think_ms` between them.
/// Returns how many queries failed.
async fn client_loop(pool: Arc<PooledConnection>, client: usize, until: Instant, think_ms: u64) -> usize {
    let mut failures = 0;
    while Instant::now() < until {
        let sql = format!("SELECT ITEMNO, QTYONHAND FROM ICILOC WHERE CLIENT = {}", client);
        if let Err(e) = pool.query(&sql).await {
            warn!("Client {} query failed: {}", client, e);
            failures += 1;
        }
        let pause = rand::thread_rng().gen_range(0..=think_ms);
        tokio::time::sleep(Duration::from_millis(pause)).await;
    }
    failures
}
