mod commands;
mod logging;

use clap::{Args, Parser, Subcommand};
use commands::{config, simulate};
use logging::{init_logging, LoggingConfig};

#[derive(Parser)]
#[command(name = "erpgate")]
#[command(about = "Dynamic ERP connection pool tooling")]
#[command(version)]
struct Cli {
    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the effective pool, scaler and worker configuration for a DSN
    Config {
        /// Connection identifier used to resolve environment overrides
        dsn: String,
    },

    /// Drive a mock-backed pool with bursty load and let the autoscaler react
    Simulate(SimulateArgs),
}

#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    /// Connection identifier for the simulated pool
    #[arg(long, default_value = "erp-sim")]
    pub dsn: String,

    /// Total run time in seconds
    #[arg(long, default_value_t = 60)]
    pub duration_secs: u64,

    /// Concurrent clients during the busy phase
    #[arg(long, default_value_t = 24)]
    pub clients: usize,

    /// Fraction of the run spent under load before going quiet (0..1)
    #[arg(long, default_value_t = 0.5)]
    pub busy_fraction: f64,

    /// Mean simulated query latency in milliseconds
    #[arg(long, default_value_t = 40)]
    pub query_latency_ms: u64,

    #[arg(long, default_value_t = 2)]
    pub min_size: usize,

    #[arg(long, default_value_t = 16)]
    pub max_size: usize,

    /// Scaling check interval in milliseconds
    #[arg(long, default_value_t = 1000)]
    pub check_interval_ms: u64,

    /// Print the final report as JSON
    #[arg(long)]
    pub json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let logging = if cli.verbose {
        LoggingConfig::verbose()
    } else {
        match cli.command {
            Commands::Simulate(ref args) if args.json => LoggingConfig::quiet(),
            _ => LoggingConfig::default(),
        }
    };
    init_logging(&logging.with_json(cli.log_json))?;

    match cli.command {
        Commands::Config { dsn } => config::run(&dsn)?,
        Commands::Simulate(args) => simulate::run(args).await?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_simulate_arguments() {
        let cli = Cli::try_parse_from(["erpgate", "simulate", "--json", "--clients", "8"]).unwrap();
        match cli.command {
            Commands::Simulate(args) => {
                assert!(args.json);
                assert_eq!(args.clients, 8);
                assert_eq!(args.dsn, "erp-sim");
                assert_eq!(args.check_interval_ms, 1000);
            }
            _ => panic!("expected simulate command"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["erpgate", "config", "erp-main", "--verbose"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Config { ref dsn } if dsn == "erp-main"));
    }
}
