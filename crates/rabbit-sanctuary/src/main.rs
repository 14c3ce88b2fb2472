use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rabbit_sanctuary::{Rabbit, Sanctuary, config::Config, utils::describe_duration};

#[derive(Parser)]
#[command(name = "rabbit-sanctuary")]
#[command(version)]
#[command(about = "Keeps a set of background jobs running forever, each in its own process")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,

    /// Delay before retrying a failed rabbit, e.g. "30s" or "5m" (overrides config file)
    #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
    retry_delay: Option<Duration>,

    /// Time limit for a single run (overrides config file)
    #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
    run_timeout: Option<Duration>,

    /// Program used to start each rabbit, e.g. an interpreter (overrides config file)
    #[arg(short = 'l', long, value_name = "PROGRAM")]
    launcher: Option<PathBuf>,

    /// Rabbits to run in addition to those listed in the config file
    #[arg(value_name = "RABBIT")]
    rabbits: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_filter = format!(
        "rabbit_sanctuary={level},atomic_file_store={level}",
        level = cli.log_level
    );
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Rabbit Sanctuary v{}", env!("CARGO_PKG_VERSION"));

    let mut config = Config::load_from_file(&cli.config)?;
    info!("Configuration loaded from: {}", cli.config);

    // Override config with CLI arguments
    if let Some(retry_delay) = cli.retry_delay {
        config.sanctuary.retry_delay = retry_delay;
    }
    if let Some(run_timeout) = cli.run_timeout {
        config.sanctuary.run_timeout = run_timeout;
    }
    if let Some(launcher) = cli.launcher {
        config.worker.launcher = Some(launcher);
    }
    config.rabbits.extend(cli.rabbits);
    config.validate()?;

    info!(
        "Retry delay {}, run timeout {}",
        describe_duration(&config.sanctuary.retry_delay),
        describe_duration(&config.sanctuary.run_timeout)
    );

    let writer = config.storage.scratch_writer().await?;
    info!("Scratch directory ready at {:?}", writer.scratch_parent());

    let sanctuary = Sanctuary::with_process_runner(&config);
    if config.rabbits.is_empty() {
        warn!("No rabbits configured; add some to {} or pass them as arguments", cli.config);
    }
    sanctuary.register(config.rabbits.iter().map(Rabbit::from));
    info!("Sanctuary running with {} rabbit(s)", sanctuary.snapshot().known.len());

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    sanctuary.dump_status();
    sanctuary.shutdown().await;

    Ok(())
}
