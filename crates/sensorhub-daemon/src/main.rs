//! Sensor Hub Daemon
//!
//! Samples the sensors described in a configuration file and periodically
//! writes the time-ordered log to the console and/or a file.

mod config;
mod output;

use anyhow::{bail, Context, Result};
use clap::Parser;
use sensorhub_core::{SampleAggregator, SensorHub, Sink};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::Config;
use output::{ConsoleSink, FileSink, Tee};

#[derive(Parser, Debug)]
#[command(name = "sensorhubd")]
#[command(about = "Samples simulated sensors into a time-ordered log")]
#[command(version)]
struct Cli {
    /// Sensor configuration file (TOML)
    config: PathBuf,

    /// Number of drain cycles to run (overrides `duration` from the config)
    #[arg(short = 'n', long)]
    iterations: Option<u64>,

    /// Append samples to this file (overrides `output.file` from the config)
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Do not print samples to stdout
    #[arg(short, long)]
    quiet: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let program_start = Instant::now();
    let cli = Cli::parse();

    // Setup logging; stdout is reserved for samples
    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.parse()?))
        .init();

    // Load configuration
    let config = Config::load(&cli.config).context("Failed to load configuration")?;
    info!("Loaded configuration from: {}", cli.config.display());

    let aggregator = Arc::new(SampleAggregator::new(program_start));
    let mut hub = SensorHub::new(Arc::clone(&aggregator));
    for descriptor in config.descriptors() {
        let name = descriptor.name.clone();
        hub.create_sensor(descriptor)
            .with_context(|| format!("Failed to create sensor '{}'", name))?;
    }
    if hub.is_empty() {
        bail!("No valid sensors in {}", cli.config.display());
    }
    for sensor in hub.sensors() {
        info!(
            "Sensor '{}': {} every {:?}",
            sensor.name(),
            sensor.discipline(),
            sensor.interval()
        );
    }

    let mut sink = build_sink(&cli, &config)?;
    let cycles = cli.iterations.or_else(|| config.run_cycles());
    match cycles {
        Some(n) => info!("Running for {} drain cycles", n),
        None => info!("Running until interrupted"),
    }

    hub.start().context("Failed to start sensor hub")?;
    let outcome = run(&aggregator, &mut sink, config.drain_period(), cycles).await;

    // Joining sensor threads blocks, keep it off the runtime workers
    let hub = tokio::task::spawn_blocking(move || {
        hub.stop();
        hub
    })
    .await
    .context("Sensor hub shutdown task failed")?;
    drop(hub);

    // Samples forwarded during shutdown
    aggregator
        .flush_into(&mut sink)
        .context("Failed to write final samples")?;

    let stats = aggregator.stats();
    info!(
        "Run finished: {} samples queued, {} written",
        stats.queued, stats.drained
    );

    outcome
}

/// Builds the output sink from CLI flags and configuration.
fn build_sink(cli: &Cli, config: &Config) -> Result<Tee> {
    let mut sink = Tee::new();
    if config.output.console && !cli.quiet {
        sink.push(Box::new(ConsoleSink));
    }
    if let Some(path) = cli.log_file.as_ref().or(config.output.file.as_ref()) {
        let file = FileSink::open(path)
            .with_context(|| format!("Failed to open log file {}", path.display()))?;
        sink.push(Box::new(file));
    }
    if sink.is_empty() {
        warn!("No output configured, samples will be discarded");
    }
    Ok(sink)
}

/// Drains the aggregator every `period` until `cycles` drains have run or a
/// termination signal arrives.
async fn run(
    aggregator: &SampleAggregator,
    sink: &mut dyn Sink,
    period: Duration,
    cycles: Option<u64>,
) -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    let mut completed: u64 = 0;

    loop {
        if cycles.is_some_and(|n| completed >= n) {
            break;
        }
        tokio::select! {
            _ = ticker.tick() => {
                completed += 1;
                aggregator
                    .flush_into(&mut *sink)
                    .context("Failed to write samples")?;
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
                break;
            }
            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down");
                break;
            }
        }
    }

    Ok(())
}
