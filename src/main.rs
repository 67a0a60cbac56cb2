use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use hostwatch::alerter::AlertManager;
use hostwatch::collector::HostCollector;
use hostwatch::config::Config;
use hostwatch::monitor::Monitor;
use hostwatch::query::SeriesQuery;
use hostwatch::sampler::Sampler;
use hostwatch::storage::Storage;
use hostwatch::api;

#[derive(Parser, Debug)]
#[command(name = "hostwatch", about = "Host metrics sampler, API and alerting")]
struct Cli {
    /// Path to configuration file; built-in defaults are used when omitted
    #[arg(short, long)]
    config: Option<String>,

    /// Validate config and exit
    #[arg(long)]
    validate: bool,

    /// Print version and exit
    #[arg(short, long)]
    version: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the sampler and HTTP API until interrupted (default)
    Serve,
    /// Probe the monitored URL and evaluate thresholds once, then exit
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.version {
        println!("hostwatch {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // Load configuration
    let config = match cli.config {
        Some(ref path) => Config::load(path)?,
        None => Config::default(),
    };

    if cli.validate {
        println!("Configuration is valid.");
        return Ok(());
    }

    // Initialize logging
    init_logging(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        hostname = %config.agent.hostname,
        "Starting hostwatch"
    );

    let result = match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Check => check(config).await,
    };

    if let Err(ref e) = result {
        error!(error = %e, "hostwatch terminated with error");
    }
    result
}

fn init_logging(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::new(&config.agent.log_level)
        });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();
}

async fn serve(config: Config) -> Result<()> {
    // Initialize storage
    let storage = Storage::new(&config.storage)?;
    let query = SeriesQuery::new(storage.clone());

    let shutdown = CancellationToken::new();

    // Spawn sampler task
    let source = HostCollector::new(&config.sampler);
    let sampler = Sampler::new(Box::new(source), storage, &config).spawn(shutdown.clone());

    // Wait for shutdown signal
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received shutdown signal, exiting"),
            Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
        }
        signal_token.cancel();
    });

    let served = api::serve(&config, query, shutdown.clone()).await;

    // The server can also exit on its own (e.g. bind failure)
    shutdown.cancel();
    if let Err(e) = sampler.await {
        error!(error = %e, "Sampler task failed");
    }

    served
}

async fn check(config: Config) -> Result<()> {
    let storage = Storage::new(&config.storage)?;
    let alerter = AlertManager::new(&config.alerting)?;
    let monitor = Monitor::new(&config, SeriesQuery::new(storage), alerter)?;

    let report = monitor.run().await;
    if let Some(ref health) = report.health {
        println!("Platform status: {} - {}", health.status, health.message);
    }
    match report.evaluation {
        Ok(ref eval) => println!("Threshold alerts: {}", eval.alerts().len()),
        Err(ref e) => println!("System metrics check failed: {}", e),
    }
    println!("Notifications sent: {}", report.notifications_sent);
    Ok(())
}
