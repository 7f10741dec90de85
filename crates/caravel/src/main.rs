//! Caravel: cross-backend replication workers for S3-compatible object storage.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use caravel_core::config::{Config, LogFormat};
use caravel_engine::publisher::StatusPublisher;
use caravel_engine::task::TaskContext;
use caravel_engine::worker::Worker;
use caravel_gateway::bus::{BusClient, LogConsumer, LogProducer};
use caravel_gateway::retry::RetryPolicy;
use caravel_gateway::source::SourceClient;
use caravel_gateway::target::TargetPool;
use tokio_util::sync::CancellationToken;

mod cli;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run_workers(args).await,
        Commands::Version => {
            println!("caravel {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn run_workers(args: cli::RunArgs) -> Result<()> {
    let mut config = load_config(&args.config)?;
    if let Some(site) = args.site {
        config.worker.site = site;
    }
    config.validate().context("invalid configuration")?;

    init_logging(&config)?;
    caravel_engine::publisher::init_metrics();

    let source = SourceClient::new(config.source.endpoint.clone());
    let targets = TargetPool::new(config.destination.hosts.clone());
    let bus = Arc::new(BusClient::new(
        config.bus.endpoint.clone(),
        config.bus.group.clone(),
        config.bus.poll_timeout_ms,
    ));

    // An unreachable collaborator at boot is an unrecoverable startup error.
    source.healthcheck().await.context("source service unreachable at boot")?;
    targets.healthcheck().await.context("destination service unreachable at boot")?;
    bus.healthcheck().await.context("log bus unreachable at boot")?;

    let producer: Arc<dyn LogProducer> = bus.clone();
    let publisher = StatusPublisher::new(
        producer,
        config.bus.status_topic.clone(),
        config.bus.metrics_topic.clone(),
        config.worker.site.clone(),
    );

    let ctx = Arc::new(TaskContext {
        source,
        targets,
        publisher,
        retry: RetryPolicy::from_config(&config.retry),
        site: config.worker.site.clone(),
        storage_type: config.worker.storage_type.clone(),
    });

    let cancel = CancellationToken::new();
    let mut workers = tokio::task::JoinSet::new();
    for _ in 0..args.workers.max(1) {
        let consumer: Arc<dyn LogConsumer> = bus.clone();
        let worker =
            Worker::new(consumer, ctx.clone(), config.worker.concurrency, cancel.clone());
        workers.spawn(async move { worker.run().await });
    }

    info!(
        site = %config.worker.site,
        workers = args.workers.max(1),
        concurrency = config.worker.concurrency,
        topic = %config.bus.topic,
        "caravel ready"
    );

    shutdown_signal().await;
    cancel.cancel();
    while workers.join_next().await.is_some() {}

    info!("shutdown complete");
    Ok(())
}

fn load_config(path: &Option<PathBuf>) -> Result<Config> {
    match path {
        Some(p) => Config::from_file(p)
            .with_context(|| format!("failed to load config file: {}", p.display())),
        None => {
            let default_paths =
                [PathBuf::from("caravel.toml"), PathBuf::from("/etc/caravel/caravel.toml")];

            for p in &default_paths {
                if p.exists() {
                    return Config::from_file(p)
                        .with_context(|| format!("failed to load config file: {}", p.display()));
                }
            }

            Ok(Config::default())
        }
    }
}

fn init_logging(config: &Config) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    let fmt_layer = tracing_subscriber::fmt::layer();

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry().with(filter).with(fmt_layer.json()).init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry().with(filter).with(fmt_layer).init();
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown");
        }
    }
}
