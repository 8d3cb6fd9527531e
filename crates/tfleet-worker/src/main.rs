//! Transcoding worker binary.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tfleet_queue::{QueueConfig, RedisBroker, RedisEventBus};
use tfleet_storage::{StorageConfig, StorageContext};
use tfleet_worker::{shutdown_signal, Notifier, Supervisor, WorkerConfig};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    dotenvy::dotenv().ok();
    init_tracing();

    info!("Starting tfleet-worker");

    if let Err(e) = run().await {
        error!("Worker error: {:#}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}

fn init_tracing() {
    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("tfleet=info".parse().unwrap())
        .add_directive("aws_config=warn".parse().unwrap());

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

async fn run() -> anyhow::Result<()> {
    let config = WorkerConfig::from_env();
    let queue_config = QueueConfig::from_env();
    info!("Worker config: {:?}", config);

    if let Some(port) = config.metrics_port {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("Failed to install Prometheus exporter")?;
        info!("Metrics listening on {}", addr);
    }

    tokio::fs::create_dir_all(&config.work_dir)
        .await
        .with_context(|| format!("Failed to create work directory {}", config.work_dir))?;

    let storage = StorageContext::from_config(&StorageConfig::from_env())
        .await
        .context("Failed to create storage context")?
        .with_temp_dir(&config.work_dir);

    let bus = RedisEventBus::new(&queue_config.redis_url).context("Failed to create event bus")?;
    let http = reqwest::Client::builder()
        .timeout(WEBHOOK_TIMEOUT)
        .build()
        .context("Failed to create webhook client")?;
    let notifier = Notifier::new(http, Arc::new(bus), queue_config.namespace.clone())
        .with_legacy_completion_event(config.legacy_completion_event);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let supervisor = Supervisor::new(config, queue_config.clone(), storage, notifier);
    supervisor
        .run(|_| RedisBroker::new(queue_config.clone()), shutdown_rx)
        .await
        .context("Worker pool failed")?;
    Ok(())
}
