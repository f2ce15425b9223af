//! Encode worker binary.

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vstream_db::{DbConfig, PgStore};
use vstream_media::{check_ffmpeg, check_ffprobe, FfmpegTranscoder};
use vstream_queue::RedisQueue;
use vstream_storage::StorageConfig;
use vstream_worker::{metrics, JobExecutor, PipelineContext, WorkerConfig};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS to Redis, PostgreSQL and S3)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    dotenvy::dotenv().ok();
    init_tracing();

    info!("Starting vstream-worker");

    if let Err(e) = run().await {
        error!("Worker failed: {:#}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}

fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("vstream=info".parse().expect("valid directive"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(true).with_target(true))
            .with(env_filter)
            .init();
    }
}

async fn run() -> anyhow::Result<()> {
    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    check_ffmpeg().context("ffmpeg is required")?;
    check_ffprobe().context("ffprobe is required")?;

    if let Some(port) = config.metrics_port {
        let handle = metrics::init_metrics()?;
        metrics::serve_metrics(handle, port).await?;
    }

    let store = PgStore::connect(&DbConfig::from_env()?)
        .await
        .context("Failed to connect to PostgreSQL")?;
    let queue = RedisQueue::from_env().context("Failed to create job queue")?;
    let storage = StorageConfig::from_env()?.connect();

    let ctx = PipelineContext::new(
        config,
        Arc::new(store),
        Arc::new(queue),
        storage,
        Arc::new(FfmpegTranscoder),
    );
    let executor = Arc::new(JobExecutor::new(ctx));

    let signal_executor = Arc::clone(&executor);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        signal_executor.shutdown();
    });

    executor.run().await?;
    Ok(())
}
