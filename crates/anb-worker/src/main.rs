//! Highlight processing worker binary.

use std::sync::Arc;
use tracing::{error, info, warn};

use anb_db::{Database, SqliteVideoRepository};
use anb_media::{FfmpegRunner, Pipeline, PipelineConfig};
use anb_queue::{QueueConfig, QueueTransport};
use anb_storage::StorageConfig;
use anb_worker::logging::init_tracing;
use anb_worker::metrics::init_metrics;
use anb_worker::{JobExecutor, ProcessingContext, WorkerConfig, WorkerResult};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    dotenvy::dotenv().ok();
    init_tracing();

    info!("Starting anb-worker");

    if let Err(e) = run().await {
        error!("Worker failed: {}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}

async fn run() -> WorkerResult<()> {
    let config = WorkerConfig::from_env()?;
    info!("Worker config: {:?}", config);

    init_metrics(config.metrics_addr)?;
    info!("Metrics listening on {}", config.metrics_addr);

    let storage = anb_storage::connect(&StorageConfig::from_env()?).await?;

    let db = Database::open(&config.database_path)?;
    let videos = Arc::new(SqliteVideoRepository::new(db));

    let queue_config = QueueConfig::from_env()?;
    let queue = anb_queue::connect(&queue_config).await?;

    let runner = FfmpegRunner::new()
        .with_program(config.ffmpeg_path.clone())
        .with_timeout(config.ffmpeg_timeout);
    runner.resolve()?;
    let pipeline = Arc::new(Pipeline::new(
        Arc::new(runner),
        PipelineConfig::new(&config.assets_dir),
    ));

    // Synthesizing up front keeps the first job from paying for it
    if let Err(e) = pipeline.ensure_bumpers().await {
        warn!("Could not prepare bumper assets, will retry per job: {}", e);
    }

    tokio::fs::create_dir_all(&config.work_dir).await?;

    let ctx = Arc::new(ProcessingContext {
        storage,
        videos,
        pipeline,
        work_dir: config.work_dir.clone(),
    });

    let receive_wait = match queue_config.transport {
        QueueTransport::Sqs => queue_config.wait_time,
        _ => config.poll_interval,
    };
    let executor = Arc::new(JobExecutor::new(config, queue, ctx).with_receive_wait(receive_wait));

    let signal_executor = Arc::clone(&executor);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Received shutdown signal");
        signal_executor.shutdown();
    });

    executor.run().await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
