//! Register a local clip as an upload and dispatch it for processing.
//!
//! Usage: `anb-dispatch <path-to-clip>`

use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;

use anb_db::{Database, SqliteVideoRepository, VideoRepository};
use anb_models::{VideoId, VideoRecord};
use anb_queue::{Dispatcher, QueueConfig};
use anb_storage::{original_key, StorageConfig};
use anb_worker::logging::init_tracing;
use anb_worker::WorkerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;
    dotenvy::dotenv().ok();
    init_tracing();

    let path: PathBuf = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .context("usage: anb-dispatch <path-to-clip>")?;
    anyhow::ensure!(path.is_file(), "{} is not a file", path.display());

    let config = WorkerConfig::from_env()?;
    let storage = anb_storage::connect(&StorageConfig::from_env()?).await?;
    let videos = SqliteVideoRepository::new(Database::open(&config.database_path)?);
    let queue = anb_queue::connect(&QueueConfig::from_env()?).await?;

    let video_id = VideoId::new();
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let locator = storage
        .put(&path, &original_key(&video_id, &filename))
        .await
        .context("storing original")?;

    videos
        .insert(&VideoRecord::uploaded(video_id.clone(), locator.into_string()))
        .await
        .context("recording upload")?;

    let dispatcher = Dispatcher::new(Arc::clone(&queue));
    match dispatcher.enqueue_job(&video_id).await {
        Ok(handle) => {
            println!("{} dispatched as {}", video_id, handle);
            Ok(())
        }
        Err(e) => {
            // The upload stands; only the dispatch needs repeating
            eprintln!("{} uploaded but not dispatched, re-dispatch manually", video_id);
            Err(e.into())
        }
    }
}
