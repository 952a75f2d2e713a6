use std::path::Path;
use std::process::Command;

use anb_db::{video_repo::count_by_status, Database};
use anb_media::FfmpegRunner;
use anb_queue::{QueueConfig, QueueTransport};
use anb_storage::{S3BlobStore, StorageConfig, StorageKind};
use anb_worker::WorkerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = WorkerConfig::from_env()?;

    println!(
        "worker-selfcheck: starting with work_dir={}",
        config.work_dir.display()
    );
    ensure_dir(&config.work_dir).await?;
    ensure_dir(&config.assets_dir).await?;
    if let Some(parent) = config.database_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        ensure_dir(parent).await?;
    }
    ensure_ffmpeg(&config.ffmpeg_path)?;
    report_videos(&config.database_path)?;

    let storage = StorageConfig::from_env()?;
    if storage.kind == StorageKind::S3 {
        ensure_env_present(&["S3_BUCKET"])?;
        let store = S3BlobStore::new(storage.s3.clone()).await?;
        store.check_connectivity().await?;
        println!("worker-selfcheck: bucket {} reachable", store.bucket());
    }

    let queue = QueueConfig::from_env()?;
    match queue.transport {
        QueueTransport::Redis => ensure_env_present(&["REDIS_URL"])?,
        QueueTransport::Sqs => ensure_env_present(&["SQS_QUEUE_URL"])?,
        QueueTransport::Memory => {
            println!("worker-selfcheck: warning: memory queue only sees jobs from this process")
        }
    }

    println!(
        "worker-selfcheck: ok (storage={}, queue={})",
        storage.kind, queue.transport
    );
    Ok(())
}

async fn ensure_dir(path: &Path) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| anyhow::anyhow!("cannot create {}: {}", path.display(), e))?;
    Ok(())
}

fn ensure_ffmpeg(program: &str) -> anyhow::Result<()> {
    let resolved = FfmpegRunner::new().with_program(program).resolve()?;
    let output = Command::new(&resolved)
        .arg("-version")
        .output()
        .map_err(|e| anyhow::anyhow!("{} not available: {}", resolved.display(), e))?;

    if !output.status.success() {
        return Err(anyhow::anyhow!(
            "{} -version failed: {:?}",
            resolved.display(),
            output.status
        ));
    }
    println!("worker-selfcheck: using {}", resolved.display());
    Ok(())
}

fn report_videos(path: &Path) -> anyhow::Result<()> {
    let db = Database::open(path)?;
    let counts = count_by_status(&db)?;
    let summary = counts
        .iter()
        .map(|(status, n)| format!("{}={}", status, n))
        .collect::<Vec<_>>()
        .join(", ");
    println!("worker-selfcheck: database {} ({})", path.display(), summary);
    Ok(())
}

fn ensure_env_present(vars: &[&str]) -> anyhow::Result<()> {
    for var in vars {
        if std::env::var(var).is_err() {
            return Err(anyhow::anyhow!("missing required env var {}", var));
        }
    }
    Ok(())
}
