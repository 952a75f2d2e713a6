//! Processing orchestrator: one attempt of one job, end to end.

use chrono::Utc;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::fs;

use anb_db::{DbError, VideoRepository};
use anb_media::{MediaResult, Pipeline, Stage};
use anb_models::VideoRecord;
use anb_queue::ProcessVideoJob;
use anb_storage::{processed_key, BlobStore, Locator};

use crate::error::ProcessingError;
use crate::logging::JobLogger;
use crate::metrics::{self, AttemptLabel};
use crate::retry::{retry_async, RetryConfig};
use crate::workspace::WorkingFiles;

/// Everything an attempt needs, shared by all concurrent jobs.
pub struct ProcessingContext {
    pub storage: Arc<dyn BlobStore>,
    pub videos: Arc<dyn VideoRepository>,
    pub pipeline: Arc<Pipeline>,
    /// Root of the per-attempt working directories
    pub work_dir: PathBuf,
}

/// How an attempt that did not fail ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The pipeline ran and the record now points at `locator`.
    Processed { locator: Locator },
    /// A previous delivery already finished this video; nothing was done.
    AlreadyProcessed,
}

/// Run one attempt of `job`.
///
/// `task_reference` is the broker's id for the delivery and is recorded on
/// the video when processing starts. On failure the record is moved to
/// FAILED on a best-effort basis; the caller decides whether to retry.
pub async fn process_video(
    ctx: &ProcessingContext,
    job: &ProcessVideoJob,
    task_reference: &str,
) -> Result<AttemptOutcome, ProcessingError> {
    let logger = JobLogger::new(job);
    let started = Instant::now();

    let result = run_attempt(ctx, job, task_reference, &logger).await;

    let elapsed = started.elapsed();
    match &result {
        Ok(AttemptOutcome::Processed { .. }) => metrics::record_attempt(AttemptLabel::Processed, elapsed),
        Ok(AttemptOutcome::AlreadyProcessed) => {
            metrics::record_attempt(AttemptLabel::AlreadyProcessed, elapsed)
        }
        Err(e) => {
            metrics::record_attempt(AttemptLabel::Failed, elapsed);
            metrics::record_failure(e.kind());
        }
    }
    result
}

async fn run_attempt(
    ctx: &ProcessingContext,
    job: &ProcessVideoJob,
    task_reference: &str,
    logger: &JobLogger,
) -> Result<AttemptOutcome, ProcessingError> {
    let mut record = ctx
        .videos
        .find(&job.video_id)
        .await?
        .ok_or_else(|| ProcessingError::NotFound {
            video_id: job.video_id.clone(),
        })?;

    if record.is_processed() {
        logger.log_progress("video already processed, skipping");
        return Ok(AttemptOutcome::AlreadyProcessed);
    }

    record.start_processing(task_reference, Utc::now())?;
    match ctx.videos.save(&record).await {
        Ok(()) => {}
        Err(DbError::AlreadyProcessed(_)) => {
            logger.log_progress("video processed by a concurrent attempt, skipping");
            return Ok(AttemptOutcome::AlreadyProcessed);
        }
        Err(e) => return Err(e.into()),
    }
    logger.log_start(&format!("processing {}", record.source_location));

    match complete(ctx, &record, job.attempt, logger).await {
        Ok(locator) => {
            logger.log_completion(&format!("published {}", locator));
            Ok(AttemptOutcome::Processed { locator })
        }
        Err(e) => {
            logger.log_error(&e.to_string());
            mark_failed(ctx, record, logger).await;
            Err(e)
        }
    }
}

/// Produce, publish and record the processed clip.
async fn complete(
    ctx: &ProcessingContext,
    record: &VideoRecord,
    attempt: u32,
    logger: &JobLogger,
) -> Result<Locator, ProcessingError> {
    let files = WorkingFiles::create(&ctx.work_dir, &record.video_id, attempt, &record.source_location).await?;
    let published = run_stages(ctx, record, &files, logger).await;
    files.cleanup().await;
    let locator = published?;

    let mut done = record.clone();
    done.mark_processed(locator.as_str(), Utc::now())?;
    ctx.videos.save(&done).await?;
    Ok(locator)
}

async fn run_stages(
    ctx: &ProcessingContext,
    record: &VideoRecord,
    files: &WorkingFiles,
    logger: &JobLogger,
) -> Result<Locator, ProcessingError> {
    let source = Locator::new(record.source_location.clone());
    ctx.storage
        .get(&source, files.source())
        .await
        .map_err(|e| ProcessingError::Download {
            locator: record.source_location.clone(),
            source: e,
        })?;

    if !fs::try_exists(files.source()).await.unwrap_or(false) {
        return Err(ProcessingError::SourceMissing {
            path: files.source().to_path_buf(),
        });
    }

    let trimmed = files.trimmed();
    let letterboxed = files.letterboxed();
    let final_output = files.final_output();

    run_stage(Stage::Trim, logger, ctx.pipeline.trim(files.source(), &trimmed)).await?;
    run_stage(Stage::Letterbox, logger, ctx.pipeline.letterbox(&trimmed, &letterboxed)).await?;
    run_stage(
        Stage::Bumpers,
        logger,
        ctx.pipeline
            .add_bumpers(&letterboxed, &final_output, &files.concat_list()),
    )
    .await?;

    let key = processed_key(&record.video_id);
    ctx.storage
        .put(&final_output, &key)
        .await
        .map_err(|e| ProcessingError::Upload { key, source: e })
}

async fn run_stage<F>(stage: Stage, logger: &JobLogger, work: F) -> Result<(), ProcessingError>
where
    F: Future<Output = MediaResult<()>>,
{
    let started = Instant::now();
    let result = work.await;
    metrics::record_stage(stage, started.elapsed());

    result.map_err(|source| ProcessingError::Stage { stage, source })?;
    logger.log_progress(&format!("{} done in {:.1}s", stage, started.elapsed().as_secs_f64()));
    Ok(())
}

/// Move the record to FAILED. A failure here is logged, never raised,
/// so it cannot mask the error that ended the attempt. A record that a
/// concurrent attempt already moved to PROCESSED is left alone.
async fn mark_failed(ctx: &ProcessingContext, mut record: VideoRecord, logger: &JobLogger) {
    if let Err(e) = record.mark_failed() {
        logger.log_warning(&format!("could not mark video failed: {}", e));
        return;
    }

    let config = RetryConfig::new("mark_failed").with_max_retries(2);
    let saved = retry_async(&config, || async {
        match ctx.videos.save(&record).await {
            Ok(()) => Ok(true),
            Err(DbError::AlreadyProcessed(_)) => Ok(false),
            Err(e) => Err(e),
        }
    })
    .await;

    match saved {
        Ok(true) => {}
        Ok(false) => logger.log_progress("video already processed elsewhere, keeping PROCESSED"),
        Err(e) => logger.log_warning(&format!("could not persist FAILED status: {}", e)),
    }
}
