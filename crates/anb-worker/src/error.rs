//! Worker error types.

use std::path::PathBuf;
use thiserror::Error;

use anb_db::DbError;
use anb_media::{MediaError, Stage};
use anb_models::{TransitionError, VideoId};
use anb_queue::QueueError;
use anb_storage::StorageError;

pub type WorkerResult<T> = Result<T, WorkerError>;

/// Errors raised while wiring up or running the worker process.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Metrics error: {0}")]
    Metrics(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

/// Why a single processing attempt failed.
#[derive(Debug, Error)]
pub enum ProcessingError {
    /// The job names a video with no record; redelivering cannot fix it.
    #[error("Video {video_id} has no record")]
    NotFound { video_id: VideoId },

    #[error("Source download reported success but {} is missing", path.display())]
    SourceMissing { path: PathBuf },

    #[error("Failed to download source {locator}: {source}")]
    Download {
        locator: String,
        #[source]
        source: StorageError,
    },

    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: MediaError,
    },

    #[error("Failed to upload {key}: {source}")]
    Upload {
        key: String,
        #[source]
        source: StorageError,
    },

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// The id cannot be used as a single directory name.
    #[error("Video id '{video_id}' is not a valid directory name")]
    UnsafeVideoId { video_id: VideoId },

    #[error("Working directory {}: {source}", path.display())]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ProcessingError {
    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ProcessingError::NotFound { .. }
                | ProcessingError::Transition(_)
                | ProcessingError::UnsafeVideoId { .. }
        )
    }

    /// Short label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ProcessingError::NotFound { .. } => "not_found",
            ProcessingError::SourceMissing { .. } => "source_missing",
            ProcessingError::Download { .. } => "download",
            ProcessingError::Stage { stage, .. } => stage.as_str(),
            ProcessingError::Upload { .. } => "upload",
            ProcessingError::Database(_) => "database",
            ProcessingError::Transition(_) => "transition",
            ProcessingError::UnsafeVideoId { .. } => "unsafe_video_id",
            ProcessingError::Workspace { .. } => "workspace",
        }
    }

    /// The failing ffmpeg stage, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            ProcessingError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}
