//! Upload-side job dispatch.

use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

use anb_models::VideoId;

use crate::error::QueueError;
use crate::job::QueueJob;
use crate::queue::{JobHandle, JobQueue};

/// Enqueue failure the upload handler can branch on.
///
/// The upload itself has already been persisted; the caller should keep it
/// and flag the video for manual or alternate dispatch.
#[derive(Debug, Error)]
#[error("Failed to dispatch processing for video {video_id}: {source}")]
pub struct DispatchError {
    pub video_id: VideoId,
    #[source]
    pub source: QueueError,
}

/// Publishes processing jobs for freshly uploaded videos.
#[derive(Clone)]
pub struct Dispatcher {
    queue: Arc<dyn JobQueue>,
}

impl Dispatcher {
    pub fn new(queue: Arc<dyn JobQueue>) -> Self {
        Self { queue }
    }

    /// Enqueue the first processing attempt for `video_id`.
    ///
    /// The UPLOADED record must already be persisted.
    pub async fn enqueue_job(&self, video_id: &VideoId) -> Result<JobHandle, DispatchError> {
        let job = QueueJob::process_video(video_id.clone());
        match self.queue.enqueue(&job, None).await {
            Ok(handle) => {
                info!(video_id = %video_id, job_id = %job.job_id(), handle = %handle, "Dispatched processing job");
                Ok(handle)
            }
            Err(source) => {
                error!(video_id = %video_id, "Dispatch failed: {}", source);
                Err(DispatchError {
                    video_id: video_id.clone(),
                    source,
                })
            }
        }
    }
}
