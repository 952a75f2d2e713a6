//! Job payloads carried by the queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use anb_models::{JobId, VideoId};

/// Job to run the highlight pipeline over one uploaded video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessVideoJob {
    /// Stable across retries of the same dispatch
    pub job_id: JobId,
    /// Video to process
    pub video_id: VideoId,
    /// 1-based attempt number
    #[serde(default = "first_attempt")]
    pub attempt: u32,
    /// When this attempt was enqueued
    pub enqueued_at: DateTime<Utc>,
}

fn first_attempt() -> u32 {
    1
}

impl ProcessVideoJob {
    /// Create the first attempt for a video.
    pub fn new(video_id: VideoId) -> Self {
        Self {
            job_id: JobId::new(),
            video_id,
            attempt: 1,
            enqueued_at: Utc::now(),
        }
    }

    /// The same job, one attempt later.
    pub fn next_attempt(&self) -> Self {
        Self {
            job_id: self.job_id.clone(),
            video_id: self.video_id.clone(),
            attempt: self.attempt + 1,
            enqueued_at: Utc::now(),
        }
    }
}

/// Generic job wrapper for queue storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueJob {
    /// Trim, letterbox and wrap an uploaded clip with bumpers
    ProcessVideo(ProcessVideoJob),
}

impl QueueJob {
    pub fn process_video(video_id: VideoId) -> Self {
        QueueJob::ProcessVideo(ProcessVideoJob::new(video_id))
    }

    pub fn job_id(&self) -> &JobId {
        match self {
            QueueJob::ProcessVideo(j) => &j.job_id,
        }
    }

    pub fn video_id(&self) -> &VideoId {
        match self {
            QueueJob::ProcessVideo(j) => &j.video_id,
        }
    }

    pub fn attempt(&self) -> u32 {
        match self {
            QueueJob::ProcessVideo(j) => j.attempt,
        }
    }

    /// The job to enqueue when this attempt is retried.
    pub fn next_attempt(&self) -> Self {
        match self {
            QueueJob::ProcessVideo(j) => QueueJob::ProcessVideo(j.next_attempt()),
        }
    }

    pub fn to_payload(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_payload(payload: &str) -> serde_json::Result<Self> {
        serde_json::from_str(payload)
    }
}
