//! Prometheus metrics for the worker.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;

use anb_media::Stage;

use crate::error::{WorkerError, WorkerResult};

/// Metric names.
pub mod names {
    pub const VIDEOS_PROCESSED: &str = "videos_processed_total";
    pub const VIDEOS_FAILED: &str = "videos_failed_total";
    pub const PROCESSING_DURATION: &str = "video_processing_seconds";
    pub const STAGE_DURATION: &str = "video_stage_seconds";
    pub const QUEUE_BACKLOG: &str = "video_queue_backlog";
    pub const RETRIES: &str = "video_retries_total";
    pub const DEAD_LETTERS: &str = "video_dead_letters_total";
}

/// Install the Prometheus recorder and its scrape listener.
///
/// Must be called from inside the tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> WorkerResult<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::Metrics(e.to_string()))
}

/// Outcome label of one processing attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptLabel {
    Processed,
    AlreadyProcessed,
    Failed,
}

impl AttemptLabel {
    fn as_str(&self) -> &'static str {
        match self {
            AttemptLabel::Processed => "processed",
            AttemptLabel::AlreadyProcessed => "already_processed",
            AttemptLabel::Failed => "failed",
        }
    }
}

pub fn record_attempt(outcome: AttemptLabel, elapsed: Duration) {
    histogram!(names::PROCESSING_DURATION, "outcome" => outcome.as_str())
        .record(elapsed.as_secs_f64());
    if outcome == AttemptLabel::Processed {
        counter!(names::VIDEOS_PROCESSED).increment(1);
    }
}

pub fn record_failure(reason: &'static str) {
    counter!(names::VIDEOS_FAILED, "reason" => reason).increment(1);
}

pub fn record_stage(stage: Stage, elapsed: Duration) {
    histogram!(names::STAGE_DURATION, "stage" => stage.as_str()).record(elapsed.as_secs_f64());
}

pub fn set_backlog(depth: u64) {
    gauge!(names::QUEUE_BACKLOG).set(depth as f64);
}

pub fn record_retry() {
    counter!(names::RETRIES).increment(1);
}

pub fn record_dead_letter(reason: &'static str) {
    counter!(names::DEAD_LETTERS, "reason" => reason).increment(1);
}
