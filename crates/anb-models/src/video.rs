//! Video record and processing status models.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier for an uploaded video, assigned at upload time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct VideoId(pub String);

impl VideoId {
    /// Generate a new random video ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for VideoId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for VideoId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VideoId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Video processing status.
///
/// ```text
/// UPLOADED -> PROCESSING -> PROCESSED
///                 |  ^
///                 v  |
///               FAILED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum VideoStatus {
    /// Upload persisted, waiting for a worker
    #[default]
    Uploaded,
    /// A worker holds an attempt in flight
    Processing,
    /// Final blob uploaded, `processed_location` set
    Processed,
    /// Last attempt failed (may be retried)
    Failed,
}

impl VideoStatus {
    pub const ALL: [VideoStatus; 4] = [
        VideoStatus::Uploaded,
        VideoStatus::Processing,
        VideoStatus::Processed,
        VideoStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VideoStatus::Uploaded => "uploaded",
            VideoStatus::Processing => "processing",
            VideoStatus::Processed => "processed",
            VideoStatus::Failed => "failed",
        }
    }

    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// `Processing -> Processing` covers redelivery after a worker died
    /// mid-attempt without recording an outcome.
    pub fn can_transition_to(&self, next: VideoStatus) -> bool {
        use VideoStatus::*;
        matches!(
            (self, next),
            (Uploaded, Processing)
                | (Processing, Processing)
                | (Processing, Processed)
                | (Processing, Failed)
                | (Failed, Processing)
        )
    }
}

impl fmt::Display for VideoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for VideoStatus {
    type Err = TransitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploaded" => Ok(VideoStatus::Uploaded),
            "processing" => Ok(VideoStatus::Processing),
            "processed" => Ok(VideoStatus::Processed),
            "failed" => Ok(VideoStatus::Failed),
            other => Err(TransitionError::UnknownStatus(other.to_string())),
        }
    }
}

/// Errors raised by the status state machine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Invalid status transition for video {video_id}: {from} -> {to}")]
    Invalid {
        video_id: VideoId,
        from: VideoStatus,
        to: VideoStatus,
    },

    #[error("Unknown video status: {0}")]
    UnknownStatus(String),
}

/// Persisted video record: the unit of work for the processing pipeline.
///
/// Invariant: `processed_location.is_some()` iff `status == Processed`.
/// All mutation goes through the transition methods below, which enforce it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VideoRecord {
    /// Unique video ID (immutable)
    pub video_id: VideoId,

    /// Current processing status
    #[serde(default)]
    pub status: VideoStatus,

    /// Storage locator of the original upload (never mutated)
    pub source_location: String,

    /// Storage locator of the processed clip
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_location: Option<String>,

    /// Upload timestamp
    pub uploaded_at: DateTime<Utc>,

    /// Start of the current (or last) attempt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_started_at: Option<DateTime<Utc>>,

    /// Completion timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,

    /// Queue handle of the delivery that last touched this record
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_reference: Option<String>,
}

impl VideoRecord {
    /// Create a freshly uploaded record.
    pub fn uploaded(video_id: VideoId, source_location: impl Into<String>) -> Self {
        Self {
            video_id,
            status: VideoStatus::Uploaded,
            source_location: source_location.into(),
            processed_location: None,
            uploaded_at: Utc::now(),
            processing_started_at: None,
            processed_at: None,
            task_reference: None,
        }
    }

    fn transition(&mut self, next: VideoStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError::Invalid {
                video_id: self.video_id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Begin a processing attempt.
    pub fn start_processing(
        &mut self,
        task_reference: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.transition(VideoStatus::Processing)?;
        self.processed_location = None;
        self.processed_at = None;
        self.processing_started_at = Some(now);
        self.task_reference = Some(task_reference.into());
        Ok(())
    }

    /// Record a successful attempt.
    pub fn mark_processed(
        &mut self,
        processed_location: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.transition(VideoStatus::Processed)?;
        self.processed_location = Some(processed_location.into());
        self.processed_at = Some(now);
        Ok(())
    }

    /// Record a failed attempt.
    pub fn mark_failed(&mut self) -> Result<(), TransitionError> {
        self.transition(VideoStatus::Failed)?;
        self.processed_location = None;
        Ok(())
    }

    /// True when a prior attempt already produced the final clip.
    pub fn is_processed(&self) -> bool {
        self.status == VideoStatus::Processed
            && self
                .processed_location
                .as_deref()
                .is_some_and(|loc| !loc.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> VideoRecord {
        VideoRecord::uploaded(VideoId::from("vid-1"), "uploads/videos/vid-1/clip.mp4")
    }

    #[test]
    fn test_video_id_generation() {
        let id1 = VideoId::new();
        let id2 = VideoId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in VideoStatus::ALL {
            assert_eq!(status.as_str().parse::<VideoStatus>().unwrap(), status);
        }
        assert!("queued".parse::<VideoStatus>().is_err());
    }

    #[test]
    fn test_transition_table() {
        use VideoStatus::*;
        assert!(Uploaded.can_transition_to(Processing));
        assert!(Failed.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Processing));
        assert!(!Uploaded.can_transition_to(Processed));
        assert!(!Uploaded.can_transition_to(Failed));
        assert!(!Processed.can_transition_to(Processing));
        assert!(!Processed.can_transition_to(Failed));
    }

    #[test]
    fn test_successful_attempt_sets_location() {
        let mut rec = record();
        rec.start_processing("msg-1", Utc::now()).unwrap();
        assert_eq!(rec.status, VideoStatus::Processing);
        assert!(rec.processing_started_at.is_some());
        assert!(rec.processed_location.is_none());

        rec.mark_processed("processed/vid-1/processed_vid-1.mp4", Utc::now())
            .unwrap();
        assert!(rec.is_processed());
        assert!(rec.processed_at.is_some());
    }

    #[test]
    fn test_failed_attempt_can_be_retried() {
        let mut rec = record();
        rec.start_processing("msg-1", Utc::now()).unwrap();
        rec.mark_failed().unwrap();
        assert_eq!(rec.status, VideoStatus::Failed);
        assert!(rec.processed_location.is_none());

        rec.start_processing("msg-2", Utc::now()).unwrap();
        assert_eq!(rec.task_reference.as_deref(), Some("msg-2"));
    }

    #[test]
    fn test_processed_record_rejects_new_attempt() {
        let mut rec = record();
        rec.start_processing("msg-1", Utc::now()).unwrap();
        rec.mark_processed("loc", Utc::now()).unwrap();

        let err = rec.start_processing("msg-2", Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            TransitionError::Invalid {
                from: VideoStatus::Processed,
                to: VideoStatus::Processing,
                ..
            }
        ));
        assert!(rec.is_processed());
    }

    #[test]
    fn test_uploaded_cannot_complete_without_attempt() {
        let mut rec = record();
        assert!(rec.mark_processed("loc", Utc::now()).is_err());
        assert!(rec.processed_location.is_none());
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&VideoStatus::Processed).unwrap();
        assert_eq!(json, "\"processed\"");
    }
}
