//! Shared data models for the ANB highlights pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Video identifiers and the processing status state machine
//! - The persisted video record mutated by the worker
//! - Job identifiers used by the queue transports
//! - Fixed processing constants (clip length, frame size, bumpers, retries)

pub mod encoding;
pub mod job;
pub mod video;

pub use encoding::{
    BUMPER_SECONDS, MAX_ATTEMPTS, MAX_CLIP_SECONDS, RETRY_DELAY_SECS, TARGET_HEIGHT, TARGET_WIDTH,
};
pub use job::JobId;
pub use video::{TransitionError, VideoId, VideoRecord, VideoStatus};
