//! FFmpeg CLI wrapper for the highlight pipeline.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building (file, lavfi and concat inputs)
//! - A `CommandRunner` seam so the orchestrator can be exercised without ffmpeg
//! - The three pipeline stages: trim, letterbox, intro/outro bumpers
//! - One-time synthesis and on-disk caching of the bumper clips
//! - FFprobe inspection of finished clips

pub mod bumpers;
pub mod command;
pub mod error;
pub mod inspect;
pub mod letterbox;
pub mod pipeline;
pub mod stage;
pub mod trim;

pub use bumpers::{BumperAssets, BumperCache};
pub use command::{CommandRunner, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use inspect::{inspect_clip, ClipInfo};
pub use pipeline::{Pipeline, PipelineConfig};
pub use stage::Stage;
