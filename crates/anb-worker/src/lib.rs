//! Highlight processing worker.
//!
//! This crate provides:
//! - The orchestrator that runs one attempt of a job end to end
//! - Retry and dead-letter decisions
//! - The executor loop with bounded concurrency and graceful shutdown
//! - Per-attempt working directories

pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod processor;
pub mod retry;
pub mod workspace;

#[cfg(test)]
mod testing;

pub use config::WorkerConfig;
pub use error::{ProcessingError, WorkerError, WorkerResult};
pub use executor::{DeliveryHandler, JobExecutor, Settlement};
pub use logging::JobLogger;
pub use processor::{process_video, AttemptOutcome, ProcessingContext};
pub use retry::{RetryDecision, RetryPolicy};
pub use workspace::WorkingFiles;
