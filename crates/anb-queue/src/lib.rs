//! Job queue client for the highlights pipeline.
//!
//! This crate provides:
//! - The `JobQueue` contract: late acknowledgement, at-least-once delivery
//! - Redis Streams transport (local broker) with consumer-group reclamation
//! - SQS transport (cloud queue) with visibility-timeout redelivery
//! - An in-process transport for tests and single-process runs
//! - Delayed retries and a dead-letter destination on every transport
//! - The upload-side `Dispatcher`

pub mod config;
pub mod dispatch;
pub mod error;
pub mod job;
pub mod memory;
pub mod queue;
pub mod redis_stream;
pub mod sqs;

pub use config::{connect, QueueConfig, QueueTransport};
pub use dispatch::{DispatchError, Dispatcher};
pub use error::{QueueError, QueueResult};
pub use job::{ProcessVideoJob, QueueJob};
pub use memory::MemoryQueue;
pub use queue::{Delivery, JobHandle, JobQueue};
pub use redis_stream::RedisStreamQueue;
pub use sqs::SqsQueue;
