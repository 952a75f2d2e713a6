//! The job queue contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::config::QueueTransport;
use crate::error::QueueResult;
use crate::job::QueueJob;

/// Transport-assigned identifier of an enqueued message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobHandle(pub String);

impl JobHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One received message, held unacknowledged until the attempt resolves.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Message id, recorded on the video as its task reference
    pub message_id: String,
    /// Token used to acknowledge this particular delivery
    pub receipt: String,
    pub job: QueueJob,
}

impl Delivery {
    pub fn handle(&self) -> JobHandle {
        JobHandle::new(self.message_id.clone())
    }
}

/// At-least-once job queue with late acknowledgement.
///
/// A delivery that is never acknowledged is redelivered once the
/// transport's visibility or idle timeout passes, so a crashed worker
/// loses no jobs but may cause duplicates.
#[async_trait]
pub trait JobQueue: Send + Sync {
    fn transport(&self) -> QueueTransport;

    /// Prepare broker-side state (consumer groups, streams).
    async fn init(&self) -> QueueResult<()> {
        Ok(())
    }

    /// Publish a job, optionally held back for `delay`.
    async fn enqueue(&self, job: &QueueJob, delay: Option<Duration>) -> QueueResult<JobHandle>;

    /// Wait up to `wait` for at most `max` deliveries.
    async fn receive(&self, consumer: &str, wait: Duration, max: usize) -> QueueResult<Vec<Delivery>>;

    /// Acknowledge a delivery so it is never redelivered.
    async fn ack(&self, delivery: &Delivery) -> QueueResult<()>;

    /// Schedule the next attempt after `delay`, then acknowledge this one.
    ///
    /// A crash between the two steps yields a duplicate, never a loss.
    async fn retry(&self, delivery: &Delivery, delay: Duration) -> QueueResult<JobHandle> {
        let handle = self
            .enqueue(&delivery.job.next_attempt(), Some(delay))
            .await?;
        self.ack(delivery).await?;
        Ok(handle)
    }

    /// Park a terminally failed job on the dead-letter destination and
    /// acknowledge the original delivery.
    async fn dead_letter(&self, delivery: &Delivery, error: &str) -> QueueResult<()>;

    /// Take over deliveries abandoned by crashed consumers.
    ///
    /// Transports with visibility-timeout redelivery return nothing here.
    async fn reclaim_stale(
        &self,
        _consumer: &str,
        _min_idle: Duration,
        _max: usize,
    ) -> QueueResult<Vec<Delivery>> {
        Ok(Vec::new())
    }

    /// Approximate number of jobs waiting.
    async fn backlog(&self) -> QueueResult<u64>;
}
