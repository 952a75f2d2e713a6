//! In-process queue transport.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::QueueTransport;
use crate::error::{QueueError, QueueResult};
use crate::job::QueueJob;
use crate::queue::{Delivery, JobHandle, JobQueue};

#[derive(Debug)]
struct Message {
    id: String,
    job: QueueJob,
    visible_at: Instant,
}

#[derive(Debug, Default)]
struct State {
    ready: VecDeque<Message>,
    in_flight: HashMap<String, Message>,
    dead: Vec<(QueueJob, String)>,
    next_id: u64,
    next_receipt: u64,
}

/// Queue held entirely in memory.
///
/// Shares the delivery semantics of the broker transports: deliveries
/// stay in flight until acknowledged and can be made visible again with
/// `expire_in_flight`, which stands in for a visibility timeout.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    state: Mutex<State>,
    notify: Notify,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> QueueResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| QueueError::DequeueFailed("memory queue lock poisoned".to_string()))
    }

    /// Make every unacknowledged delivery visible again, as if the
    /// consumer holding it had crashed. Returns how many were requeued.
    pub fn expire_in_flight(&self) -> usize {
        let Ok(mut state) = self.state.lock() else {
            return 0;
        };
        let expired: Vec<Message> = state.in_flight.drain().map(|(_, m)| m).collect();
        let count = expired.len();
        let now = Instant::now();
        for mut message in expired {
            message.visible_at = now;
            state.ready.push_back(message);
        }
        drop(state);
        self.notify.notify_waiters();
        count
    }

    /// Jobs parked on the dead-letter list with their error text.
    pub fn dead_letters(&self) -> Vec<(QueueJob, String)> {
        self.state.lock().map(|s| s.dead.clone()).unwrap_or_default()
    }

    /// Messages waiting, including delayed ones.
    pub fn ready_len(&self) -> usize {
        self.state.lock().map(|s| s.ready.len()).unwrap_or(0)
    }

    pub fn in_flight_len(&self) -> usize {
        self.state.lock().map(|s| s.in_flight.len()).unwrap_or(0)
    }

    /// Pop visible messages, or report when the next delayed one matures.
    fn take_visible(&self, max: usize) -> QueueResult<(Vec<Delivery>, Option<Instant>)> {
        let mut state = self.state()?;
        let now = Instant::now();
        let mut taken = Vec::new();
        let mut remaining = VecDeque::new();
        let mut next_visible: Option<Instant> = None;

        while let Some(message) = state.ready.pop_front() {
            if taken.len() < max && message.visible_at <= now {
                taken.push(message);
            } else {
                if message.visible_at > now {
                    next_visible = Some(next_visible.map_or(message.visible_at, |t| t.min(message.visible_at)));
                }
                remaining.push_back(message);
            }
        }
        state.ready = remaining;

        let mut deliveries = Vec::with_capacity(taken.len());
        for message in taken {
            state.next_receipt += 1;
            let receipt = format!("{}#{}", message.id, state.next_receipt);
            deliveries.push(Delivery {
                message_id: message.id.clone(),
                receipt: receipt.clone(),
                job: message.job.clone(),
            });
            state.in_flight.insert(receipt, message);
        }

        Ok((deliveries, next_visible))
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    fn transport(&self) -> QueueTransport {
        QueueTransport::Memory
    }

    async fn enqueue(&self, job: &QueueJob, delay: Option<Duration>) -> QueueResult<JobHandle> {
        let id = {
            let mut state = self.state()?;
            state.next_id += 1;
            let id = format!("mem-{}", state.next_id);
            state.ready.push_back(Message {
                id: id.clone(),
                job: job.clone(),
                visible_at: Instant::now() + delay.unwrap_or_default(),
            });
            id
        };
        self.notify.notify_waiters();
        debug!("Enqueued job {} as {}", job.job_id(), id);
        Ok(JobHandle::new(id))
    }

    async fn receive(&self, _consumer: &str, wait: Duration, max: usize) -> QueueResult<Vec<Delivery>> {
        let deadline = Instant::now() + wait;
        loop {
            let notified = self.notify.notified();
            let (deliveries, next_visible) = self.take_visible(max.max(1))?;
            if !deliveries.is_empty() {
                return Ok(deliveries);
            }

            let wake_at = next_visible.map_or(deadline, |t| t.min(deadline));
            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }
            let _ = tokio::time::timeout_at(wake_at, notified).await;
        }
    }

    async fn ack(&self, delivery: &Delivery) -> QueueResult<()> {
        let mut state = self.state()?;
        if state.in_flight.remove(&delivery.receipt).is_none() {
            return Err(QueueError::AckFailed(format!(
                "receipt {} is not in flight",
                delivery.receipt
            )));
        }
        Ok(())
    }

    async fn dead_letter(&self, delivery: &Delivery, error: &str) -> QueueResult<()> {
        {
            let mut state = self.state()?;
            state.dead.push((delivery.job.clone(), error.to_string()));
        }
        self.ack(delivery).await?;
        warn!("Moved job {} to dead letters: {}", delivery.job.job_id(), error);
        Ok(())
    }

    async fn backlog(&self) -> QueueResult<u64> {
        Ok(self.state()?.ready.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anb_models::VideoId;

    fn job(id: &str) -> QueueJob {
        QueueJob::process_video(VideoId::from(id))
    }

    #[tokio::test]
    async fn test_unacked_delivery_is_redelivered_after_expiry() {
        let queue = MemoryQueue::new();
        queue.enqueue(&job("v1"), None).await.unwrap();

        let first = queue.receive("w1", Duration::ZERO, 1).await.unwrap();
        assert_eq!(first.len(), 1);
        assert!(queue
            .receive("w1", Duration::ZERO, 1)
            .await
            .unwrap()
            .is_empty());

        assert_eq!(queue.expire_in_flight(), 1);
        let second = queue.receive("w2", Duration::ZERO, 1).await.unwrap();
        assert_eq!(second[0].message_id, first[0].message_id);
        assert_ne!(second[0].receipt, first[0].receipt);

        // The stale receipt no longer acknowledges anything
        assert!(queue.ack(&first[0]).await.is_err());
        queue.ack(&second[0]).await.unwrap();
        assert_eq!(queue.in_flight_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_retry_becomes_visible() {
        let queue = MemoryQueue::new();
        queue.enqueue(&job("v1"), None).await.unwrap();
        let delivery = queue.receive("w1", Duration::ZERO, 1).await.unwrap().remove(0);

        queue.retry(&delivery, Duration::from_secs(60)).await.unwrap();
        assert_eq!(queue.in_flight_len(), 0);
        assert!(queue
            .receive("w1", Duration::from_secs(1), 1)
            .await
            .unwrap()
            .is_empty());

        let retried = queue.receive("w1", Duration::from_secs(120), 1).await.unwrap();
        assert_eq!(retried.len(), 1);
        assert_eq!(retried[0].job.attempt(), 2);
    }

    #[tokio::test]
    async fn test_dead_letter_acks_and_records() {
        let queue = MemoryQueue::new();
        queue.enqueue(&job("v1"), None).await.unwrap();
        let delivery = queue.receive("w1", Duration::ZERO, 1).await.unwrap().remove(0);

        queue.dead_letter(&delivery, "video record missing").await.unwrap();
        assert_eq!(queue.in_flight_len(), 0);
        assert_eq!(queue.backlog().await.unwrap(), 0);
        let dead = queue.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].1, "video record missing");
    }

    #[tokio::test]
    async fn test_receive_respects_max() {
        let queue = MemoryQueue::new();
        for id in ["a", "b", "c"] {
            queue.enqueue(&job(id), None).await.unwrap();
        }
        assert_eq!(queue.receive("w", Duration::ZERO, 2).await.unwrap().len(), 2);
        assert_eq!(queue.backlog().await.unwrap(), 1);
    }
}
