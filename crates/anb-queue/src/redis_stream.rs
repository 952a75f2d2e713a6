//! Job queue using Redis Streams.
//!
//! Jobs live in a stream read through a consumer group. A delivery stays
//! in the group's pending entries list until acknowledged; entries idle
//! past the reclaim threshold are claimed by another consumer. Delayed
//! retries wait in a sorted set scored by due time and are moved onto the
//! stream atomically when a consumer polls.

use async_trait::async_trait;
use redis::streams::{StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadReply};
use redis::AsyncCommands;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::QueueTransport;
use crate::error::{QueueError, QueueResult};
use crate::job::QueueJob;
use crate::queue::{Delivery, JobHandle, JobQueue};

/// Moves due members of the delay set onto the stream.
const PROMOTE_DUE_SCRIPT: &str = r"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, ARGV[2])
for _, payload in ipairs(due) do
  redis.call('ZREM', KEYS[1], payload)
  redis.call('XADD', KEYS[2], '*', 'job', payload)
end
return #due
";

const PROMOTE_BATCH: usize = 100;

/// Redis Streams queue configuration.
#[derive(Debug, Clone)]
pub struct RedisQueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream name for jobs
    pub stream_name: String,
    /// Consumer group name
    pub consumer_group: String,
    /// Dead letter stream name
    pub dlq_stream_name: String,
    /// Sorted set holding delayed retries
    pub delayed_set_name: String,
}

impl RedisQueueConfig {
    pub fn new(redis_url: impl Into<String>, stream_name: impl Into<String>) -> Self {
        let stream_name = stream_name.into();
        Self {
            redis_url: redis_url.into(),
            consumer_group: "anb-workers".to_string(),
            dlq_stream_name: format!("{}:dlq", stream_name),
            delayed_set_name: format!("{}:delayed", stream_name),
            stream_name,
        }
    }
}

/// Redis Streams job queue.
pub struct RedisStreamQueue {
    client: redis::Client,
    config: RedisQueueConfig,
    promote: redis::Script,
}

impl RedisStreamQueue {
    pub fn new(config: RedisQueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self {
            client,
            config,
            promote: redis::Script::new(PROMOTE_DUE_SCRIPT),
        })
    }

    pub fn config(&self) -> &RedisQueueConfig {
        &self.config
    }

    async fn conn(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// Move delayed retries whose time has come onto the stream.
    async fn promote_due(&self, conn: &mut redis::aio::MultiplexedConnection) -> QueueResult<usize> {
        let moved: usize = self
            .promote
            .key(&self.config.delayed_set_name)
            .key(&self.config.stream_name)
            .arg(Self::now_ms())
            .arg(PROMOTE_BATCH)
            .invoke_async(conn)
            .await?;
        if moved > 0 {
            debug!("Promoted {} delayed jobs onto {}", moved, self.config.stream_name);
        }
        Ok(moved)
    }

    /// Decode stream entries; malformed payloads are acknowledged and dropped.
    async fn decode_entries(&self, entries: Vec<StreamId>) -> Vec<Delivery> {
        let mut deliveries = Vec::with_capacity(entries.len());

        for entry in entries {
            let message_id = entry.id.clone();
            let parsed = entry
                .get::<String>("job")
                .ok_or_else(|| "missing job field".to_string())
                .and_then(|payload| QueueJob::from_payload(&payload).map_err(|e| e.to_string()));

            match parsed {
                Ok(job) => deliveries.push(Delivery {
                    receipt: message_id.clone(),
                    message_id,
                    job,
                }),
                Err(e) => {
                    warn!("Failed to parse job payload {}: {}", message_id, e);
                    // Ack the malformed message to prevent reprocessing
                    self.ack_id(&message_id).await.ok();
                }
            }
        }

        deliveries
    }

    async fn ack_id(&self, message_id: &str) -> QueueResult<()> {
        let mut conn = self.conn().await?;

        redis::cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        // Delete the message from the stream so XLEN reflects the backlog
        redis::cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        debug!("Acknowledged job: {}", message_id);
        Ok(())
    }

    /// Get DLQ length.
    pub async fn dlq_len(&self) -> QueueResult<u64> {
        let mut conn = self.conn().await?;
        let len: u64 = conn.xlen(&self.config.dlq_stream_name).await?;
        Ok(len)
    }
}

#[async_trait]
impl JobQueue for RedisStreamQueue {
    fn transport(&self) -> QueueTransport {
        QueueTransport::Redis
    }

    /// Create the consumer group if it does not exist.
    async fn init(&self) -> QueueResult<()> {
        let mut conn = self.conn().await?;

        // Start at 0 so jobs enqueued before the first worker are not skipped
        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    async fn enqueue(&self, job: &QueueJob, delay: Option<Duration>) -> QueueResult<JobHandle> {
        let mut conn = self.conn().await?;
        let payload = job.to_payload()?;

        if let Some(delay) = delay.filter(|d| !d.is_zero()) {
            let due = Self::now_ms() + delay.as_millis() as i64;
            conn.zadd::<_, _, _, ()>(&self.config.delayed_set_name, &payload, due)
                .await?;
            let handle = format!("delayed:{}:{}", job.job_id(), job.attempt());
            info!(
                "Scheduled job {} attempt {} in {}s",
                job.job_id(),
                job.attempt(),
                delay.as_secs()
            );
            return Ok(JobHandle::new(handle));
        }

        let message_id: String = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("*")
            .arg("job")
            .arg(&payload)
            .query_async(&mut conn)
            .await?;

        info!("Enqueued job {} with message ID {}", job.job_id(), message_id);
        Ok(JobHandle::new(message_id))
    }

    async fn receive(&self, consumer: &str, wait: Duration, max: usize) -> QueueResult<Vec<Delivery>> {
        let mut conn = self.conn().await?;
        self.promote_due(&mut conn).await?;

        // BLOCK 0 would wait forever
        let block_ms = wait.as_millis().max(1) as u64;

        let reply: Option<StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer)
            .arg("COUNT")
            .arg(max.max(1))
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        let entries = reply
            .map(|r| r.keys.into_iter().flat_map(|k| k.ids).collect())
            .unwrap_or_default();

        Ok(self.decode_entries(entries).await)
    }

    async fn ack(&self, delivery: &Delivery) -> QueueResult<()> {
        self.ack_id(&delivery.receipt).await
    }

    async fn dead_letter(&self, delivery: &Delivery, error: &str) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        let payload = delivery.job.to_payload()?;

        redis::cmd("XADD")
            .arg(&self.config.dlq_stream_name)
            .arg("*")
            .arg("job")
            .arg(&payload)
            .arg("error")
            .arg(error)
            .arg("original_id")
            .arg(&delivery.message_id)
            .query_async::<()>(&mut conn)
            .await?;

        self.ack(delivery).await?;

        warn!("Moved job {} to DLQ: {}", delivery.job.job_id(), error);
        Ok(())
    }

    /// Claim pending entries idle for at least `min_idle`, which belong to
    /// consumers that died mid-attempt.
    async fn reclaim_stale(
        &self,
        consumer: &str,
        min_idle: Duration,
        max: usize,
    ) -> QueueResult<Vec<Delivery>> {
        let mut conn = self.conn().await?;
        let min_idle_ms = min_idle.as_millis() as u64;

        let pending: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("IDLE")
            .arg(min_idle_ms)
            .arg("-")
            .arg("+")
            .arg(max.max(1))
            .query_async(&mut conn)
            .await?;

        if pending.ids.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<&str> = pending.ids.iter().map(|p| p.id.as_str()).collect();
        let claimed: StreamClaimReply = redis::cmd("XCLAIM")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer)
            .arg(min_idle_ms)
            .arg(&ids)
            .query_async(&mut conn)
            .await?;

        let deliveries = self.decode_entries(claimed.ids).await;
        for delivery in &deliveries {
            info!(
                "Claimed pending job {} ({}) from a stalled consumer",
                delivery.job.job_id(),
                delivery.message_id
            );
        }
        Ok(deliveries)
    }

    async fn backlog(&self) -> QueueResult<u64> {
        let mut conn = self.conn().await?;
        let len: u64 = conn.xlen(&self.config.stream_name).await?;
        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anb_models::VideoId;

    #[test]
    fn test_config_derives_side_keys() {
        let config = RedisQueueConfig::new("redis://localhost:6379", "uploaded-videos");
        assert_eq!(config.dlq_stream_name, "uploaded-videos:dlq");
        assert_eq!(config.delayed_set_name, "uploaded-videos:delayed");
        assert_eq!(config.consumer_group, "anb-workers");
    }

    fn test_queue(stream: &str) -> RedisStreamQueue {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        let mut config = RedisQueueConfig::new(url, stream);
        config.consumer_group = format!("{}-group", stream);
        RedisStreamQueue::new(config).unwrap()
    }

    async fn reset(queue: &RedisStreamQueue) {
        let mut conn = queue.conn().await.unwrap();
        let cfg = queue.config();
        let _: () = redis::cmd("DEL")
            .arg(&cfg.stream_name)
            .arg(&cfg.dlq_stream_name)
            .arg(&cfg.delayed_set_name)
            .query_async(&mut conn)
            .await
            .unwrap();
        queue.init().await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn test_deliver_ack_and_backlog() {
        let queue = test_queue("anb-test-ack");
        reset(&queue).await;

        let job = QueueJob::process_video(VideoId::from("v1"));
        queue.enqueue(&job, None).await.unwrap();
        assert_eq!(queue.backlog().await.unwrap(), 1);

        let deliveries = queue
            .receive("c1", Duration::from_millis(100), 1)
            .await
            .unwrap();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].job, job);

        queue.ack(&deliveries[0]).await.unwrap();
        assert_eq!(queue.backlog().await.unwrap(), 0);
    }

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn test_stale_delivery_is_reclaimed() {
        let queue = test_queue("anb-test-reclaim");
        reset(&queue).await;

        queue
            .enqueue(&QueueJob::process_video(VideoId::from("v1")), None)
            .await
            .unwrap();
        let first = queue
            .receive("crashed", Duration::from_millis(100), 1)
            .await
            .unwrap();
        assert_eq!(first.len(), 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let claimed = queue
            .reclaim_stale("survivor", Duration::from_millis(10), 10)
            .await
            .unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].message_id, first[0].message_id);
        queue.ack(&claimed[0]).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn test_delayed_retry_and_dead_letter() {
        let queue = test_queue("anb-test-retry");
        reset(&queue).await;

        queue
            .enqueue(&QueueJob::process_video(VideoId::from("v1")), None)
            .await
            .unwrap();
        let delivery = queue
            .receive("c1", Duration::from_millis(100), 1)
            .await
            .unwrap()
            .remove(0);

        queue
            .retry(&delivery, Duration::from_millis(200))
            .await
            .unwrap();
        assert!(queue
            .receive("c1", Duration::from_millis(10), 1)
            .await
            .unwrap()
            .is_empty());

        tokio::time::sleep(Duration::from_millis(300)).await;
        let retried = queue
            .receive("c1", Duration::from_millis(100), 1)
            .await
            .unwrap()
            .remove(0);
        assert_eq!(retried.job.attempt(), 2);

        queue.dead_letter(&retried, "boom").await.unwrap();
        assert_eq!(queue.dlq_len().await.unwrap(), 1);
        assert_eq!(queue.backlog().await.unwrap(), 0);
    }
}
