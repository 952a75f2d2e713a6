//! Job queue on Amazon SQS.
//!
//! Received messages stay invisible for the visibility timeout; a message
//! that is not deleted within it becomes visible again, which is how a
//! crashed worker's job gets redelivered.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_sqs::types::{MessageAttributeValue, QueueAttributeName};
use aws_sdk_sqs::Client;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::QueueTransport;
use crate::error::{QueueError, QueueResult};
use crate::job::QueueJob;
use crate::queue::{Delivery, JobHandle, JobQueue};

/// SQS caps message delay at 15 minutes.
const MAX_DELAY_SECS: u64 = 900;
/// SQS caps long polling at 20 seconds.
const MAX_WAIT_SECS: u64 = 20;
/// SQS returns at most 10 messages per receive.
const MAX_BATCH: usize = 10;

/// SQS queue configuration.
#[derive(Debug, Clone)]
pub struct SqsQueueConfig {
    pub queue_url: String,
    /// Queue receiving terminally failed jobs
    pub dlq_url: Option<String>,
    pub region: String,
    /// How long a received message stays hidden from other consumers
    pub visibility_timeout: Duration,
}

/// SQS job queue.
pub struct SqsQueue {
    client: Client,
    config: SqsQueueConfig,
}

impl SqsQueue {
    pub async fn new(config: SqsQueueConfig) -> QueueResult<Self> {
        if config.queue_url.is_empty() {
            return Err(QueueError::config("SQS_QUEUE_URL is empty"));
        }

        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        Ok(Self {
            client: Client::new(&sdk_config),
            config,
        })
    }

    fn clamp_delay(delay: Duration) -> i32 {
        let secs = delay.as_secs();
        if secs > MAX_DELAY_SECS {
            warn!(
                "Requested delay of {}s exceeds the SQS limit, using {}s",
                secs, MAX_DELAY_SECS
            );
        }
        secs.min(MAX_DELAY_SECS) as i32
    }

    async fn delete(&self, receipt: &str) -> QueueResult<()> {
        self.client
            .delete_message()
            .queue_url(&self.config.queue_url)
            .receipt_handle(receipt)
            .send()
            .await
            .map_err(|e| QueueError::AckFailed(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl JobQueue for SqsQueue {
    fn transport(&self) -> QueueTransport {
        QueueTransport::Sqs
    }

    async fn enqueue(&self, job: &QueueJob, delay: Option<Duration>) -> QueueResult<JobHandle> {
        let payload = job.to_payload()?;

        let output = self
            .client
            .send_message()
            .queue_url(&self.config.queue_url)
            .message_body(payload)
            .set_delay_seconds(delay.map(Self::clamp_delay))
            .send()
            .await
            .map_err(|e| QueueError::enqueue_failed(e.to_string()))?;

        let message_id = output.message_id().unwrap_or_default().to_string();
        info!("Enqueued job {} with message ID {}", job.job_id(), message_id);
        Ok(JobHandle::new(message_id))
    }

    async fn receive(&self, _consumer: &str, wait: Duration, max: usize) -> QueueResult<Vec<Delivery>> {
        let output = self
            .client
            .receive_message()
            .queue_url(&self.config.queue_url)
            .max_number_of_messages(max.clamp(1, MAX_BATCH) as i32)
            .wait_time_seconds(wait.as_secs().min(MAX_WAIT_SECS) as i32)
            .visibility_timeout(self.config.visibility_timeout.as_secs() as i32)
            .send()
            .await
            .map_err(|e| QueueError::DequeueFailed(e.to_string()))?;

        let mut deliveries = Vec::new();
        for message in output.messages() {
            let (Some(receipt), Some(body)) = (message.receipt_handle(), message.body()) else {
                continue;
            };
            let message_id = message.message_id().unwrap_or_default().to_string();

            match QueueJob::from_payload(body) {
                Ok(job) => {
                    debug!("Received job {} ({})", job.job_id(), message_id);
                    deliveries.push(Delivery {
                        message_id,
                        receipt: receipt.to_string(),
                        job,
                    });
                }
                Err(e) => {
                    warn!("Failed to parse job payload {}: {}", message_id, e);
                    self.delete(receipt).await.ok();
                }
            }
        }

        Ok(deliveries)
    }

    async fn ack(&self, delivery: &Delivery) -> QueueResult<()> {
        self.delete(&delivery.receipt).await?;
        debug!("Acknowledged job: {}", delivery.message_id);
        Ok(())
    }

    async fn dead_letter(&self, delivery: &Delivery, error: &str) -> QueueResult<()> {
        match &self.config.dlq_url {
            Some(dlq_url) => {
                let attribute = |value: &str| {
                    MessageAttributeValue::builder()
                        .data_type("String")
                        .string_value(value)
                        .build()
                        .map_err(QueueError::sqs)
                };

                self.client
                    .send_message()
                    .queue_url(dlq_url)
                    .message_body(delivery.job.to_payload()?)
                    .message_attributes("error", attribute(error)?)
                    .message_attributes("original_id", attribute(&delivery.message_id)?)
                    .send()
                    .await
                    .map_err(|e| QueueError::enqueue_failed(e.to_string()))?;
            }
            None => warn!(
                "No SQS_DLQ_URL configured, dropping dead job {}",
                delivery.job.job_id()
            ),
        }

        self.ack(delivery).await?;
        warn!("Moved job {} to DLQ: {}", delivery.job.job_id(), error);
        Ok(())
    }

    async fn backlog(&self) -> QueueResult<u64> {
        let output = self
            .client
            .get_queue_attributes()
            .queue_url(&self.config.queue_url)
            .attribute_names(QueueAttributeName::ApproximateNumberOfMessages)
            .send()
            .await
            .map_err(QueueError::sqs)?;

        Ok(output
            .attributes()
            .and_then(|attrs| attrs.get(&QueueAttributeName::ApproximateNumberOfMessages))
            .and_then(|v| v.parse().ok())
            .unwrap_or(0))
    }
}
