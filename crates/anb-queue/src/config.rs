//! Queue transport selection.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{QueueError, QueueResult};
use crate::memory::MemoryQueue;
use crate::queue::JobQueue;
use crate::redis_stream::{RedisQueueConfig, RedisStreamQueue};
use crate::sqs::{SqsQueue, SqsQueueConfig};

/// Which transport carries jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueTransport {
    /// Redis Streams (local broker)
    Redis,
    /// Amazon SQS (cloud queue)
    Sqs,
    /// In-process, for tests and single-process runs
    Memory,
}

impl QueueTransport {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueTransport::Redis => "redis",
            QueueTransport::Sqs => "sqs",
            QueueTransport::Memory => "memory",
        }
    }
}

impl fmt::Display for QueueTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueTransport {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(QueueTransport::Redis),
            "sqs" => Ok(QueueTransport::Sqs),
            "memory" => Ok(QueueTransport::Memory),
            other => Err(QueueError::config(format!(
                "Unknown QUEUE_TRANSPORT '{}': expected redis, sqs or memory",
                other
            ))),
        }
    }
}

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub transport: QueueTransport,
    /// Logical queue name (the Redis stream name)
    pub queue_name: String,
    /// Redis URL
    pub redis_url: String,
    /// Consumer group name
    pub consumer_group: String,
    /// Dead letter stream name
    pub dlq_name: String,
    pub sqs_queue_url: Option<String>,
    pub sqs_dlq_url: Option<String>,
    pub aws_region: String,
    /// SQS visibility timeout; must outlast the slowest attempt
    pub visibility_timeout: Duration,
    /// Long-poll duration per receive
    pub wait_time: Duration,
    /// Messages requested per receive
    pub max_messages: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            transport: QueueTransport::Redis,
            queue_name: "uploaded-videos".to_string(),
            redis_url: "redis://localhost:6379".to_string(),
            consumer_group: "anb-workers".to_string(),
            dlq_name: "uploaded-videos:dlq".to_string(),
            sqs_queue_url: None,
            sqs_dlq_url: None,
            aws_region: "us-east-1".to_string(),
            visibility_timeout: Duration::from_secs(3600),
            wait_time: Duration::from_secs(20),
            max_messages: 1,
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        let defaults = Self::default();
        let queue_name =
            std::env::var("QUEUE_NAME").unwrap_or_else(|_| defaults.queue_name.clone());

        Ok(Self {
            transport: match std::env::var("QUEUE_TRANSPORT") {
                Ok(v) => v.parse()?,
                Err(_) => defaults.transport,
            },
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or(defaults.consumer_group),
            dlq_name: std::env::var("QUEUE_DLQ_NAME")
                .unwrap_or_else(|_| format!("{}:dlq", queue_name)),
            sqs_queue_url: std::env::var("SQS_QUEUE_URL").ok().filter(|v| !v.is_empty()),
            sqs_dlq_url: std::env::var("SQS_DLQ_URL").ok().filter(|v| !v.is_empty()),
            aws_region: std::env::var("AWS_REGION").unwrap_or(defaults.aws_region),
            visibility_timeout: Duration::from_secs(
                std::env::var("SQS_VISIBILITY_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(3600),
            ),
            wait_time: Duration::from_secs(
                std::env::var("SQS_WAIT_TIME_SECONDS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(20),
            ),
            max_messages: std::env::var("SQS_MAX_MESSAGES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1),
            queue_name,
        })
    }

    fn redis_config(&self) -> RedisQueueConfig {
        let mut config = RedisQueueConfig::new(&self.redis_url, &self.queue_name);
        config.consumer_group = self.consumer_group.clone();
        config.dlq_stream_name = self.dlq_name.clone();
        config
    }
}

/// Construct the configured transport and prepare broker-side state.
pub async fn connect(config: &QueueConfig) -> QueueResult<Arc<dyn JobQueue>> {
    let queue: Arc<dyn JobQueue> = match config.transport {
        QueueTransport::Redis => Arc::new(RedisStreamQueue::new(config.redis_config())?),
        QueueTransport::Sqs => {
            let queue_url = config
                .sqs_queue_url
                .clone()
                .ok_or_else(|| QueueError::config("SQS_QUEUE_URL is required for the sqs transport"))?;
            Arc::new(
                SqsQueue::new(SqsQueueConfig {
                    queue_url,
                    dlq_url: config.sqs_dlq_url.clone(),
                    region: config.aws_region.clone(),
                    visibility_timeout: config.visibility_timeout,
                })
                .await?,
            )
        }
        QueueTransport::Memory => {
            warn!("Using the in-memory queue: jobs are visible only inside this process");
            Arc::new(MemoryQueue::new())
        }
    };

    queue
        .init()
        .await
        .map_err(|e| QueueError::connection_failed(format!("{} queue init failed: {}", config.transport, e)))?;
    info!(transport = %config.transport, queue = %config.queue_name, "Job queue ready");
    Ok(queue)
}
