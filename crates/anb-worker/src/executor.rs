//! Job executor: pulls deliveries and settles each one against the queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use anb_queue::{Delivery, JobQueue, QueueJob};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::processor::{process_video, AttemptOutcome, ProcessingContext};
use crate::retry::{retry_async, FailureTracker, RetryConfig, RetryDecision, RetryPolicy};

/// How a delivery was settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    Acked,
    Retried { next_attempt: u32 },
    DeadLettered { error: String },
    /// The queue call failed; the broker will redeliver.
    Unsettled,
}

/// Runs an attempt and acknowledges, retries or dead-letters its delivery.
///
/// The delivery is only acknowledged once the outcome is durable, so a
/// crash at any point leads to redelivery rather than a lost job.
#[derive(Clone)]
pub struct DeliveryHandler {
    ctx: Arc<ProcessingContext>,
    queue: Arc<dyn JobQueue>,
    policy: RetryPolicy,
}

impl DeliveryHandler {
    pub fn new(ctx: Arc<ProcessingContext>, queue: Arc<dyn JobQueue>, policy: RetryPolicy) -> Self {
        Self { ctx, queue, policy }
    }

    pub async fn handle(&self, delivery: Delivery) -> Settlement {
        let QueueJob::ProcessVideo(job) = &delivery.job;
        let logger = JobLogger::new(job);
        let span = logger.create_span();

        async {
            let result = process_video(&self.ctx, job, &delivery.message_id).await;

            match result {
                Ok(outcome) => {
                    if outcome == AttemptOutcome::AlreadyProcessed {
                        debug!("Acknowledging duplicate delivery {}", delivery.message_id);
                    }
                    self.ack(&delivery).await
                }
                Err(e) => match self.policy.decide(job.attempt, &e) {
                    RetryDecision::Retry { delay, next_attempt } => {
                        logger.log_warning(&format!(
                            "attempt {}/{} failed, retrying in {:?}: {}",
                            job.attempt, self.policy.max_attempts, delay, e
                        ));
                        match self.queue.retry(&delivery, delay).await {
                            Ok(handle) => {
                                metrics::record_retry();
                                debug!("Scheduled attempt {} as {}", next_attempt, handle);
                                Settlement::Retried { next_attempt }
                            }
                            Err(qe) => {
                                error!("Failed to schedule retry: {}", qe);
                                Settlement::Unsettled
                            }
                        }
                    }
                    RetryDecision::DeadLetter { exhausted } => {
                        let reason = if exhausted {
                            format!("gave up after {} attempts", job.attempt)
                        } else {
                            "not retryable".to_string()
                        };
                        logger.log_error(&format!("{}: {}", reason, e));
                        self.dead_letter(&delivery, e.to_string(), e.kind()).await
                    }
                },
            }
        }
        .instrument(span)
        .await
    }

    async fn ack(&self, delivery: &Delivery) -> Settlement {
        let config = RetryConfig::new("queue_ack");
        match retry_async(&config, || self.queue.ack(delivery)).await {
            Ok(()) => Settlement::Acked,
            Err(e) => {
                error!("Failed to ack {}: {}", delivery.message_id, e);
                Settlement::Unsettled
            }
        }
    }

    async fn dead_letter(&self, delivery: &Delivery, error: String, kind: &'static str) -> Settlement {
        let config = RetryConfig::new("queue_dead_letter");
        let result = retry_async(&config, || self.queue.dead_letter(delivery, &error)).await;
        match result {
            Ok(()) => {
                metrics::record_dead_letter(kind);
                Settlement::DeadLettered { error }
            }
            Err(e) => {
                error!("Failed to dead-letter {}: {}", delivery.message_id, e);
                Settlement::Unsettled
            }
        }
    }
}

/// Job executor that processes jobs from the queue.
pub struct JobExecutor {
    config: WorkerConfig,
    queue: Arc<dyn JobQueue>,
    handler: DeliveryHandler,
    job_semaphore: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
    consumer_name: String,
    receive_wait: Duration,
}

impl JobExecutor {
    pub fn new(config: WorkerConfig, queue: Arc<dyn JobQueue>, ctx: Arc<ProcessingContext>) -> Self {
        let job_semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        let (shutdown, _) = watch::channel(false);
        let consumer_name = format!("worker-{}", Uuid::new_v4());
        let policy = RetryPolicy::new(config.max_attempts, config.retry_delay);
        let receive_wait = config.poll_interval;

        Self {
            handler: DeliveryHandler::new(ctx, Arc::clone(&queue), policy),
            config,
            queue,
            job_semaphore,
            shutdown,
            consumer_name,
            receive_wait,
        }
    }

    /// Override how long each receive blocks (SQS long polling).
    pub fn with_receive_wait(mut self, wait: Duration) -> Self {
        self.receive_wait = wait;
        self
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    /// Consume until shutdown is signalled, then drain in-flight jobs.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            "Starting job executor '{}' on {} with {} max concurrent jobs",
            self.consumer_name,
            self.queue.transport(),
            self.config.max_concurrent_jobs
        );

        let mut shutdown_rx = self.shutdown.subscribe();
        let maintenance_task = self.spawn_maintenance();
        let mut receive_failures = FailureTracker::new(3);

        // Shutdown is only observed between batches: once receive returns,
        // every delivery it handed out is dispatched to a job.
        loop {
            if *shutdown_rx.borrow_and_update() {
                info!("Shutdown signal received, stopping executor");
                break;
            }

            match self.consume_jobs().await {
                Ok(()) => receive_failures.record_success(),
                Err(e) => {
                    if receive_failures.record_failure() {
                        error!("Error consuming jobs: {}", e);
                    }
                    tokio::select! {
                        _ = shutdown_rx.changed() => {}
                        _ = tokio::time::sleep(Duration::from_secs(5)) => {}
                    }
                }
            }
        }

        maintenance_task.abort();

        info!("Waiting for in-flight jobs to complete...");
        if tokio::time::timeout(self.config.shutdown_timeout, self.wait_for_jobs())
            .await
            .is_err()
        {
            warn!(
                "In-flight jobs still running after {:?}; they will be redelivered",
                self.config.shutdown_timeout
            );
        }

        info!("Job executor stopped");
        Ok(())
    }

    /// Periodically reclaim abandoned deliveries and sample the backlog.
    fn spawn_maintenance(&self) -> tokio::task::JoinHandle<()> {
        let queue = Arc::clone(&self.queue);
        let handler = self.handler.clone();
        let semaphore = Arc::clone(&self.job_semaphore);
        let consumer_name = self.consumer_name.clone();
        let claim_interval = self.config.claim_interval;
        let min_idle = self.config.claim_min_idle;
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(claim_interval);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        match queue.backlog().await {
                            Ok(depth) => metrics::set_backlog(depth),
                            Err(e) => debug!("Failed to read queue backlog: {}", e),
                        }

                        let available = semaphore.available_permits();
                        if available == 0 {
                            continue;
                        }

                        match queue.reclaim_stale(&consumer_name, min_idle, available).await {
                            Ok(deliveries) if !deliveries.is_empty() => {
                                info!("Reclaimed {} abandoned deliveries", deliveries.len());
                                for delivery in deliveries {
                                    let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                                        break;
                                    };
                                    let handler = handler.clone();
                                    tokio::spawn(async move {
                                        let _permit = permit;
                                        handler.handle(delivery).await;
                                    });
                                }
                            }
                            Ok(_) => {}
                            Err(e) => warn!("Failed to reclaim abandoned deliveries: {}", e),
                        }
                    }
                }
            }
        })
    }

    async fn consume_jobs(&self) -> WorkerResult<()> {
        let available = self.job_semaphore.available_permits();
        if available == 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(());
        }

        let deliveries = self
            .queue
            .receive(&self.consumer_name, self.receive_wait, available)
            .await?;

        if deliveries.is_empty() {
            return Ok(());
        }

        debug!("Received {} deliveries", deliveries.len());

        for delivery in deliveries {
            let handler = self.handler.clone();
            let permit = Arc::clone(&self.job_semaphore)
                .acquire_owned()
                .await
                .map_err(|_| WorkerError::config_error("job semaphore closed"))?;

            tokio::spawn(async move {
                let _permit = permit;
                handler.handle(delivery).await;
            });
        }

        Ok(())
    }

    async fn wait_for_jobs(&self) {
        loop {
            if self.job_semaphore.available_permits() == self.config.max_concurrent_jobs {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}
