//! Job executor.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use vdet_media::{FfmpegSourceOpener, ModelRegistry};
use vdet_models::{JobId, JobOutcome, JobState};
use vdet_queue::{Delivery, JobQueue, ProgressChannel, QueueResult};
use vdet_storage::ResultStore;

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::metrics;
use crate::retry::{retry_async, RetryConfig};
use crate::runner::{JobRunner, RunOutcome};

/// Most messages read or claimed in one round.
const MAX_BATCH: usize = 5;

/// How long one XREADGROUP blocks.
const CONSUME_BLOCK_MS: u64 = 1000;

/// Broker operations needed while a delivered job runs and settles.
#[async_trait]
pub trait JobBroker: Send + Sync {
    fn max_retries(&self) -> u32;
    async fn increment_delivery(&self, message_id: &str) -> QueueResult<u32>;
    async fn release_delivery(&self, message_id: &str) -> QueueResult<()>;
    async fn dead_letter(&self, delivery: &Delivery, error: &str) -> QueueResult<()>;
    async fn set_state(&self, job_id: &JobId, state: JobState) -> QueueResult<()>;
    async fn heartbeat(&self, consumer_name: &str, message_id: &str) -> QueueResult<()>;
    async fn complete(&self, job_id: &JobId, outcome: &JobOutcome) -> QueueResult<()>;
    async fn ack(&self, message_id: &str) -> QueueResult<()>;
}

#[async_trait]
impl JobBroker for JobQueue {
    fn max_retries(&self) -> u32 {
        JobQueue::max_retries(self)
    }

    async fn increment_delivery(&self, message_id: &str) -> QueueResult<u32> {
        JobQueue::increment_delivery(self, message_id).await
    }

    async fn release_delivery(&self, message_id: &str) -> QueueResult<()> {
        JobQueue::release_delivery(self, message_id).await
    }

    async fn dead_letter(&self, delivery: &Delivery, error: &str) -> QueueResult<()> {
        JobQueue::dead_letter(self, delivery, error).await
    }

    async fn set_state(&self, job_id: &JobId, state: JobState) -> QueueResult<()> {
        JobQueue::set_state(self, job_id, state).await
    }

    async fn heartbeat(&self, consumer_name: &str, message_id: &str) -> QueueResult<()> {
        JobQueue::heartbeat(self, consumer_name, message_id).await
    }

    async fn complete(&self, job_id: &JobId, outcome: &JobOutcome) -> QueueResult<()> {
        JobQueue::complete(self, job_id, outcome).await
    }

    async fn ack(&self, message_id: &str) -> QueueResult<()> {
        JobQueue::ack(self, message_id).await
    }
}

/// Job executor that processes jobs from the queue.
pub struct JobExecutor {
    config: WorkerConfig,
    queue: Arc<JobQueue>,
    runner: Arc<JobRunner>,
    job_semaphore: Arc<Semaphore>,
    /// Stops consumption
    shutdown: watch::Sender<bool>,
    /// Cancels in-flight jobs at their next frame boundary
    cancel: watch::Sender<bool>,
    consumer_name: String,
}

impl JobExecutor {
    /// Create an executor with the production runner: ONNX models, FFmpeg
    /// decoding and Redis progress.
    pub fn new(config: WorkerConfig, queue: JobQueue) -> WorkerResult<Self> {
        let progress = ProgressChannel::new(&queue.config().redis_url, &queue.config().key_prefix)?;
        let runner = JobRunner::new(
            ResultStore::new(config.results_dir.clone()),
            Arc::new(ModelRegistry::new(config.model_dir.clone())),
            Arc::new(FfmpegSourceOpener),
            Arc::new(progress),
        )
        .with_defaults(config.job_defaults())
        .with_pacing(config.progress_pacing());

        Ok(Self::with_runner(config, queue, runner))
    }

    /// Create an executor around an existing runner.
    pub fn with_runner(config: WorkerConfig, queue: JobQueue, runner: JobRunner) -> Self {
        let config = config.normalized();
        let job_semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        let (shutdown, _) = watch::channel(false);
        let (cancel, _) = watch::channel(false);
        let consumer_name = format!("worker-{}", Uuid::new_v4());

        Self {
            config,
            queue: Arc::new(queue),
            runner: Arc::new(runner),
            job_semaphore,
            shutdown,
            cancel,
            consumer_name,
        }
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    /// Start the executor. Returns after shutdown has drained in-flight jobs.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            "Starting job executor '{}' with {} max concurrent jobs",
            self.consumer_name, self.config.max_concurrent_jobs
        );

        tokio::fs::create_dir_all(&self.config.results_dir).await?;
        self.queue.init().await?;

        let mut shutdown_rx = self.shutdown.subscribe();
        let claim_task = self.spawn_claim_task();

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping consumption");
                        break;
                    }
                }
                result = self.consume_jobs() => {
                    if let Err(e) = result {
                        error!("Error consuming jobs: {}", e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }

        claim_task.abort();
        self.drain().await;

        info!("Job executor stopped");
        Ok(())
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Wait for in-flight jobs; cancel whatever is still running after the timeout.
    async fn drain(&self) {
        let timeout = self.config.shutdown_timeout;

        info!("Waiting up to {:?} for in-flight jobs to complete...", timeout);
        if tokio::time::timeout(timeout, self.wait_for_jobs()).await.is_ok() {
            return;
        }

        warn!("In-flight jobs still running, cancelling at next frame boundary");
        let _ = self.cancel.send(true);
        if tokio::time::timeout(timeout, self.wait_for_jobs()).await.is_err() {
            warn!("Jobs did not stop within {:?}; they will be redelivered", timeout);
        }
    }

    fn spawn_claim_task(&self) -> tokio::task::JoinHandle<()> {
        let queue = Arc::clone(&self.queue);
        let runner = Arc::clone(&self.runner);
        let semaphore = Arc::clone(&self.job_semaphore);
        let consumer_name = self.consumer_name.clone();
        let cancel_rx = self.cancel.subscribe();
        let mut shutdown_rx = self.shutdown.subscribe();
        let claim_interval = self.config.claim_interval;
        let min_idle_ms = self.config.claim_min_idle.as_millis() as u64;
        let heartbeat = self.config.job_heartbeat_interval;

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
                        let available = semaphore.available_permits();
                        if available == 0 {
                            continue;
                        }
                        match queue.claim_pending(&consumer_name, min_idle_ms, available.min(MAX_BATCH)).await {
                            Ok(deliveries) if !deliveries.is_empty() => {
                                info!("Claimed {} pending jobs", deliveries.len());
                                for delivery in deliveries {
                                    let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                                        break;
                                    };
                                    let ctx = JobContext {
                                        broker: queue.clone(),
                                        runner: Arc::clone(&runner),
                                        consumer_name: consumer_name.clone(),
                                        cancel: cancel_rx.clone(),
                                        heartbeat,
                                    };
                                    tokio::spawn(async move {
                                        let _permit = permit;
                                        ctx.execute(delivery).await;
                                    });
                                }
                            }
                            Ok(_) => {}
                            Err(e) => warn!("Failed to claim pending jobs: {}", e),
                        }
                    }
                }
            }
        })
    }

    /// Consume and start jobs, up to the free concurrency slots.
    async fn consume_jobs(&self) -> WorkerResult<()> {
        let available = self.job_semaphore.available_permits();
        if available == 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(());
        }

        let deliveries = self
            .queue
            .consume(&self.consumer_name, CONSUME_BLOCK_MS, available.min(MAX_BATCH))
            .await?;

        if deliveries.is_empty() {
            return Ok(());
        }
        debug!("Consumed {} jobs from queue", deliveries.len());

        for delivery in deliveries {
            let permit = Arc::clone(&self.job_semaphore)
                .acquire_owned()
                .await
                .map_err(|_| WorkerError::job_failed("Semaphore closed"))?;
            let ctx = self.job_context();

            tokio::spawn(async move {
                let _permit = permit;
                ctx.execute(delivery).await;
            });
        }

        Ok(())
    }

    fn job_context(&self) -> JobContext {
        JobContext {
            broker: self.queue.clone(),
            runner: Arc::clone(&self.runner),
            consumer_name: self.consumer_name.clone(),
            cancel: self.cancel.subscribe(),
            heartbeat: self.config.job_heartbeat_interval,
        }
    }

    /// Wait for all in-flight jobs to complete.
    async fn wait_for_jobs(&self) {
        loop {
            let available = self.job_semaphore.available_permits();
            if available == self.config.max_concurrent_jobs {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

/// Everything a spawned job needs.
struct JobContext {
    broker: Arc<dyn JobBroker>,
    runner: Arc<JobRunner>,
    consumer_name: String,
    cancel: watch::Receiver<bool>,
    heartbeat: Duration,
}

impl JobContext {
    /// Run one delivery and settle it with the broker.
    async fn execute(self, delivery: Delivery) {
        let job_id = delivery.job.id.clone();

        let deliveries = match self.broker.increment_delivery(&delivery.message_id).await {
            Ok(n) => n,
            Err(e) => {
                warn!(job_id = %job_id, "Failed to count delivery: {}", e);
                1
            }
        };
        let max_retries = self.broker.max_retries();
        if deliveries > max_retries {
            warn!(job_id = %job_id, "Job delivered {} times, moving to DLQ", deliveries);
            let reason = format!("Job abandoned after {} deliveries", max_retries);
            if let Err(e) = self.broker.dead_letter(&delivery, &reason).await {
                error!(job_id = %job_id, "Failed to dead-letter job: {}", e);
            }
            metrics::record_job_dead_lettered();
            return;
        }

        info!(job_id = %job_id, attempt = deliveries, "Executing job");
        if let Err(e) = self.broker.set_state(&job_id, JobState::Active).await {
            warn!(job_id = %job_id, "Failed to mark job active: {}", e);
        }

        let heartbeat_task = self.spawn_heartbeat(&delivery.message_id);
        let outcome = self.runner.run(&delivery.job, &self.cancel).await;
        heartbeat_task.abort();

        match outcome {
            RunOutcome::Finished(outcome) => {
                let retry = RetryConfig::new("record job outcome");
                let broker = &self.broker;
                let recorded = retry_async(&retry, || broker.complete(&job_id, &outcome)).await;
                if let Err(e) = recorded {
                    error!(job_id = %job_id, "Failed to record outcome: {}", e);
                }
                if let Err(e) = self.broker.ack(&delivery.message_id).await {
                    error!(job_id = %job_id, "Failed to ack job: {}", e);
                }
                info!(job_id = %job_id, status = outcome.status(), "Job settled");
            }
            RunOutcome::Interrupted { processed_frames } => {
                info!(
                    job_id = %job_id,
                    processed_frames,
                    "Job interrupted, leaving message pending for redelivery"
                );
                if let Err(e) = self.broker.set_state(&job_id, JobState::Queued).await {
                    warn!(job_id = %job_id, "Failed to mark job queued: {}", e);
                }
                if let Err(e) = self.broker.release_delivery(&delivery.message_id).await {
                    warn!(job_id = %job_id, "Failed to release delivery: {}", e);
                }
            }
        }
    }

    /// Keep the message owned by this consumer while the job runs.
    fn spawn_heartbeat(&self, message_id: &str) -> tokio::task::JoinHandle<()> {
        let broker = Arc::clone(&self.broker);
        let consumer_name = self.consumer_name.clone();
        let message_id = message_id.to_string();
        let period = self.heartbeat;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                if let Err(e) = broker.heartbeat(&consumer_name, &message_id).await {
                    debug!("Heartbeat for {} failed: {}", message_id, e);
                }
            }
        })
    }
}
