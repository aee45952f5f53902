//! Job queue using Redis Streams.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use redis::streams::{StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadReply};
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use vdet_models::{Job, JobId, JobOutcome, JobState};

use crate::error::{QueueError, QueueResult};
use crate::record::{JobKeys, JobRecord, JOB_RECORD_TTL_SECS};

/// TTL for per-message delivery counters (24 hours).
const DELIVERY_COUNTER_TTL_SECS: i64 = 86_400;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream name for jobs
    pub stream_name: String,
    /// Consumer group name
    pub consumer_group: String,
    /// Dead letter queue stream name
    pub dlq_stream_name: String,
    /// Prefix for job records, progress channels and counters
    pub key_prefix: String,
    /// Deliveries of one message before it is dead-lettered
    pub max_retries: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "videoProcessingQueue".to_string(),
            consumer_group: "vdet-workers".to_string(),
            dlq_stream_name: "videoProcessingQueue:dlq".to_string(),
            key_prefix: "vdet".to_string(),
            max_retries: 3,
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let stream_name = std::env::var("QUEUE_NAME").unwrap_or(defaults.stream_name);

        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            dlq_stream_name: std::env::var("QUEUE_DLQ_STREAM")
                .unwrap_or_else(|_| format!("{}:dlq", stream_name)),
            stream_name,
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or(defaults.consumer_group),
            key_prefix: std::env::var("QUEUE_KEY_PREFIX").unwrap_or(defaults.key_prefix),
            max_retries: std::env::var("QUEUE_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_retries),
        }
    }
}

/// A stream message carrying a decoded job.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub message_id: String,
    pub job: Job,
}

/// Job queue client.
pub struct JobQueue {
    client: redis::Client,
    config: QueueConfig,
    keys: JobKeys,
}

impl JobQueue {
    /// Create a new job queue.
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())
            .map_err(|e| QueueError::connection_failed(e.to_string()))?;
        let keys = JobKeys::new(config.key_prefix.clone());
        Ok(Self {
            client,
            config,
            keys,
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn keys(&self) -> &JobKeys {
        &self.keys
    }

    /// Get max retries from config.
    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    async fn connection(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    /// Initialize the queue (create consumer group if not exists).
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        // Start at 0 so jobs enqueued before the first worker are not lost
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

    /// Enqueue a job. Returns the stream message ID.
    pub async fn enqueue(&self, job: &Job) -> QueueResult<String> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(job)?;

        let message_id: String = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("*")
            .arg("job")
            .arg(&payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::enqueue_failed(e.to_string()))?;

        let record_key = self.keys.job(&job.id);
        redis::pipe()
            .atomic()
            .del(&record_key)
            .hset(&record_key, "progress", 0u32)
            .hset(&record_key, "state", JobState::Queued.as_str())
            .hset(&record_key, "updated_at", Utc::now().to_rfc3339())
            .expire(&record_key, JOB_RECORD_TTL_SECS)
            .query_async::<()>(&mut conn)
            .await?;

        info!(job_id = %job.id, "Enqueued job with message ID {}", message_id);
        Ok(message_id)
    }

    /// Consume new jobs from the queue.
    ///
    /// Entries whose payload cannot be decoded are dead-lettered and never
    /// returned.
    pub async fn consume(
        &self,
        consumer_name: &str,
        block_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<Delivery>> {
        let mut conn = self.connection().await?;

        let result: StreamReadReply = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        let entries = result.keys.into_iter().flat_map(|k| k.ids).collect();
        Ok(self.decode_entries(entries).await)
    }

    /// Claim pending jobs that have been idle for too long.
    /// This handles jobs from crashed workers.
    pub async fn claim_pending(
        &self,
        consumer_name: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<Delivery>> {
        let mut conn = self.connection().await?;

        let pending: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("IDLE")
            .arg(min_idle_ms)
            .arg("-")
            .arg("+")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        if pending.ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut cmd = redis::cmd("XCLAIM");
        cmd.arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg(min_idle_ms);
        for p in &pending.ids {
            cmd.arg(&p.id);
        }
        let claimed: StreamClaimReply = cmd.query_async(&mut conn).await?;

        let deliveries = self.decode_entries(claimed.ids).await;
        for d in &deliveries {
            info!(job_id = %d.job.id, "Claimed pending job {}", d.message_id);
        }
        Ok(deliveries)
    }

    /// Reset the idle time of a message this consumer is still working on,
    /// so that other workers do not claim it.
    pub async fn heartbeat(&self, consumer_name: &str, message_id: &str) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        redis::cmd("XCLAIM")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg(0)
            .arg(message_id)
            .arg("JUSTID")
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn decode_entries(&self, entries: Vec<StreamId>) -> Vec<Delivery> {
        let mut deliveries = Vec::with_capacity(entries.len());
        for entry in entries {
            match decode_entry(&entry) {
                Ok(job) => {
                    debug!(job_id = %job.id, "Consumed job {} from stream", entry.id);
                    deliveries.push(Delivery {
                        message_id: entry.id,
                        job,
                    });
                }
                Err((payload, reason)) => {
                    warn!("Malformed job payload in {}: {}", entry.id, reason);
                    if let Err(e) = self.dlq(&entry.id, &payload, &reason).await {
                        warn!("Failed to dead-letter malformed message {}: {}", entry.id, e);
                    }
                }
            }
        }
        deliveries
    }

    /// Acknowledge a job and remove it from the stream.
    pub async fn ack(&self, message_id: &str) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        redis::cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        redis::cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        conn.del::<_, ()>(self.keys.delivery(message_id)).await?;

        debug!("Acknowledged message: {}", message_id);
        Ok(())
    }

    /// Copy a raw payload to the dead letter stream and ack the original.
    pub async fn dlq(&self, message_id: &str, payload: &str, error: &str) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        redis::cmd("XADD")
            .arg(&self.config.dlq_stream_name)
            .arg("*")
            .arg("job")
            .arg(payload)
            .arg("error")
            .arg(error)
            .arg("original_id")
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        self.ack(message_id).await?;

        warn!("Moved message {} to DLQ: {}", message_id, error);
        Ok(())
    }

    /// Dead-letter a decoded job and record a terminal error outcome for it.
    pub async fn dead_letter(&self, delivery: &Delivery, error: &str) -> QueueResult<()> {
        let payload = serde_json::to_string(&delivery.job)?;
        self.write_outcome(
            &delivery.job.id,
            JobState::DeadLettered,
            &JobOutcome::error(error),
        )
        .await?;
        self.dlq(&delivery.message_id, &payload, error).await
    }

    /// Count one more delivery of a message. Returns the new count.
    pub async fn increment_delivery(&self, message_id: &str) -> QueueResult<u32> {
        let mut conn = self.connection().await?;

        let key = self.keys.delivery(message_id);
        let count: u32 = conn.incr(&key, 1).await?;
        conn.expire::<_, ()>(&key, DELIVERY_COUNTER_TTL_SECS).await?;
        Ok(count)
    }

    /// Take back one delivery of a message whose run ended without fault,
    /// such as a graceful shutdown. The count never drops below zero.
    pub async fn release_delivery(&self, message_id: &str) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        let key = self.keys.delivery(message_id);
        let count: i64 = conn.decr(&key, 1).await?;
        if count < 0 {
            conn.del::<_, ()>(&key).await?;
        }
        Ok(())
    }

    /// Update the broker-side state of a job.
    pub async fn set_state(&self, job_id: &JobId, state: JobState) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        let record_key = self.keys.job(job_id);

        redis::pipe()
            .atomic()
            .hset(&record_key, "state", state.as_str())
            .hset(&record_key, "updated_at", Utc::now().to_rfc3339())
            .expire(&record_key, JOB_RECORD_TTL_SECS)
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    /// Store a terminal outcome: `completed` for success, `failed` for error.
    pub async fn complete(&self, job_id: &JobId, outcome: &JobOutcome) -> QueueResult<()> {
        let state = if outcome.is_success() {
            JobState::Completed
        } else {
            JobState::Failed
        };
        self.write_outcome(job_id, state, outcome).await
    }

    async fn write_outcome(
        &self,
        job_id: &JobId,
        state: JobState,
        outcome: &JobOutcome,
    ) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        let record_key = self.keys.job(job_id);
        let result = serde_json::to_string(outcome)?;

        redis::pipe()
            .atomic()
            .hset(&record_key, "progress", 100u32)
            .hset(&record_key, "state", state.as_str())
            .hset(&record_key, "result", result)
            .hset(&record_key, "updated_at", Utc::now().to_rfc3339())
            .expire(&record_key, JOB_RECORD_TTL_SECS)
            .query_async::<()>(&mut conn)
            .await?;

        info!(job_id = %job_id, state = %state, status = outcome.status(), "Recorded job outcome");
        Ok(())
    }

    /// Read a job's record.
    pub async fn job_record(&self, job_id: &JobId) -> QueueResult<Option<JobRecord>> {
        let mut conn = self.connection().await?;
        let fields: HashMap<String, String> = conn.hgetall(self.keys.job(job_id)).await?;
        JobRecord::from_fields(&fields)
    }

    /// Get queue length.
    pub async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = conn.xlen(&self.config.stream_name).await?;
        Ok(len)
    }

    /// Get DLQ length.
    pub async fn dlq_len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = conn.xlen(&self.config.dlq_stream_name).await?;
        Ok(len)
    }

    /// Wait until the job record reaches a terminal state, or `timeout` passes.
    pub async fn wait_for_outcome(
        &self,
        job_id: &JobId,
        poll: Duration,
        timeout: Duration,
    ) -> QueueResult<Option<JobRecord>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let record = self.job_record(job_id).await?;
            if record.as_ref().is_some_and(|r| r.state.is_terminal()) {
                return Ok(record);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(record);
            }
            tokio::time::sleep(poll).await;
        }
    }
}

/// Decode the `job` field of a stream entry.
///
/// On failure returns the raw payload (possibly empty) and the reason.
fn decode_entry(entry: &StreamId) -> Result<Job, (String, String)> {
    let payload = match entry.map.get("job") {
        Some(redis::Value::BulkString(bytes)) => String::from_utf8_lossy(bytes).into_owned(),
        Some(redis::Value::SimpleString(s)) => s.clone(),
        Some(_) => return Err((String::new(), "job field is not a string".to_string())),
        None => return Err((String::new(), "missing job field".to_string())),
    };

    serde_json::from_str::<Job>(&payload).map_err(|e| (payload, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(fields: &[(&str, &[u8])]) -> StreamId {
        StreamId {
            id: "1-0".to_string(),
            map: fields
                .iter()
                .map(|(k, v)| (k.to_string(), redis::Value::BulkString(v.to_vec())))
                .collect(),
        }
    }

    #[test]
    fn test_config_default() {
        let config = QueueConfig::default();
        assert_eq!(config.stream_name, "videoProcessingQueue");
        assert_eq!(config.dlq_stream_name, "videoProcessingQueue:dlq");
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn test_decode_entry() {
        let job = decode_entry(&entry(&[(
            "job",
            br#"{"id":"9","data":{"videoPath":"/data/a.mp4","confidence":0.5}}"#,
        )]))
        .unwrap();

        assert_eq!(job.id.as_str(), "9");
        assert_eq!(job.data.video_path, "/data/a.mp4");
        assert_eq!(job.data.confidence, Some(0.5));
        assert_eq!(job.data.model_ref, None);
    }

    #[test]
    fn test_decode_malformed_entry_keeps_payload() {
        let (payload, reason) = decode_entry(&entry(&[("job", b"{not json")])).unwrap_err();
        assert_eq!(payload, "{not json");
        assert!(!reason.is_empty());

        let (payload, reason) = decode_entry(&entry(&[("other", b"x")])).unwrap_err();
        assert!(payload.is_empty());
        assert_eq!(reason, "missing job field");
    }
}
