//! Job progress via the job record and Redis Pub/Sub.

use async_trait::async_trait;
use chrono::Utc;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::debug;

use vdet_models::JobId;

use crate::error::QueueResult;
use crate::record::{JobKeys, JOB_RECORD_TTL_SECS};

/// Progress event published to Redis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub job_id: JobId,
    /// Percentage, 0..=100
    pub progress: u8,
}

/// Sink for job progress values.
#[async_trait]
pub trait ProgressPublisher: Send + Sync {
    async fn publish_progress(&self, job_id: &JobId, progress: u8) -> QueueResult<()>;
}

/// Channel for publishing/subscribing to progress events.
///
/// Publishing stores the value in the job record first so that pollers see
/// it even without a subscription.
pub struct ProgressChannel {
    client: redis::Client,
    keys: JobKeys,
}

impl ProgressChannel {
    /// Create a new progress channel.
    pub fn new(redis_url: &str, key_prefix: &str) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            keys: JobKeys::new(key_prefix),
        })
    }

    /// Get the channel name for a job.
    pub fn channel_name(&self, job_id: &JobId) -> String {
        self.keys.progress_channel(job_id)
    }

    /// Record and publish a progress update.
    pub async fn progress(&self, job_id: &JobId, value: u8) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let record_key = self.keys.job(job_id);
        let channel = self.channel_name(job_id);
        let payload = serde_json::to_string(&ProgressEvent {
            job_id: job_id.clone(),
            progress: value,
        })?;

        redis::pipe()
            .atomic()
            .hset(&record_key, "progress", u32::from(value))
            .hset(&record_key, "updated_at", Utc::now().to_rfc3339())
            .expire(&record_key, JOB_RECORD_TTL_SECS)
            .query_async::<()>(&mut conn)
            .await?;

        debug!(job_id = %job_id, progress = value, "Publishing progress to {}", channel);
        conn.publish::<_, _, ()>(channel, payload).await?;

        Ok(())
    }

    /// Subscribe to progress events for a job.
    /// Returns a pinned stream that can be polled with `.next()`.
    pub async fn subscribe(
        &self,
        job_id: &JobId,
    ) -> QueueResult<std::pin::Pin<Box<dyn futures_util::Stream<Item = ProgressEvent> + Send>>> {
        use futures_util::StreamExt;

        let mut pubsub = self.client.get_async_pubsub().await?;
        let channel = self.channel_name(job_id);

        pubsub.subscribe(&channel).await?;

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            let payload: String = msg.get_payload().ok()?;
            serde_json::from_str(&payload).ok()
        });

        Ok(Box::pin(stream))
    }
}

#[async_trait]
impl ProgressPublisher for ProgressChannel {
    async fn publish_progress(&self, job_id: &JobId, progress: u8) -> QueueResult<()> {
        self.progress(job_id, progress).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_format() {
        let event = ProgressEvent {
            job_id: JobId::from_string("7"),
            progress: 55,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json, serde_json::json!({"jobId": "7", "progress": 55}));
    }

    #[test]
    fn test_channel_name_uses_prefix() {
        let channel = ProgressChannel::new("redis://localhost:6379", "vdet").unwrap();
        assert_eq!(channel.channel_name(&JobId::from_string("7")), "vdet:progress:7");
    }
}
