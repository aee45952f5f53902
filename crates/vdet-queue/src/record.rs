//! Per-job records kept next to the stream.
//!
//! A job record is a Redis hash at `<prefix>:job:<id>` holding the latest
//! `progress`, the broker-side `state`, the terminal `result` (outcome JSON)
//! and `updated_at` (RFC 3339).

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use vdet_models::{JobId, JobOutcome, JobState};

use crate::error::{QueueError, QueueResult};

/// TTL for job records (7 days).
pub const JOB_RECORD_TTL_SECS: i64 = 7 * 24 * 3600;

/// Key naming under a common prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobKeys {
    prefix: String,
}

impl JobKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Hash holding the job record.
    pub fn job(&self, job_id: &JobId) -> String {
        format!("{}:job:{}", self.prefix, job_id)
    }

    /// Pub/sub channel for progress events.
    pub fn progress_channel(&self, job_id: &JobId) -> String {
        format!("{}:progress:{}", self.prefix, job_id)
    }

    /// Delivery counter for a stream message.
    pub fn delivery(&self, message_id: &str) -> String {
        format!("{}:delivery:{}", self.prefix, message_id)
    }
}

/// Decoded job record.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRecord {
    pub progress: u8,
    pub state: JobState,
    pub result: Option<JobOutcome>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Decode from `HGETALL` output. An empty hash means no record.
    pub fn from_fields(fields: &HashMap<String, String>) -> QueueResult<Option<Self>> {
        if fields.is_empty() {
            return Ok(None);
        }

        let progress = match fields.get("progress") {
            Some(p) => p
                .parse::<u8>()
                .map_err(|e| QueueError::invalid_record(format!("progress {:?}: {}", p, e)))?,
            None => 0,
        };

        let state = match fields.get("state") {
            Some(s) => s.parse::<JobState>().map_err(QueueError::invalid_record)?,
            None => JobState::default(),
        };

        let result = fields
            .get("result")
            .map(|r| serde_json::from_str::<JobOutcome>(r))
            .transpose()?;

        let updated_at = fields
            .get("updated_at")
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc));

        Ok(Some(Self {
            progress,
            state,
            result,
            updated_at,
        }))
    }
}
