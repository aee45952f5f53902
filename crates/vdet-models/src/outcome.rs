//! Terminal job outcome reported to the broker.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Final payload of a job run.
///
/// Serializes to
/// `{status: "success"|"error", message?, processedFrames?, totalFrames?, resultLocation?}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    #[serde(rename_all = "camelCase")]
    Success {
        processed_frames: u64,
        total_frames: u64,
        result_location: String,
    },
    Error { message: String },
}

impl JobOutcome {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Success { .. })
    }

    /// Status string as it appears on the wire.
    pub fn status(&self) -> &'static str {
        match self {
            JobOutcome::Success { .. } => "success",
            JobOutcome::Error { .. } => "error",
        }
    }
}
