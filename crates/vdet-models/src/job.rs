//! Job definitions for queue processing.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;
use validator::Validate;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Job parameters as submitted by the producer.
///
/// `confidence` and `model_ref` are optional on the wire; the worker fills
/// them from its own defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct JobData {
    /// Path of the video file to analyze
    #[validate(length(min = 1, message = "video path must not be empty"))]
    pub video_path: String,

    /// Minimum detection confidence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 0.0, max = 1.0, message = "confidence must be within [0, 1]"))]
    pub confidence: Option<f32>,

    /// Model reference (path or registry name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_ref: Option<String>,
}

/// A video detection job as carried by the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    /// Unique job ID
    pub id: JobId,
    /// Job parameters
    pub data: JobData,
}

impl Job {
    /// Create a new job for a video path with worker-default parameters.
    pub fn new(video_path: impl Into<String>) -> Self {
        Self {
            id: JobId::new(),
            data: JobData {
                video_path: video_path.into(),
                confidence: None,
                model_ref: None,
            },
        }
    }

    /// Use an explicit job ID.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = JobId::from_string(id);
        self
    }

    /// Set the confidence threshold.
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.data.confidence = Some(confidence);
        self
    }

    /// Set the model reference.
    pub fn with_model(mut self, model_ref: impl Into<String>) -> Self {
        self.data.model_ref = Some(model_ref.into());
        self
    }
}

/// Execution phase of a single job run.
///
/// `Pending -> Validating -> (Failed | Initialized) -> Processing -> (Succeeded | Failed)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    #[default]
    Pending,
    Validating,
    Initialized,
    Processing,
    Succeeded,
    Failed,
}

/// Rejected phase transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("illegal job phase transition: {from} -> {to}")]
pub struct PhaseError {
    pub from: JobPhase,
    pub to: JobPhase,
}

impl JobPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobPhase::Pending => "pending",
            JobPhase::Validating => "validating",
            JobPhase::Initialized => "initialized",
            JobPhase::Processing => "processing",
            JobPhase::Succeeded => "succeeded",
            JobPhase::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobPhase::Succeeded | JobPhase::Failed)
    }

    /// Whether `next` is a legal successor of this phase.
    pub fn can_advance_to(&self, next: JobPhase) -> bool {
        use JobPhase::*;
        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (Pending, Validating)
            | (Validating, Initialized)
            | (Initialized, Processing)
            | (Processing, Succeeded) => true,
            _ => false,
        }
    }

    /// Move to `next`, rejecting illegal transitions.
    pub fn advance(self, next: JobPhase) -> Result<JobPhase, PhaseError> {
        if self.can_advance_to(next) {
            Ok(next)
        } else {
            Err(PhaseError { from: self, to: next })
        }
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_wire_format() {
        let json = r#"{"id":"42","data":{"videoPath":"media/input.mp4","confidence":0.4,"modelRef":"best.onnx"}}"#;
        let job: Job = serde_json::from_str(json).unwrap();

        assert_eq!(job.id.as_str(), "42");
        assert_eq!(job.data.video_path, "media/input.mp4");
        assert_eq!(job.data.confidence, Some(0.4));
        assert_eq!(job.data.model_ref.as_deref(), Some("best.onnx"));
    }

    #[test]
    fn test_job_optional_params() {
        let job: Job = serde_json::from_str(r#"{"id":"7","data":{"videoPath":"a.mp4"}}"#).unwrap();
        assert_eq!(job.data.confidence, None);
        assert_eq!(job.data.model_ref, None);

        let json = serde_json::to_value(&job).unwrap();
        assert!(json["data"].get("confidence").is_none());
    }

    #[test]
    fn test_job_data_validation() {
        let ok = Job::new("a.mp4").with_confidence(0.25);
        assert!(ok.data.validate().is_ok());

        let bad_conf = Job::new("a.mp4").with_confidence(1.5);
        assert!(bad_conf.data.validate().is_err());

        let empty_path = Job::new("");
        assert!(empty_path.data.validate().is_err());
    }

    #[test]
    fn test_phase_happy_path() {
        let phase = JobPhase::Pending
            .advance(JobPhase::Validating)
            .and_then(|p| p.advance(JobPhase::Initialized))
            .and_then(|p| p.advance(JobPhase::Processing))
            .and_then(|p| p.advance(JobPhase::Succeeded))
            .unwrap();
        assert!(phase.is_terminal());
    }

    #[test]
    fn test_phase_failed_reachable_from_non_terminal() {
        for phase in [
            JobPhase::Pending,
            JobPhase::Validating,
            JobPhase::Initialized,
            JobPhase::Processing,
        ] {
            assert!(phase.can_advance_to(JobPhase::Failed), "{phase}");
        }
        assert!(!JobPhase::Succeeded.can_advance_to(JobPhase::Failed));
        assert!(!JobPhase::Failed.can_advance_to(JobPhase::Failed));
    }

    #[test]
    fn test_phase_rejects_skips() {
        let err = JobPhase::Validating.advance(JobPhase::Processing).unwrap_err();
        assert_eq!(err.from, JobPhase::Validating);
        assert_eq!(err.to, JobPhase::Processing);
        assert!(JobPhase::Pending.advance(JobPhase::Succeeded).is_err());
    }
}
