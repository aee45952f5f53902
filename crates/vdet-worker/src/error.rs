//! Worker error types.
//!
//! [`WorkerError`] covers the worker process itself. [`JobFault`] is the
//! taxonomy of reasons a single job ends in an error outcome; it never
//! escapes the runner. [`TelemetryFailure`] is logged and swallowed.

use thiserror::Error;
use vdet_models::JobId;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Storage error: {0}")]
    Storage(#[from] vdet_storage::StorageError),

    #[error("Media error: {0}")]
    Media(#[from] vdet_media::MediaError),

    #[error("Queue error: {0}")]
    Queue(#[from] vdet_queue::QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn job_failed(msg: impl Into<String>) -> Self {
        Self::JobFailed(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }
}

/// Why a job ended in an error outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobFault {
    /// The job's input is unusable: missing video, bad parameters, unloadable model.
    #[error("{0}")]
    Input(String),

    /// Decoding, inference or persistence failed while processing a frame.
    #[error("Processing failed at frame {frame}: {message}")]
    Processing { frame: u64, message: String },

    /// The worker's environment failed before processing started.
    #[error("{0}")]
    Internal(String),
}

impl JobFault {
    pub fn input(msg: impl Into<String>) -> Self {
        Self::Input(msg.into())
    }

    pub fn processing(frame: u64, msg: impl Into<String>) -> Self {
        Self::Processing {
            frame,
            message: msg.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Label used for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            JobFault::Input(_) => "input",
            JobFault::Processing { .. } => "processing",
            JobFault::Internal(_) => "internal",
        }
    }
}

/// A progress update could not be delivered.
#[derive(Debug, Error)]
#[error("Progress delivery failed for job {job_id} at {progress}%: {source}")]
pub struct TelemetryFailure {
    pub job_id: JobId,
    pub progress: u8,
    #[source]
    pub source: vdet_queue::QueueError,
}
