//! Shared data models for the video detection worker.
//!
//! This crate provides Serde-serializable types for:
//! - Queue jobs and their parameters
//! - The job execution phase machine
//! - Per-frame detection records and the result document
//! - Terminal job outcomes reported back to the broker

pub mod detection;
pub mod job;
pub mod job_status;
pub mod outcome;
pub mod result;
pub mod video;

// Re-export common types
pub use detection::{frame_timestamp, Detection, FrameRecord, UNKNOWN_CLASS_ID, UNKNOWN_CLASS_NAME};
pub use job::{Job, JobData, JobId, JobPhase, PhaseError};
pub use job_status::JobState;
pub use outcome::JobOutcome;
pub use result::{ErrorRecord, ResultArtifact, ResultDocument};
pub use video::{JobInfo, VideoMetadata};
