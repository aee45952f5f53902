//! Redis Streams job queue.
//!
//! This crate provides:
//! - Job enqueueing and consumer-group consumption via Redis Streams
//! - Crash recovery by claiming idle pending messages, with a dead-letter stream
//! - Per-job records (progress, state, terminal outcome) in Redis hashes
//! - Progress events via Redis Pub/Sub

pub mod error;
pub mod progress;
pub mod queue;
pub mod record;

pub use error::{QueueError, QueueResult};
pub use progress::{ProgressChannel, ProgressEvent, ProgressPublisher};
pub use queue::{Delivery, JobQueue, QueueConfig};
pub use record::{JobKeys, JobRecord, JOB_RECORD_TTL_SECS};
