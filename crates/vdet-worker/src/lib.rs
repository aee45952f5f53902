//! Video detection worker.
//!
//! This crate provides:
//! - The job runner: validation, frame loop, result persistence, outcome
//! - Paced, monotonic progress reporting
//! - The queue executor with bounded concurrency and graceful shutdown
//! - Logging, metrics and retry helpers shared by the binaries

pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod progress;
pub mod retry;
pub mod runner;

pub use config::WorkerConfig;
pub use error::{JobFault, TelemetryFailure, WorkerError, WorkerResult};
pub use executor::{JobBroker, JobExecutor};
pub use logging::JobLogger;
pub use progress::{progress_percent, ProgressPacing, ProgressReporter};
pub use runner::{JobDefaults, JobRunner, RunOutcome};
