//! Prometheus metrics for the worker.

use std::net::SocketAddr;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::{WorkerError, WorkerResult};

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_STARTED_TOTAL: &str = "vdet_jobs_started_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "vdet_jobs_completed_total";
    pub const JOBS_INTERRUPTED_TOTAL: &str = "vdet_jobs_interrupted_total";
    pub const JOBS_DEAD_LETTERED_TOTAL: &str = "vdet_jobs_dead_lettered_total";
    pub const FRAMES_PROCESSED_TOTAL: &str = "vdet_frames_processed_total";
    pub const PROGRESS_PUSH_FAILURES_TOTAL: &str = "vdet_progress_push_failures_total";
    pub const JOB_DURATION_SECONDS: &str = "vdet_job_duration_seconds";
    pub const FRAME_INFERENCE_SECONDS: &str = "vdet_frame_inference_seconds";
}

/// Serve metrics on `addr` at `/metrics`. Must run inside the Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> WorkerResult<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::config_error(format!("metrics exporter: {}", e)))
}

pub fn record_job_started() {
    counter!(names::JOBS_STARTED_TOTAL).increment(1);
}

/// Record a terminal outcome with its status and run time.
pub fn record_job_completed(status: &'static str, duration_secs: f64) {
    counter!(names::JOBS_COMPLETED_TOTAL, "status" => status).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, "status" => status).record(duration_secs);
}

pub fn record_job_interrupted() {
    counter!(names::JOBS_INTERRUPTED_TOTAL).increment(1);
}

pub fn record_job_dead_lettered() {
    counter!(names::JOBS_DEAD_LETTERED_TOTAL).increment(1);
}

pub fn record_frame(inference_secs: f64) {
    counter!(names::FRAMES_PROCESSED_TOTAL).increment(1);
    histogram!(names::FRAME_INFERENCE_SECONDS).record(inference_secs);
}

pub fn record_progress_push_failure() {
    counter!(names::PROGRESS_PUSH_FAILURES_TOTAL).increment(1);
}
