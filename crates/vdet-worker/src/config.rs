//! Worker configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::progress::ProgressPacing;
use crate::runner::JobDefaults;

/// Shortest period accepted for the claim scan and the job heartbeat.
const MIN_PERIOD: Duration = Duration::from_secs(1);

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent jobs
    pub max_concurrent_jobs: usize,
    /// Root directory for per-job result folders
    pub results_dir: PathBuf,
    /// Directory relative model references resolve against
    pub model_dir: Option<PathBuf>,
    /// Model used when a job does not name one
    pub default_model: String,
    /// Confidence threshold used when a job does not set one
    pub default_confidence: f32,
    /// Graceful shutdown timeout, applied once before and once after cancelling in-flight jobs
    pub shutdown_timeout: Duration,
    /// How often the worker should scan for orphaned pending jobs
    pub claim_interval: Duration,
    /// Minimum idle time before a pending job can be claimed (crash recovery)
    pub claim_min_idle: Duration,
    /// Interval for refreshing job ownership while processing (prevents premature reclamation)
    pub job_heartbeat_interval: Duration,
    /// Minimum progress movement, in percentage points, worth a push
    pub progress_step: u8,
    /// Push progress at least this often while it moves
    pub progress_min_interval: Duration,
    /// Prometheus exporter listen address; metrics are not exported when unset
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 1,
            results_dir: PathBuf::from("./temp_results"),
            model_dir: None,
            default_model: "models/yolov8n.onnx".to_string(),
            default_confidence: 0.25,
            shutdown_timeout: Duration::from_secs(30),
            claim_interval: Duration::from_secs(30),
            claim_min_idle: Duration::from_secs(300), // 5 minutes
            job_heartbeat_interval: Duration::from_secs(30),
            progress_step: 1,
            progress_min_interval: Duration::from_millis(250),
            metrics_addr: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            max_concurrent_jobs: env_parse("WORKER_MAX_JOBS", defaults.max_concurrent_jobs),
            results_dir: std::env::var("WORKER_RESULTS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.results_dir),
            model_dir: std::env::var("WORKER_MODEL_DIR").ok().map(PathBuf::from),
            default_model: std::env::var("WORKER_DEFAULT_MODEL").unwrap_or(defaults.default_model),
            default_confidence: env_parse("WORKER_DEFAULT_CONFIDENCE", defaults.default_confidence),
            shutdown_timeout: Duration::from_secs(env_parse("WORKER_SHUTDOWN_TIMEOUT", 30)),
            claim_interval: Duration::from_secs(env_parse("WORKER_CLAIM_INTERVAL_SECS", 30)),
            claim_min_idle: Duration::from_secs(env_parse("WORKER_CLAIM_MIN_IDLE_SECS", 300)),
            job_heartbeat_interval: Duration::from_secs(env_parse("WORKER_JOB_HEARTBEAT_SECS", 30)),
            progress_step: env_parse("WORKER_PROGRESS_STEP", defaults.progress_step),
            progress_min_interval: Duration::from_millis(env_parse(
                "WORKER_PROGRESS_MIN_INTERVAL_MS",
                250,
            )),
            metrics_addr: std::env::var("METRICS_ADDR").ok().and_then(|s| s.parse().ok()),
        }
        .normalized()
    }

    /// Clamp timing settings into a consistent range.
    ///
    /// Periodic timers need a non-zero period, and a running job's heartbeat
    /// must fire well before its message becomes claimable by other workers.
    pub fn normalized(mut self) -> Self {
        self.claim_interval = self.claim_interval.max(MIN_PERIOD);
        self.claim_min_idle = self.claim_min_idle.max(MIN_PERIOD * 2);
        self.job_heartbeat_interval = self.job_heartbeat_interval.max(MIN_PERIOD);

        if self.job_heartbeat_interval >= self.claim_min_idle {
            let adjusted = (self.claim_min_idle / 2).max(MIN_PERIOD);
            warn!(
                "Job heartbeat {:?} is not below claim min idle {:?}; using {:?}",
                self.job_heartbeat_interval, self.claim_min_idle, adjusted
            );
            self.job_heartbeat_interval = adjusted;
        }
        self.max_concurrent_jobs = self.max_concurrent_jobs.max(1);
        self.progress_step = self.progress_step.max(1);
        self
    }

    /// Parameters applied to jobs that leave them unset.
    pub fn job_defaults(&self) -> JobDefaults {
        JobDefaults {
            model: self.default_model.clone(),
            confidence: self.default_confidence,
        }
    }

    /// Progress push pacing.
    pub fn progress_pacing(&self) -> ProgressPacing {
        ProgressPacing {
            step: self.progress_step,
            min_interval: self.progress_min_interval,
        }
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
