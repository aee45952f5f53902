//! Per-job progress reporting.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use vdet_models::JobId;
use vdet_queue::ProgressPublisher;

use crate::error::TelemetryFailure;
use crate::metrics;
use crate::retry::{retry_async, FailureTracker, RetryConfig};

/// Consecutive push failures logged before the rest are suppressed.
const MAX_LOGGED_PUSH_FAILURES: u32 = 3;

/// Percentage of `total` covered by `processed`, floored and capped at 100.
///
/// A run with no frames is complete by definition.
pub fn progress_percent(processed: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let pct = (processed as u128 * 100) / total as u128;
    pct.min(100) as u8
}

/// When an update is worth delivering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressPacing {
    /// Minimum movement in percentage points
    pub step: u8,
    /// Deliver any movement once this much time has passed since the last push
    pub min_interval: Duration,
}

impl Default for ProgressPacing {
    fn default() -> Self {
        Self {
            step: 1,
            min_interval: Duration::from_millis(250),
        }
    }
}

/// Forwards a job's progress to the broker.
///
/// The delivered sequence never decreases and always ends with 100 once
/// [`finish`](Self::finish) is called. Delivery failures are logged and
/// otherwise ignored.
pub struct ProgressReporter {
    job_id: JobId,
    publisher: Arc<dyn ProgressPublisher>,
    pacing: ProgressPacing,
    last_sent: Option<u8>,
    last_sent_at: Option<Instant>,
    failures: FailureTracker,
}

impl ProgressReporter {
    pub fn new(job_id: JobId, publisher: Arc<dyn ProgressPublisher>, pacing: ProgressPacing) -> Self {
        Self {
            job_id,
            publisher,
            pacing,
            last_sent: None,
            last_sent_at: None,
            failures: FailureTracker::new(MAX_LOGGED_PUSH_FAILURES),
        }
    }

    /// Last value handed to the publisher.
    pub fn last_sent(&self) -> Option<u8> {
        self.last_sent
    }

    /// Report a new value. Values above 100 are clamped.
    pub async fn update(&mut self, percent: u8) {
        let percent = percent.min(100);
        if !self.should_send(percent) {
            return;
        }
        self.mark_sent(percent);

        match self.publisher.publish_progress(&self.job_id, percent).await {
            Ok(()) => self.failures.record_success(),
            Err(source) => self.report_failure(TelemetryFailure {
                job_id: self.job_id.clone(),
                progress: percent,
                source,
            }),
        }
    }

    /// Deliver 100, retrying briefly. Idempotent.
    pub async fn finish(&mut self) {
        if self.last_sent == Some(100) {
            return;
        }
        self.mark_sent(100);

        let retry = RetryConfig::new("final progress push").with_max_retries(2);
        let publisher = &self.publisher;
        let job_id = &self.job_id;
        match retry_async(&retry, move || publisher.publish_progress(job_id, 100)).await {
            Ok(()) => self.failures.record_success(),
            Err(source) => self.report_failure(TelemetryFailure {
                job_id: self.job_id.clone(),
                progress: 100,
                source,
            }),
        }
    }

    fn should_send(&self, percent: u8) -> bool {
        let Some(last) = self.last_sent else {
            return true;
        };
        if percent < last {
            debug!(job_id = %self.job_id, last, percent, "Dropping regressive progress update");
            return false;
        }
        if percent == last {
            return false;
        }
        if percent == 100 || percent - last >= self.pacing.step {
            return true;
        }
        self.last_sent_at
            .map(|at| at.elapsed() >= self.pacing.min_interval)
            .unwrap_or(true)
    }

    fn mark_sent(&mut self, percent: u8) {
        self.last_sent = Some(percent);
        self.last_sent_at = Some(Instant::now());
    }

    fn report_failure(&mut self, failure: TelemetryFailure) {
        metrics::record_progress_push_failure();
        if self.failures.record_failure() {
            warn!(job_id = %failure.job_id, "{}", failure);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use vdet_queue::{QueueError, QueueResult};

    #[derive(Default)]
    struct Recorder {
        values: Mutex<Vec<u8>>,
        fail: bool,
    }

    #[async_trait]
    impl ProgressPublisher for Recorder {
        async fn publish_progress(&self, _job_id: &JobId, progress: u8) -> QueueResult<()> {
            self.values.lock().unwrap().push(progress);
            if self.fail {
                Err(QueueError::connection_failed("broker down"))
            } else {
                Ok(())
            }
        }
    }

    fn reporter(recorder: Arc<Recorder>, pacing: ProgressPacing) -> ProgressReporter {
        ProgressReporter::new(JobId::from_string("p"), recorder, pacing)
    }

    #[test]
    fn test_progress_percent() {
        assert_eq!(progress_percent(0, 10), 0);
        assert_eq!(progress_percent(1, 3), 33);
        assert_eq!(progress_percent(2, 3), 66);
        assert_eq!(progress_percent(10, 10), 100);
        assert_eq!(progress_percent(12, 10), 100);
        assert_eq!(progress_percent(0, 0), 100);
        assert_eq!(progress_percent(5, 0), 100);
        assert_eq!(progress_percent(u64::MAX, u64::MAX), 100);
    }

    #[tokio::test]
    async fn test_regressions_and_repeats_are_dropped() {
        let recorder = Arc::new(Recorder::default());
        let mut r = reporter(recorder.clone(), ProgressPacing::default());

        for p in [0, 10, 10, 5, 20, 150] {
            r.update(p).await;
        }
        r.finish().await;

        assert_eq!(*recorder.values.lock().unwrap(), vec![0, 10, 20, 100]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_pacing_with_interval_fallback() {
        let recorder = Arc::new(Recorder::default());
        let pacing = ProgressPacing {
            step: 10,
            min_interval: Duration::from_secs(1),
        };
        let mut r = reporter(recorder.clone(), pacing);

        r.update(0).await;
        r.update(3).await;
        r.update(10).await;
        r.update(12).await;
        tokio::time::advance(Duration::from_secs(2)).await;
        r.update(13).await;
        r.update(99).await;
        r.update(100).await;

        assert_eq!(*recorder.values.lock().unwrap(), vec![0, 10, 13, 99, 100]);
    }

    #[tokio::test]
    async fn test_finish_is_idempotent() {
        let recorder = Arc::new(Recorder::default());
        let mut r = reporter(recorder.clone(), ProgressPacing::default());

        r.update(100).await;
        r.finish().await;
        r.finish().await;

        assert_eq!(*recorder.values.lock().unwrap(), vec![100]);
        assert_eq!(r.last_sent(), Some(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_swallowed() {
        let recorder = Arc::new(Recorder {
            fail: true,
            ..Recorder::default()
        });
        let mut r = reporter(recorder.clone(), ProgressPacing::default());

        r.update(50).await;
        r.finish().await;

        // one push for 50, three attempts for the final 100
        assert_eq!(*recorder.values.lock().unwrap(), vec![50, 100, 100, 100]);
        assert_eq!(r.last_sent(), Some(100));
    }
}
