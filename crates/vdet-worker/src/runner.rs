//! Job runner.
//!
//! Runs one job end to end: validates its input, writes the result header,
//! streams frames through the detector, appends one record per frame and
//! reports progress after each append. Every path out of [`JobRunner::run`]
//! is either a terminal [`JobOutcome`] with progress at 100, or
//! [`RunOutcome::Interrupted`] when shutdown cancelled the run between
//! frames.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;
use tracing::{debug, Instrument};
use validator::Validate;

use vdet_media::{
    map_detections, Detector, DetectorProvider, Frame, FrameSource, FrameSourceOpener, MediaError,
    RawDetection,
};
use vdet_models::{ErrorRecord, FrameRecord, Job, JobInfo, JobOutcome, JobPhase, VideoMetadata};
use vdet_queue::ProgressPublisher;
use vdet_storage::{ResultHandle, ResultStore};

use crate::error::JobFault;
use crate::logging::JobLogger;
use crate::metrics;
use crate::progress::{progress_percent, ProgressPacing, ProgressReporter};

/// Parameters applied when a job leaves them unset.
#[derive(Debug, Clone, PartialEq)]
pub struct JobDefaults {
    pub model: String,
    pub confidence: f32,
}

impl Default for JobDefaults {
    fn default() -> Self {
        Self {
            model: "models/yolov8n.onnx".to_string(),
            confidence: 0.25,
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Terminal outcome, to be recorded and acknowledged.
    Finished(JobOutcome),
    /// Cancelled between frames; the job must be redelivered.
    Interrupted { processed_frames: u64 },
}

/// Job input after defaults and validation.
struct ResolvedJob {
    video_path: String,
    model: String,
    confidence: f32,
}

/// Runs jobs against shared detectors, a frame source and a result store.
pub struct JobRunner {
    store: ResultStore,
    detectors: Arc<dyn DetectorProvider>,
    sources: Arc<dyn FrameSourceOpener>,
    progress: Arc<dyn ProgressPublisher>,
    defaults: JobDefaults,
    pacing: ProgressPacing,
}

impl JobRunner {
    pub fn new(
        store: ResultStore,
        detectors: Arc<dyn DetectorProvider>,
        sources: Arc<dyn FrameSourceOpener>,
        progress: Arc<dyn ProgressPublisher>,
    ) -> Self {
        Self {
            store,
            detectors,
            sources,
            progress,
            defaults: JobDefaults::default(),
            pacing: ProgressPacing::default(),
        }
    }

    pub fn with_defaults(mut self, defaults: JobDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_pacing(mut self, pacing: ProgressPacing) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    /// Run `job`. `cancel` flips to `true` when in-flight work must stop.
    pub async fn run(&self, job: &Job, cancel: &watch::Receiver<bool>) -> RunOutcome {
        let logger = JobLogger::new(&job.id, "detect");
        let span = logger.create_span();
        let started = Instant::now();
        metrics::record_job_started();

        let outcome = self.run_inner(job, cancel, &logger).instrument(span).await;

        match &outcome {
            RunOutcome::Finished(o) => {
                metrics::record_job_completed(o.status(), started.elapsed().as_secs_f64());
            }
            RunOutcome::Interrupted { .. } => metrics::record_job_interrupted(),
        }
        outcome
    }

    async fn run_inner(
        &self,
        job: &Job,
        cancel: &watch::Receiver<bool>,
        logger: &JobLogger,
    ) -> RunOutcome {
        let mut phase = JobPhase::Pending;
        let mut reporter =
            ProgressReporter::new(job.id.clone(), Arc::clone(&self.progress), self.pacing);

        logger.log_start(&job.data.video_path);
        advance(&mut phase, JobPhase::Validating);

        let mut sink = match self.store.open(&job.id).await {
            Ok(sink) => sink,
            Err(e) => {
                let fault = JobFault::internal(format!("Failed to open result store: {}", e));
                advance(&mut phase, JobPhase::Failed);
                logger.log_error(&fault.to_string());
                reporter.finish().await;
                return RunOutcome::Finished(JobOutcome::error(fault.to_string()));
            }
        };

        let prepared = match self.prepare(job).await {
            Ok(prepared) => prepared,
            Err(fault) => return self.fail(fault, &mut phase, &mut sink, &mut reporter, logger).await,
        };
        let (resolved, detector, mut source) = prepared;

        let info = source.info().clone();
        let total_frames = info.total_frames;
        let fps = info.fps;
        let video_info = VideoMetadata {
            path: resolved.video_path.clone(),
            total_frames,
            fps,
            width: info.width,
            height: info.height,
        };
        let job_info = JobInfo {
            id: job.id.clone(),
            model: resolved.model.clone(),
            confidence: resolved.confidence,
        };

        if let Err(e) = sink.write_header(video_info, job_info).await {
            let fault = JobFault::internal(format!("Failed to write result header: {}", e));
            return self.fail(fault, &mut phase, &mut sink, &mut reporter, logger).await;
        }
        advance(&mut phase, JobPhase::Initialized);
        reporter.update(progress_percent(0, total_frames)).await;

        logger.log_progress(&format!(
            "{} frames at {:.3} fps, {}x{}, model {}, confidence {}",
            total_frames, fps, info.width, info.height, resolved.model, resolved.confidence
        ));

        advance(&mut phase, JobPhase::Processing);
        let mut processed: u64 = 0;

        loop {
            if *cancel.borrow() {
                logger.log_warning(&format!("Interrupted after {} frames", processed));
                return RunOutcome::Interrupted {
                    processed_frames: processed,
                };
            }

            let frame_number = processed + 1;
            let frame = match source.next_frame().await {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    let fault = JobFault::processing(frame_number, format!("decode failed: {}", e));
                    return self.fail(fault, &mut phase, &mut sink, &mut reporter, logger).await;
                }
            };

            let inference_started = Instant::now();
            let raw = match detect(Arc::clone(&detector), frame, resolved.confidence).await {
                Ok(raw) => raw,
                Err(message) => {
                    let fault = JobFault::processing(frame_number, message);
                    return self.fail(fault, &mut phase, &mut sink, &mut reporter, logger).await;
                }
            };
            metrics::record_frame(inference_started.elapsed().as_secs_f64());

            let detections = map_detections(raw, |id| detector.class_name(id));
            debug!(frame = frame_number, detections = detections.len(), "Frame processed");

            let record = FrameRecord::new(frame_number, fps, detections);
            if let Err(e) = sink.append_frame(record).await {
                let fault = JobFault::processing(frame_number, format!("result write failed: {}", e));
                return self.fail(fault, &mut phase, &mut sink, &mut reporter, logger).await;
            }

            processed = frame_number;
            reporter.update(progress_percent(processed, total_frames)).await;
        }

        sink.seal();
        advance(&mut phase, JobPhase::Succeeded);
        reporter.finish().await;

        if processed != total_frames {
            logger.log_warning(&format!(
                "Decoder yielded {} frames, header reported {}",
                processed, total_frames
            ));
        }
        logger.log_completion(&format!("{} frames processed", processed));

        RunOutcome::Finished(JobOutcome::Success {
            processed_frames: processed,
            total_frames,
            result_location: sink.location().display().to_string(),
        })
    }

    /// Validate input, load the model and open the video.
    async fn prepare(
        &self,
        job: &Job,
    ) -> Result<(ResolvedJob, Arc<dyn Detector>, Box<dyn FrameSource>), JobFault> {
        let resolved = self.resolve(job)?;

        let provider = Arc::clone(&self.detectors);
        let model = resolved.model.clone();
        let detector = tokio::task::spawn_blocking(move || provider.load(&model))
            .await
            .map_err(|e| JobFault::internal(format!("Model loading task failed: {}", e)))?
            .map_err(|e| JobFault::input(format!("Failed to load model {}: {}", resolved.model, e)))?;

        let source = self
            .sources
            .open(Path::new(&resolved.video_path))
            .await
            .map_err(|e| open_fault(&resolved.video_path, e))?;

        Ok((resolved, detector, source))
    }

    /// Apply defaults and check parameters. The video must exist.
    fn resolve(&self, job: &Job) -> Result<ResolvedJob, JobFault> {
        job.data
            .validate()
            .map_err(|e| JobFault::input(format!("Invalid job parameters: {}", e)))?;

        let confidence = job.data.confidence.unwrap_or(self.defaults.confidence);
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(JobFault::input(format!(
                "Invalid job parameters: confidence {} outside [0, 1]",
                confidence
            )));
        }

        let video_path = job.data.video_path.clone();
        if !Path::new(&video_path).is_file() {
            return Err(JobFault::input(format!("Video file not found: {}", video_path)));
        }

        let model = job
            .data
            .model_ref
            .clone()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| self.defaults.model.clone());

        Ok(ResolvedJob {
            video_path,
            model,
            confidence,
        })
    }

    /// Terminal failure: progress 100, error record, error outcome.
    async fn fail(
        &self,
        fault: JobFault,
        phase: &mut JobPhase,
        sink: &mut ResultHandle,
        reporter: &mut ProgressReporter,
        logger: &JobLogger,
    ) -> RunOutcome {
        let message = fault.to_string();
        advance(phase, JobPhase::Failed);
        logger.log_error(&format!("{} fault: {}", fault.kind(), message));

        reporter.finish().await;

        if let Err(e) = sink.write_error(&ErrorRecord::now(message.clone())).await {
            logger.log_warning(&format!("Failed to persist error record: {}", e));
        }

        RunOutcome::Finished(JobOutcome::error(message))
    }
}

fn advance(phase: &mut JobPhase, next: JobPhase) {
    match phase.advance(next) {
        Ok(p) => {
            debug!(from = %phase, to = %p, "Job phase");
            *phase = p;
        }
        Err(e) => debug!("{}", e),
    }
}

fn open_fault(video_path: &str, e: MediaError) -> JobFault {
    match e {
        MediaError::FileNotFound(_) => JobFault::input(format!("Video file not found: {}", video_path)),
        e if e.is_input_error() => JobFault::input(format!("Cannot read video {}: {}", video_path, e)),
        e => JobFault::internal(format!("Failed to open video {}: {}", video_path, e)),
    }
}

/// Run inference on the blocking pool. A panicking detector becomes an error.
async fn detect(
    detector: Arc<dyn Detector>,
    frame: Frame,
    min_confidence: f32,
) -> Result<Vec<RawDetection>, String> {
    match tokio::task::spawn_blocking(move || detector.detect(&frame, min_confidence)).await {
        Ok(Ok(raw)) => Ok(raw),
        Ok(Err(e)) => Err(format!("detection failed: {}", e)),
        Err(e) if e.is_panic() => Err("detector panicked".to_string()),
        Err(e) => Err(format!("detection task failed: {}", e)),
    }
}
