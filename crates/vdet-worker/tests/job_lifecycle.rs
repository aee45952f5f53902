//! End-to-end job runs against in-memory frame sources and detectors.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::watch;

use vdet_media::{
    Detector, DetectorProvider, Frame, FrameSource, FrameSourceOpener, MediaError, MediaResult,
    RawDetection, SourceInfo,
};
use vdet_models::{Job, JobId, JobOutcome, ResultArtifact, ResultDocument};
use vdet_queue::{ProgressPublisher, QueueResult};
use vdet_storage::ResultStore;
use vdet_worker::{JobRunner, RunOutcome};

/// Yields `frames` black frames while reporting `reported_total` in its header.
struct FakeOpener {
    frames: u64,
    reported_total: u64,
    fps: f64,
}

impl FakeOpener {
    fn new(frames: u64) -> Self {
        Self {
            frames,
            reported_total: frames,
            fps: 25.0,
        }
    }
}

struct FakeSource {
    info: SourceInfo,
    remaining: u64,
}

#[async_trait]
impl FrameSourceOpener for FakeOpener {
    async fn open(&self, path: &Path) -> MediaResult<Box<dyn FrameSource>> {
        Ok(Box::new(FakeSource {
            info: SourceInfo {
                path: path.to_path_buf(),
                total_frames: self.reported_total,
                fps: self.fps,
                width: 8,
                height: 6,
            },
            remaining: self.frames,
        }))
    }
}

#[async_trait]
impl FrameSource for FakeSource {
    fn info(&self) -> &SourceInfo {
        &self.info
    }

    async fn next_frame(&mut self) -> MediaResult<Option<Frame>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        Ok(Some(Frame::black(self.info.width, self.info.height)))
    }
}

/// Detector whose behavior is keyed on the 1-based call number.
#[derive(Default)]
struct ScriptedDetector {
    calls: AtomicU64,
    detections: Vec<RawDetection>,
    fail_at: Option<u64>,
    panic_at: Option<u64>,
    cancel_at: Option<(u64, watch::Sender<bool>)>,
    /// Result document to inspect before each frame
    watch_results: Option<PathBuf>,
    /// Frames already persisted when each call started
    persisted: Mutex<Vec<usize>>,
}

impl Detector for ScriptedDetector {
    fn detect(&self, _frame: &Frame, _min_confidence: f32) -> MediaResult<Vec<RawDetection>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(path) = &self.watch_results {
            let bytes = std::fs::read(path).expect("header must exist before any frame");
            let doc: ResultDocument = serde_json::from_slice(&bytes).unwrap();
            self.persisted.lock().unwrap().push(doc.frames.len());
        }
        if self.panic_at == Some(call) {
            panic!("inference blew up");
        }
        if self.fail_at == Some(call) {
            return Err(MediaError::detection_failed("tensor shape mismatch"));
        }
        if let Some((at, tx)) = &self.cancel_at {
            if *at == call {
                let _ = tx.send(true);
            }
        }
        Ok(self.detections.clone())
    }

    fn class_name(&self, class_id: i64) -> Option<String> {
        (class_id == 0).then(|| "person".to_string())
    }
}

struct FakeProvider(Arc<ScriptedDetector>);

impl DetectorProvider for FakeProvider {
    fn load(&self, _model_ref: &str) -> MediaResult<Arc<dyn Detector>> {
        Ok(self.0.clone())
    }
}

#[derive(Default)]
struct Recorder {
    values: Mutex<Vec<u8>>,
}

#[async_trait]
impl ProgressPublisher for Recorder {
    async fn publish_progress(&self, _job_id: &JobId, progress: u8) -> QueueResult<()> {
        self.values.lock().unwrap().push(progress);
        Ok(())
    }
}

struct Harness {
    dir: tempfile::TempDir,
    video: PathBuf,
    progress: Arc<Recorder>,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("clip.mp4");
        std::fs::write(&video, b"not really a video").unwrap();
        Self {
            dir,
            video,
            progress: Arc::new(Recorder::default()),
        }
    }

    fn store(&self) -> ResultStore {
        ResultStore::new(self.dir.path().join("results"))
    }

    fn runner(&self, opener: FakeOpener, detector: Arc<ScriptedDetector>) -> JobRunner {
        JobRunner::new(
            self.store(),
            Arc::new(FakeProvider(detector)),
            Arc::new(opener),
            self.progress.clone(),
        )
    }

    fn job(&self, id: &str) -> Job {
        Job::new(self.video.to_string_lossy()).with_id(id)
    }

    fn progress(&self) -> Vec<u8> {
        self.progress.values.lock().unwrap().clone()
    }

    async fn document(&self, id: &str) -> ResultDocument {
        match self.store().load(&JobId::from_string(id)).await.unwrap() {
            ResultArtifact::Document(doc) => doc,
            other => panic!("expected result document, got {:?}", other),
        }
    }
}

fn not_cancelled() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    // Keep the channel open for the whole test.
    std::mem::forget(tx);
    rx
}

fn assert_monotonic_to_100(values: &[u8]) {
    assert!(!values.is_empty());
    assert!(values.windows(2).all(|w| w[0] <= w[1]), "{:?}", values);
    assert_eq!(values.last(), Some(&100), "{:?}", values);
}

fn error_message(outcome: RunOutcome) -> String {
    match outcome {
        RunOutcome::Finished(JobOutcome::Error { message }) => message,
        other => panic!("expected error outcome, got {:?}", other),
    }
}

#[tokio::test]
async fn test_empty_scene_succeeds() {
    let h = Harness::new();
    let detector = Arc::new(ScriptedDetector::default());
    let runner = h.runner(FakeOpener::new(10), detector);

    let outcome = runner.run(&h.job("a"), &not_cancelled()).await;

    let expected_location = h.store().results_path(&JobId::from_string("a"));
    assert_eq!(
        outcome,
        RunOutcome::Finished(JobOutcome::Success {
            processed_frames: 10,
            total_frames: 10,
            result_location: expected_location.display().to_string(),
        })
    );

    let doc = h.document("a").await;
    assert_eq!(doc.video_info.total_frames, 10);
    assert_eq!(doc.job_info.id.as_str(), "a");
    assert_eq!(doc.job_info.model, "models/yolov8n.onnx");
    assert!((doc.job_info.confidence - 0.25).abs() < f32::EPSILON);
    assert_eq!(doc.frames.len(), 10);
    for (i, frame) in doc.frames.iter().enumerate() {
        assert_eq!(frame.frame_number, i as u64 + 1);
        assert!(frame.detections.is_empty());
        assert!((frame.timestamp - (i as f64 + 1.0) / 25.0).abs() < 1e-9);
    }

    assert_eq!(h.progress(), vec![0, 10, 20, 30, 40, 50, 60, 70, 80, 90, 100]);
}

#[tokio::test]
async fn test_detections_are_mapped() {
    let h = Harness::new();
    let detector = Arc::new(ScriptedDetector {
        detections: vec![
            RawDetection::new([1.0, 2.0, 30.0, 40.0], 0.9, 0),
            RawDetection::new([5.0, 5.0, 6.0, 6.0], 0.5, 7),
        ],
        ..ScriptedDetector::default()
    });
    let runner = h.runner(FakeOpener::new(2), detector);

    runner.run(&h.job("mapped"), &not_cancelled()).await;

    let doc = h.document("mapped").await;
    let first = &doc.frames[0].detections;
    assert_eq!(first.len(), 2);
    assert_eq!(first[0].bbox, vec![1.0, 2.0, 30.0, 40.0]);
    assert_eq!(first[0].class_name, "person");
    assert_eq!(first[1].class_id, 7);
    assert_eq!(first[1].class_name, "unknown");
}

#[tokio::test]
async fn test_missing_video_fails_before_processing() {
    let h = Harness::new();
    let detector = Arc::new(ScriptedDetector::default());
    let runner = h.runner(FakeOpener::new(10), detector.clone());

    let job = Job::new("/definitely/not/here.mp4").with_id("b");
    let message = error_message(runner.run(&job, &not_cancelled()).await);

    assert_eq!(message, "Video file not found: /definitely/not/here.mp4");
    assert_eq!(detector.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.progress(), vec![100]);

    match h.store().load(&JobId::from_string("b")).await.unwrap() {
        ResultArtifact::Error(record) => assert_eq!(record.message, message),
        other => panic!("expected error record, got {:?}", other),
    }
}

#[tokio::test]
async fn test_detector_failure_keeps_prior_frames() {
    let h = Harness::new();
    let detector = Arc::new(ScriptedDetector {
        fail_at: Some(5),
        ..ScriptedDetector::default()
    });
    let runner = h.runner(FakeOpener::new(10), detector);

    let message = error_message(runner.run(&h.job("c"), &not_cancelled()).await);
    assert!(message.contains("frame 5"), "{}", message);

    let doc = h.document("c").await;
    let numbers: Vec<u64> = doc.frames.iter().map(|f| f.frame_number).collect();
    assert_eq!(numbers, vec![1, 2, 3, 4]);

    let record = h
        .store()
        .load_error(&JobId::from_string("c"))
        .await
        .unwrap()
        .expect("error record");
    assert_eq!(record.message, message);

    let progress = h.progress();
    assert_monotonic_to_100(&progress);
    assert_eq!(progress, vec![0, 10, 20, 30, 40, 100]);
}

#[tokio::test]
async fn test_unknown_fps_gives_zero_timestamps() {
    let h = Harness::new();
    let opener = FakeOpener {
        fps: 0.0,
        ..FakeOpener::new(3)
    };
    let runner = h.runner(opener, Arc::new(ScriptedDetector::default()));

    runner.run(&h.job("d"), &not_cancelled()).await;

    let doc = h.document("d").await;
    assert_eq!(doc.frames.len(), 3);
    assert!(doc.frames.iter().all(|f| f.timestamp == 0.0));
}

#[tokio::test]
async fn test_zero_frame_video_reports_only_100() {
    let h = Harness::new();
    let runner = h.runner(FakeOpener::new(0), Arc::new(ScriptedDetector::default()));

    let outcome = runner.run(&h.job("empty"), &not_cancelled()).await;

    assert!(matches!(
        outcome,
        RunOutcome::Finished(JobOutcome::Success {
            processed_frames: 0,
            total_frames: 0,
            ..
        })
    ));
    assert_eq!(h.progress(), vec![100]);
    assert!(h.document("empty").await.frames.is_empty());
}

#[tokio::test]
async fn test_unknown_total_processes_every_frame() {
    let h = Harness::new();
    let opener = FakeOpener {
        reported_total: 0,
        ..FakeOpener::new(4)
    };
    let runner = h.runner(opener, Arc::new(ScriptedDetector::default()));

    runner.run(&h.job("unknown-total"), &not_cancelled()).await;

    assert_eq!(h.document("unknown-total").await.frames.len(), 4);
    assert!(h.progress().iter().all(|&p| p == 100));
}

#[tokio::test]
async fn test_decoder_yields_fewer_frames_than_header() {
    let h = Harness::new();
    let opener = FakeOpener {
        reported_total: 10,
        ..FakeOpener::new(6)
    };
    let runner = h.runner(opener, Arc::new(ScriptedDetector::default()));

    let outcome = runner.run(&h.job("short"), &not_cancelled()).await;

    match outcome {
        RunOutcome::Finished(JobOutcome::Success {
            processed_frames,
            total_frames,
            ..
        }) => {
            assert_eq!(processed_frames, 6);
            assert_eq!(total_frames, 10);
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_monotonic_to_100(&h.progress());
}

#[tokio::test]
async fn test_decoder_yields_more_frames_than_header() {
    let h = Harness::new();
    let opener = FakeOpener {
        reported_total: 4,
        ..FakeOpener::new(6)
    };
    let runner = h.runner(opener, Arc::new(ScriptedDetector::default()));

    runner.run(&h.job("long"), &not_cancelled()).await;

    let doc = h.document("long").await;
    assert_eq!(doc.frames.len(), 6);
    assert_eq!(doc.frames.last().map(|f| f.frame_number), Some(6));
    let progress = h.progress();
    assert_monotonic_to_100(&progress);
    assert!(progress.iter().all(|&p| p <= 100));
}

#[tokio::test]
async fn test_header_is_persisted_before_each_frame() {
    let h = Harness::new();
    let detector = Arc::new(ScriptedDetector {
        watch_results: Some(h.store().results_path(&JobId::from_string("hdr"))),
        ..ScriptedDetector::default()
    });
    let runner = h.runner(FakeOpener::new(5), detector.clone());

    runner.run(&h.job("hdr"), &not_cancelled()).await;

    assert_eq!(*detector.persisted.lock().unwrap(), vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn test_detector_panic_is_a_processing_error() {
    let h = Harness::new();
    let detector = Arc::new(ScriptedDetector {
        panic_at: Some(2),
        ..ScriptedDetector::default()
    });
    let runner = h.runner(FakeOpener::new(4), detector);

    let message = error_message(runner.run(&h.job("panic"), &not_cancelled()).await);

    assert_eq!(message, "Processing failed at frame 2: detector panicked");
    assert_eq!(h.document("panic").await.frames.len(), 1);
    assert_eq!(h.progress().last(), Some(&100));
}

#[tokio::test]
async fn test_invalid_confidence_is_rejected() {
    let h = Harness::new();
    let detector = Arc::new(ScriptedDetector::default());
    let runner = h.runner(FakeOpener::new(3), detector.clone());

    let job = h.job("conf").with_confidence(1.5);
    let message = error_message(runner.run(&job, &not_cancelled()).await);

    assert!(message.starts_with("Invalid job parameters"), "{}", message);
    assert_eq!(detector.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.progress(), vec![100]);
}

#[tokio::test]
async fn test_cancellation_interrupts_between_frames() {
    let h = Harness::new();
    let (tx, rx) = watch::channel(false);
    let detector = Arc::new(ScriptedDetector {
        cancel_at: Some((3, tx)),
        ..ScriptedDetector::default()
    });
    let runner = h.runner(FakeOpener::new(10), detector);

    let outcome = runner.run(&h.job("cancel"), &rx).await;

    assert_eq!(outcome, RunOutcome::Interrupted { processed_frames: 3 });
    assert_eq!(h.document("cancel").await.frames.len(), 3);
    assert!(!h.progress().contains(&100));
}

#[tokio::test]
async fn test_redelivered_job_starts_over() {
    let h = Harness::new();

    let (tx, rx) = watch::channel(false);
    let first = Arc::new(ScriptedDetector {
        cancel_at: Some((2, tx)),
        ..ScriptedDetector::default()
    });
    h.runner(FakeOpener::new(5), first)
        .run(&h.job("again"), &rx)
        .await;

    let outcome = h
        .runner(FakeOpener::new(5), Arc::new(ScriptedDetector::default()))
        .run(&h.job("again"), &not_cancelled())
        .await;

    assert!(matches!(outcome, RunOutcome::Finished(JobOutcome::Success { .. })));
    let numbers: Vec<u64> = h
        .document("again")
        .await
        .frames
        .iter()
        .map(|f| f.frame_number)
        .collect();
    assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
}
