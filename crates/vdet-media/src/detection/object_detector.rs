//! Object detection using YOLOv8 ONNX models.
//!
//! Execution provider selection:
//! - CUDA on Linux with NVIDIA GPU (when the `cuda` feature is enabled)
//! - CoreML on macOS
//! - CPU fallback on all platforms

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use image::{DynamicImage, ImageBuffer, Rgb};
use ndarray::Array;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::{Tensor, Value};
use tracing::{debug, info};

use super::detector::{Detector, RawDetection};
use crate::error::{MediaError, MediaResult};
use crate::frame::Frame;

/// COCO class names (80 classes).
pub const COCO_CLASSES: &[&str] = &[
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck",
    "boat", "traffic light", "fire hydrant", "stop sign", "parking meter", "bench",
    "bird", "cat", "dog", "horse", "sheep", "cow", "elephant", "bear", "zebra",
    "giraffe", "backpack", "umbrella", "handbag", "tie", "suitcase", "frisbee",
    "skis", "snowboard", "sports ball", "kite", "baseball bat", "baseball glove",
    "skateboard", "surfboard", "tennis racket", "bottle", "wine glass", "cup",
    "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch",
    "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse",
    "remote", "keyboard", "cell phone", "microwave", "oven", "toaster", "sink",
    "refrigerator", "book", "clock", "vase", "scissors", "teddy bear", "hair drier",
    "toothbrush",
];

/// Configuration for object detection.
#[derive(Debug, Clone)]
pub struct ObjectDetectorConfig {
    /// Path to ONNX model file
    pub model_path: PathBuf,
    /// Class labels in model output order
    pub class_names: Vec<String>,
    /// IoU threshold for NMS
    pub nms_threshold: f32,
    /// Input image size (model expects square input)
    pub input_size: u32,
}

impl ObjectDetectorConfig {
    /// COCO-trained model at `model_path` with default thresholds.
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            ..Self::default()
        }
    }

    /// Override the class labels.
    pub fn with_class_names(mut self, names: Vec<String>) -> Self {
        self.class_names = names;
        self
    }
}

impl Default for ObjectDetectorConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/yolov8n.onnx"),
            class_names: COCO_CLASSES.iter().map(|s| s.to_string()).collect(),
            nms_threshold: 0.45,
            input_size: 640,
        }
    }
}

/// Axis-aligned box in original frame pixels.
#[derive(Debug, Clone, PartialEq)]
struct Candidate {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    class_id: usize,
    confidence: f32,
}

impl Candidate {
    fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }
}

/// Object detector backed by a YOLOv8 ONNX session.
pub struct ObjectDetector {
    session: Mutex<Session>,
    config: ObjectDetectorConfig,
}

impl ObjectDetector {
    /// Load the model described by `config`.
    ///
    /// Returns `ModelNotFound` if the model file doesn't exist.
    pub fn new(config: ObjectDetectorConfig) -> MediaResult<Self> {
        if !config.model_path.exists() {
            return Err(MediaError::model_not_found(
                config.model_path.display().to_string(),
            ));
        }
        if config.class_names.is_empty() {
            return Err(MediaError::model_not_found(format!(
                "{} (no class labels)",
                config.model_path.display()
            )));
        }

        let session = Mutex::new(create_session(&config.model_path)?);
        info!(
            model_path = %config.model_path.display(),
            input_size = config.input_size,
            classes = config.class_names.len(),
            "Object detector initialized"
        );

        Ok(Self { session, config })
    }

    /// Get the configuration.
    pub fn config(&self) -> &ObjectDetectorConfig {
        &self.config
    }

    /// Convert a decoded frame to an image.
    fn frame_to_image(frame: &Frame) -> MediaResult<DynamicImage> {
        let expected_len = Frame::byte_len(frame.width, frame.height);
        if frame.data.len() != expected_len {
            return Err(MediaError::internal(format!(
                "Invalid image data length: expected {}, got {}",
                expected_len,
                frame.data.len()
            )));
        }

        let img_buffer: ImageBuffer<Rgb<u8>, Vec<u8>> =
            ImageBuffer::from_raw(frame.width, frame.height, frame.data.clone())
                .ok_or_else(|| MediaError::internal("Failed to create image buffer"))?;

        Ok(DynamicImage::ImageRgb8(img_buffer))
    }

    /// Resize to the model input, normalize to [0, 1], lay out as NCHW.
    fn preprocess(&self, img: &DynamicImage) -> MediaResult<Value> {
        let input_size = self.config.input_size;

        let resized = img.resize_exact(
            input_size,
            input_size,
            image::imageops::FilterType::Triangle,
        );

        let rgb = resized.to_rgb8();
        let (w, h) = (input_size as usize, input_size as usize);

        let mut chw_data: Vec<f32> = Vec::with_capacity(3 * h * w);
        for c in 0..3 {
            for y in 0..h {
                for x in 0..w {
                    let pixel = rgb.get_pixel(x as u32, y as u32);
                    chw_data.push(pixel[c] as f32 / 255.0);
                }
            }
        }

        let shape = vec![1usize, 3, h, w];
        Tensor::from_array((shape, chw_data.into_boxed_slice()))
            .map(Value::from)
            .map_err(|e| MediaError::internal(format!("Failed to create tensor: {}", e)))
    }

    fn run_inference(&self, input: Value) -> MediaResult<Vec<f32>> {
        let mut session = self
            .session
            .lock()
            .map_err(|_| MediaError::internal("Session lock poisoned"))?;

        let outputs = session
            .run(ort::inputs![input])
            .map_err(|e| MediaError::detection_failed(format!("ONNX inference failed: {}", e)))?;

        let output = outputs
            .get("output0")
            .ok_or_else(|| MediaError::detection_failed("Missing output0 tensor"))?;

        let tensor = output
            .try_extract_tensor::<f32>()
            .map_err(|e| MediaError::detection_failed(format!("Failed to extract tensor: {}", e)))?;

        Ok(tensor.1.iter().copied().collect())
    }
}

impl Detector for ObjectDetector {
    fn detect(&self, frame: &Frame, min_confidence: f32) -> MediaResult<Vec<RawDetection>> {
        let img = Self::frame_to_image(frame)?;
        let input = self.preprocess(&img)?;
        let outputs = self.run_inference(input)?;

        let candidates = decode_output(
            &outputs,
            self.config.class_names.len(),
            self.config.input_size,
            (frame.width, frame.height),
            min_confidence,
        )?;
        let kept = non_maximum_suppression(candidates, self.config.nms_threshold);

        debug!(count = kept.len(), "Object detection completed");

        Ok(kept
            .into_iter()
            .map(|c| RawDetection::new([c.x1, c.y1, c.x2, c.y2], c.confidence, c.class_id as i64))
            .collect())
    }

    fn class_name(&self, class_id: i64) -> Option<String> {
        let idx = usize::try_from(class_id).ok()?;
        self.config.class_names.get(idx).cloned()
    }
}

/// Decode a YOLOv8 output tensor.
///
/// The tensor is `[1, 4 + classes, boxes]`: per candidate a `cx, cy, w, h`
/// box in model input pixels followed by one score per class.
fn decode_output(
    outputs: &[f32],
    num_classes: usize,
    input_size: u32,
    (orig_width, orig_height): (u32, u32),
    min_confidence: f32,
) -> MediaResult<Vec<Candidate>> {
    let num_features = 4 + num_classes;
    if outputs.is_empty() || outputs.len() % num_features != 0 {
        return Err(MediaError::detection_failed(format!(
            "Unexpected output size {} for {} classes",
            outputs.len(),
            num_classes
        )));
    }
    let num_boxes = outputs.len() / num_features;

    let output_array = Array::from_shape_vec((num_features, num_boxes), outputs.to_vec())
        .map_err(|e| MediaError::detection_failed(format!("Failed to reshape output: {}", e)))?;
    let transposed = output_array.t();

    let input_size = input_size as f32;
    let scale_w = orig_width as f32 / input_size;
    let scale_h = orig_height as f32 / input_size;
    let max_x = orig_width as f32;
    let max_y = orig_height as f32;

    let mut candidates = Vec::new();
    for i in 0..num_boxes {
        let cx = transposed[[i, 0]];
        let cy = transposed[[i, 1]];
        let w = transposed[[i, 2]];
        let h = transposed[[i, 3]];

        let mut best_class = 0;
        let mut best_score = f32::MIN;
        for c in 0..num_classes {
            let score = transposed[[i, 4 + c]];
            if score > best_score {
                best_score = score;
                best_class = c;
            }
        }

        if !best_score.is_finite() || best_score < min_confidence {
            continue;
        }

        candidates.push(Candidate {
            x1: ((cx - w / 2.0) * scale_w).clamp(0.0, max_x),
            y1: ((cy - h / 2.0) * scale_h).clamp(0.0, max_y),
            x2: ((cx + w / 2.0) * scale_w).clamp(0.0, max_x),
            y2: ((cy + h / 2.0) * scale_h).clamp(0.0, max_y),
            class_id: best_class,
            confidence: best_score,
        });
    }

    Ok(candidates)
}

/// Drop same-class boxes overlapping a stronger one by more than `iou_threshold`.
fn non_maximum_suppression(mut detections: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<Candidate> = Vec::with_capacity(detections.len());
    for det in detections {
        let suppressed = keep
            .iter()
            .any(|k| k.class_id == det.class_id && compute_iou(k, &det) > iou_threshold);
        if !suppressed {
            keep.push(det);
        }
    }
    keep
}

fn compute_iou(a: &Candidate, b: &Candidate) -> f32 {
    let inter_w = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0.0);
    let inter_h = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0.0);
    let intersection = inter_w * inter_h;
    let union = a.area() + b.area() - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

/// Create ONNX Runtime session with automatic execution provider selection.
fn create_session(model_path: &Path) -> MediaResult<Session> {
    let model_bytes = std::fs::read(model_path)
        .map_err(|e| MediaError::internal(format!("Failed to read model file: {}", e)))?;

    let builder = Session::builder()
        .map_err(|e| MediaError::internal(format!("Failed to create session builder: {}", e)))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| MediaError::internal(format!("Failed to set optimization level: {}", e)))?;

    #[cfg(all(target_os = "linux", feature = "cuda"))]
    {
        use ort::execution_providers::CUDAExecutionProvider;
        if let Ok(cuda_builder) = builder
            .clone()
            .with_execution_providers([CUDAExecutionProvider::default().build()])
        {
            if let Ok(session) = cuda_builder.commit_from_memory(&model_bytes) {
                info!("Using CUDA execution provider for object detection");
                return Ok(session);
            }
        }
        debug!("CUDA execution provider not available, trying alternatives");
    }

    #[cfg(target_os = "macos")]
    {
        use ort::execution_providers::CoreMLExecutionProvider;
        if let Ok(coreml_builder) = builder
            .clone()
            .with_execution_providers([CoreMLExecutionProvider::default().build()])
        {
            if let Ok(session) = coreml_builder.commit_from_memory(&model_bytes) {
                info!("Using CoreML execution provider for object detection");
                return Ok(session);
            }
        }
        debug!("CoreML execution provider not available, using CPU");
    }

    info!("Using CPU execution provider for object detection");
    builder
        .commit_from_memory(&model_bytes)
        .map_err(|e| MediaError::model_not_found(format!("{}: {}", model_path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(x1: f32, y1: f32, x2: f32, y2: f32, class_id: usize, confidence: f32) -> Candidate {
        Candidate {
            x1,
            y1,
            x2,
            y2,
            class_id,
            confidence,
        }
    }

    /// Build a `[4 + classes, boxes]` tensor from per-box rows.
    fn tensor(rows: &[Vec<f32>]) -> Vec<f32> {
        let features = rows[0].len();
        let mut out = Vec::with_capacity(features * rows.len());
        for f in 0..features {
            for row in rows {
                out.push(row[f]);
            }
        }
        out
    }

    #[test]
    fn test_coco_classes() {
        assert_eq!(COCO_CLASSES[0], "person");
        assert_eq!(COCO_CLASSES[2], "car");
        assert_eq!(COCO_CLASSES.len(), 80);
    }

    #[test]
    fn test_config_default() {
        let config = ObjectDetectorConfig::default();
        assert_eq!(config.input_size, 640);
        assert_eq!(config.class_names.len(), 80);
        assert!((config.nms_threshold - 0.45).abs() < 0.001);
    }

    #[test]
    fn test_missing_model_is_reported() {
        let err = ObjectDetector::new(ObjectDetectorConfig::new("/nonexistent/model.onnx"))
            .err()
            .expect("missing model must fail");
        assert!(matches!(err, MediaError::ModelNotFound(_)));
        assert!(err.is_input_error());
    }

    #[test]
    fn test_decode_scales_to_frame_pixels() {
        // 2 classes, 2 boxes; model input 100px, frame 200x50
        let outputs = tensor(&[
            vec![50.0, 50.0, 20.0, 40.0, 0.1, 0.9],
            vec![10.0, 10.0, 4.0, 4.0, 0.05, 0.1],
        ]);

        let decoded = decode_output(&outputs, 2, 100, (200, 50), 0.5).unwrap();

        assert_eq!(decoded.len(), 1);
        let c = &decoded[0];
        assert_eq!(c.class_id, 1);
        assert!((c.x1 - 80.0).abs() < 1e-4);
        assert!((c.x2 - 120.0).abs() < 1e-4);
        assert!((c.y1 - 15.0).abs() < 1e-4);
        assert!((c.y2 - 35.0).abs() < 1e-4);
    }

    #[test]
    fn test_decode_clamps_to_frame() {
        let outputs = tensor(&[vec![2.0, 98.0, 10.0, 10.0, 0.8]]);
        let decoded = decode_output(&outputs, 1, 100, (100, 100), 0.25).unwrap();

        let c = &decoded[0];
        assert_eq!(c.x1, 0.0);
        assert_eq!(c.y2, 100.0);
    }

    #[test]
    fn test_decode_rejects_mismatched_layout() {
        let err = decode_output(&[0.0; 7], 2, 640, (10, 10), 0.25).unwrap_err();
        assert!(matches!(err, MediaError::DetectionFailed(_)));
    }

    #[test]
    fn test_nms_suppresses_same_class_overlap() {
        let kept = non_maximum_suppression(
            vec![
                candidate(0.0, 0.0, 10.0, 10.0, 0, 0.6),
                candidate(1.0, 1.0, 10.0, 10.0, 0, 0.9),
                candidate(1.0, 1.0, 10.0, 10.0, 3, 0.5),
                candidate(50.0, 50.0, 60.0, 60.0, 0, 0.4),
            ],
            0.45,
        );

        assert_eq!(kept.len(), 3);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].class_id, 3);
        assert_eq!(kept[2].x1, 50.0);
    }

    #[test]
    fn test_iou() {
        let a = candidate(0.0, 0.0, 2.0, 2.0, 0, 1.0);
        let b = candidate(1.0, 0.0, 3.0, 2.0, 0, 1.0);
        let far = candidate(5.0, 5.0, 6.0, 6.0, 0, 1.0);

        assert!((compute_iou(&a, &a) - 1.0).abs() < 1e-6);
        assert!((compute_iou(&a, &b) - 1.0 / 3.0).abs() < 1e-6);
        assert_eq!(compute_iou(&a, &far), 0.0);
    }
}
