//! Frame decoding and object detection adapters.
//!
//! This crate provides:
//! - FFprobe header probing (frame count, fps, dimensions)
//! - A streaming FFmpeg frame source yielding RGB24 frames in order
//! - The `Detector` seam and a YOLOv8 ONNX implementation
//! - Total mapping from raw detector output to result records
//! - A model registry sharing loaded weights across jobs

pub mod detection;
pub mod error;
pub mod frame;
pub mod probe;
pub mod source;

pub use detection::{
    map_detection, map_detections, Detector, DetectorProvider, ModelRegistry, ObjectDetector,
    ObjectDetectorConfig, RawDetection, COCO_CLASSES,
};
pub use error::{MediaError, MediaResult};
pub use frame::Frame;
pub use probe::{probe_video, VideoInfo};
pub use source::{FfmpegFrameSource, FfmpegSourceOpener, FrameSource, FrameSourceOpener, SourceInfo};
