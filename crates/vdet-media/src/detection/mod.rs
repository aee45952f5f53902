//! Object detection.
//!
//! The worker talks to inference only through [`Detector`] and
//! [`DetectorProvider`]; the ONNX backend is one implementation.

pub mod detector;
pub mod mapping;
pub mod object_detector;
pub mod registry;

pub use detector::{Detector, DetectorProvider, RawDetection};
pub use mapping::{map_detection, map_detections};
pub use object_detector::{ObjectDetector, ObjectDetectorConfig, COCO_CLASSES};
pub use registry::ModelRegistry;

#[cfg(test)]
pub use detector::MockDetector;
