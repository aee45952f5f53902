//! Detector seam.

use std::sync::Arc;

use crate::error::MediaResult;
use crate::frame::Frame;

/// Detector output before validation.
///
/// Every field is optional: backends report whatever they have and
/// [`map_detection`](super::map_detection) fills the gaps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawDetection {
    /// Box corners, expected as `[x1, y1, x2, y2]`
    pub bbox: Option<Vec<f32>>,
    pub confidence: Option<f32>,
    pub class_id: Option<i64>,
}

impl RawDetection {
    /// A fully populated detection.
    pub fn new(bbox: [f32; 4], confidence: f32, class_id: i64) -> Self {
        Self {
            bbox: Some(bbox.to_vec()),
            confidence: Some(confidence),
            class_id: Some(class_id),
        }
    }
}

/// Maps a frame to a list of detections.
///
/// Implementations hold loaded weights and may be shared across jobs, so
/// `detect` takes `&self` and the confidence threshold per call.
#[cfg_attr(test, mockall::automock)]
pub trait Detector: Send + Sync {
    /// Run inference on one frame, keeping detections at or above `min_confidence`.
    fn detect(&self, frame: &Frame, min_confidence: f32) -> MediaResult<Vec<RawDetection>>;

    /// Resolve a class id to its label.
    fn class_name(&self, class_id: i64) -> Option<String>;
}

/// Hands out detectors for model references.
pub trait DetectorProvider: Send + Sync {
    fn load(&self, model_ref: &str) -> MediaResult<Arc<dyn Detector>>;
}
