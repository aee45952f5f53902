//! Per-frame detection records.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Class id used when the detector did not report one.
pub const UNKNOWN_CLASS_ID: i64 = -1;

/// Class name used when the class id cannot be resolved.
pub const UNKNOWN_CLASS_NAME: &str = "unknown";

/// One object hypothesis in a frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Detection {
    /// `[x1, y1, x2, y2]` in pixel coordinates of the original frame.
    /// Empty when the detector produced no usable box.
    pub bbox: Vec<f32>,
    /// Confidence in [0, 1]
    pub confidence: f32,
    pub class_id: i64,
    pub class_name: String,
}

impl Default for Detection {
    fn default() -> Self {
        Self {
            bbox: Vec::new(),
            confidence: 0.0,
            class_id: UNKNOWN_CLASS_ID,
            class_name: UNKNOWN_CLASS_NAME.to_string(),
        }
    }
}

/// Detections for a single processed frame. Never mutated once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FrameRecord {
    /// 1-based, contiguous frame index
    pub frame_number: u64,
    /// Seconds from the start of the video (0 when fps is unknown)
    pub timestamp: f64,
    pub detections: Vec<Detection>,
}

impl FrameRecord {
    /// Build a record for `frame_number`, deriving the timestamp from `fps`.
    pub fn new(frame_number: u64, fps: f64, detections: Vec<Detection>) -> Self {
        Self {
            frame_number,
            timestamp: frame_timestamp(frame_number, fps),
            detections,
        }
    }
}

/// Timestamp of a frame: `frame_number / fps`, or 0 when fps is not usable.
pub fn frame_timestamp(frame_number: u64, fps: f64) -> f64 {
    if fps.is_finite() && fps > 0.0 {
        frame_number as f64 / fps
    } else {
        0.0
    }
}
