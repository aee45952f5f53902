//! Raw detector output to result records.
//!
//! The mapping is total: malformed fields degrade to defaults instead of
//! failing the frame.

use vdet_models::{Detection, UNKNOWN_CLASS_ID, UNKNOWN_CLASS_NAME};

use super::detector::RawDetection;

/// Map one raw detection. `class_name` resolves non-negative class ids.
pub fn map_detection<F>(raw: RawDetection, class_name: F) -> Detection
where
    F: Fn(i64) -> Option<String>,
{
    let bbox = raw
        .bbox
        .filter(|b| b.len() == 4 && b.iter().all(|v| v.is_finite()))
        .unwrap_or_default();

    let confidence = raw
        .confidence
        .filter(|c| c.is_finite())
        .map(|c| c.clamp(0.0, 1.0))
        .unwrap_or(0.0);

    let class_id = raw.class_id.unwrap_or(UNKNOWN_CLASS_ID);

    let class_name = if class_id >= 0 {
        class_name(class_id)
    } else {
        None
    }
    .unwrap_or_else(|| UNKNOWN_CLASS_NAME.to_string());

    Detection {
        bbox,
        confidence,
        class_id,
        class_name,
    }
}

/// Map a frame's raw detections, preserving order.
pub fn map_detections<F>(raw: Vec<RawDetection>, class_name: F) -> Vec<Detection>
where
    F: Fn(i64) -> Option<String>,
{
    raw.into_iter()
        .map(|r| map_detection(r, &class_name))
        .collect()
}
