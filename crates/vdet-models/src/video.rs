//! Result header models.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::JobId;

/// Video header metadata, computed once before any frame is processed.
///
/// `total_frames` is the progress denominator for the whole run, even if
/// the decoder later yields more or fewer frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VideoMetadata {
    /// Source video path
    pub path: String,
    /// Frame count reported by the container header
    pub total_frames: u64,
    /// Frames per second (0 when unknown)
    pub fps: f64,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

/// Job parameters echoed into the result header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobInfo {
    pub id: JobId,
    /// Resolved model reference
    pub model: String,
    /// Resolved confidence threshold
    pub confidence: f32,
}
