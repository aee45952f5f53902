//! Result artifacts persisted for each job.

use chrono::Utc;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{FrameRecord, JobInfo, VideoMetadata};

/// Successful (or in-progress) result document: header plus frames so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ResultDocument {
    pub video_info: VideoMetadata,
    pub job_info: JobInfo,
    #[serde(default)]
    pub frames: Vec<FrameRecord>,
}

impl ResultDocument {
    /// Create a document with a header and no frames.
    pub fn new(video_info: VideoMetadata, job_info: JobInfo) -> Self {
        Self {
            video_info,
            job_info,
            frames: Vec::new(),
        }
    }

    /// Frame number of the last appended record (0 when empty).
    pub fn last_frame_number(&self) -> u64 {
        self.frames.last().map(|f| f.frame_number).unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorStatus {
    Error,
}

/// Error document written when a job fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ErrorRecord {
    /// Always `"error"`
    pub status: ErrorStatus,
    pub message: String,
    /// Unix timestamp (seconds)
    pub timestamp: f64,
}

impl ErrorRecord {
    /// Create an error record stamped with the current time.
    pub fn now(message: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            status: ErrorStatus::Error,
            message: message.into(),
            timestamp: now.timestamp_millis() as f64 / 1000.0,
        }
    }
}

/// Anything that can be found at a job's canonical result location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum ResultArtifact {
    Error(ErrorRecord),
    Document(ResultDocument),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Detection, JobId};

    fn sample_document() -> ResultDocument {
        let mut doc = ResultDocument::new(
            VideoMetadata {
                path: "media/input.mp4".into(),
                total_frames: 2,
                fps: 25.0,
                width: 640,
                height: 480,
            },
            JobInfo {
                id: JobId::from_string("job-1"),
                model: "models/best.onnx".into(),
                confidence: 0.25,
            },
        );
        doc.frames.push(FrameRecord::new(1, 25.0, vec![Detection::default()]));
        doc
    }

    #[test]
    fn test_document_shape() {
        let json = serde_json::to_value(sample_document()).unwrap();

        assert_eq!(json["video_info"]["total_frames"], 2);
        assert_eq!(json["video_info"]["width"], 640);
        assert_eq!(json["job_info"]["id"], "job-1");
        assert_eq!(json["job_info"]["model"], "models/best.onnx");
        assert_eq!(json["frames"][0]["frame_number"], 1);
    }

    #[test]
    fn test_error_record_shape() {
        let json = serde_json::to_value(ErrorRecord::now("boom")).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["message"], "boom");
        assert!(json["timestamp"].as_f64().unwrap() > 0.0);
    }

    #[test]
    fn test_artifact_discriminates() {
        let doc = serde_json::to_string(&sample_document()).unwrap();
        let err = serde_json::to_string(&ErrorRecord::now("missing")).unwrap();

        assert!(matches!(
            serde_json::from_str::<ResultArtifact>(&doc).unwrap(),
            ResultArtifact::Document(d) if d.last_frame_number() == 1
        ));
        assert!(matches!(
            serde_json::from_str::<ResultArtifact>(&err).unwrap(),
            ResultArtifact::Error(e) if e.message == "missing"
        ));
    }

    #[test]
    fn test_schema_generation() {
        let schema = schemars::schema_for!(ResultDocument);
        let json = serde_json::to_value(&schema).unwrap();
        assert!(json["properties"].get("video_info").is_some());
        assert!(json["properties"].get("frames").is_some());
    }
}
