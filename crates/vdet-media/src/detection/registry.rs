//! Loaded model cache.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use super::detector::{Detector, DetectorProvider};
use super::object_detector::{ObjectDetector, ObjectDetectorConfig};
use crate::error::{MediaError, MediaResult};

/// Shares loaded ONNX detectors across jobs, keyed by model reference.
///
/// A reference is a path to an `.onnx` file, relative references resolve
/// against the registry's model directory. Labels come from a sibling
/// `<model>.names` file (one label per line) when present, COCO otherwise.
#[derive(Default)]
pub struct ModelRegistry {
    model_dir: Option<PathBuf>,
    loaded: Mutex<HashMap<String, Arc<ObjectDetector>>>,
}

impl ModelRegistry {
    pub fn new(model_dir: Option<PathBuf>) -> Self {
        Self {
            model_dir,
            loaded: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve a model reference to a file path.
    pub fn resolve(&self, model_ref: &str) -> PathBuf {
        let path = Path::new(model_ref);
        match &self.model_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// Number of models currently loaded.
    pub fn len(&self) -> usize {
        self.loaded.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn config_for(&self, model_ref: &str) -> MediaResult<ObjectDetectorConfig> {
        let model_path = self.resolve(model_ref);
        let config = ObjectDetectorConfig::new(&model_path);

        let names_path = model_path.with_extension("names");
        if !names_path.exists() {
            return Ok(config);
        }

        let names = read_class_names(&names_path)?;
        debug!(path = %names_path.display(), classes = names.len(), "Loaded class labels");
        Ok(config.with_class_names(names))
    }
}

impl DetectorProvider for ModelRegistry {
    fn load(&self, model_ref: &str) -> MediaResult<Arc<dyn Detector>> {
        let mut loaded = self
            .loaded
            .lock()
            .map_err(|_| MediaError::internal("Model registry lock poisoned"))?;

        if let Some(detector) = loaded.get(model_ref) {
            return Ok(detector.clone());
        }

        let detector = Arc::new(ObjectDetector::new(self.config_for(model_ref)?)?);
        info!(model = model_ref, "Model loaded");
        loaded.insert(model_ref.to_string(), detector.clone());

        Ok(detector)
    }
}

/// Read a label file: one class name per line, blank lines skipped.
fn read_class_names(path: &Path) -> MediaResult<Vec<String>> {
    let content = std::fs::read_to_string(path)?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_relative_against_model_dir() {
        let registry = ModelRegistry::new(Some(PathBuf::from("/models")));
        assert_eq!(registry.resolve("yolov8n.onnx"), PathBuf::from("/models/yolov8n.onnx"));
        assert_eq!(registry.resolve("/abs/m.onnx"), PathBuf::from("/abs/m.onnx"));

        let bare = ModelRegistry::default();
        assert_eq!(bare.resolve("yolov8n.onnx"), PathBuf::from("yolov8n.onnx"));
    }

    #[test]
    fn test_label_sidecar_overrides_coco() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("drones.names"), "quad\n\n fixed-wing \n").unwrap();

        let registry = ModelRegistry::new(Some(dir.path().to_path_buf()));
        let config = registry.config_for("drones.onnx").unwrap();
        assert_eq!(config.class_names, vec!["quad", "fixed-wing"]);

        let coco = registry.config_for("yolov8n.onnx").unwrap();
        assert_eq!(coco.class_names.len(), 80);
    }

    #[test]
    fn test_missing_model_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::new(Some(dir.path().to_path_buf()));

        let err = registry.load("missing.onnx").err().expect("load must fail");
        assert!(matches!(err, MediaError::ModelNotFound(_)));
        assert!(registry.is_empty());
    }
}
