use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::detect::error::BackendError;
use crate::detect::models::{load_detector, Detector, BUILTIN_MODELS};
use crate::detect::result::Detection;

struct LoadedModel {
    name: String,
    resolution: [u32; 2],
    detector: Box<dyn Detector>,
}

/// Lazily loaded model cache for the detect server.
///
/// Holds a single current model. A request naming a different model (or
/// resolution) replaces it; the same model is reused across requests.
/// Detection is serialized through the lock because `Detector::detect`
/// takes `&mut self`.
pub struct ModelRegistry {
    models_dir: Option<PathBuf>,
    current: Mutex<Option<LoadedModel>>,
}

impl ModelRegistry {
    pub fn new(models_dir: Option<PathBuf>) -> Self {
        Self {
            models_dir,
            current: Mutex::new(None),
        }
    }

    pub fn models_dir(&self) -> Option<&Path> {
        self.models_dir.as_deref()
    }

    /// Name of the model currently loaded, if any.
    pub fn current_model(&self) -> Option<String> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|loaded| loaded.name.clone())
    }

    /// Built-in model names followed by `.onnx` files in the model directory.
    pub fn list(&self) -> Vec<String> {
        let mut models: Vec<String> = BUILTIN_MODELS.iter().map(|m| m.to_string()).collect();
        let Some(dir) = self.models_dir.as_deref() else {
            return models;
        };
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) => {
                log::warn!("cannot list models in {}: {}", dir.display(), err);
                return models;
            }
        };
        let mut onnx: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| name.ends_with(".onnx"))
            .collect();
        onnx.sort();
        models.extend(onnx);
        models
    }

    /// Run `model_name` on an RGB8 image, loading the model first if needed.
    pub fn detect(
        &self,
        model_name: &str,
        resolution: [u32; 2],
        pixels: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<Detection>, BackendError> {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        let reuse = matches!(
            current.as_ref(),
            Some(loaded) if loaded.name == model_name && loaded.resolution == resolution
        );
        if !reuse {
            log::info!("loading model {} at {}x{}", model_name, resolution[0], resolution[1]);
            let detector = load_detector(model_name, resolution, self.models_dir.as_deref())?;
            *current = Some(LoadedModel {
                name: model_name.to_string(),
                resolution,
                detector,
            });
        }
        match current.as_mut() {
            Some(loaded) => loaded.detector.detect(pixels, width, height),
            None => Err(BackendError::ModelLoad(model_name.to_string())),
        }
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_lazily_and_reports_current() {
        let registry = ModelRegistry::default();
        assert_eq!(registry.current_model(), None);
        let pixels = vec![0u8; 32 * 32 * 3];
        let detections = registry.detect("motion", [32, 32], &pixels, 32, 32).unwrap();
        assert!(detections.is_empty());
        assert_eq!(registry.current_model().as_deref(), Some("motion"));
    }

    #[test]
    fn failed_load_keeps_previous_model() {
        let registry = ModelRegistry::default();
        let pixels = vec![0u8; 16 * 16 * 3];
        registry.detect("motion", [16, 16], &pixels, 16, 16).unwrap();
        let err = registry
            .detect("nope", [16, 16], &pixels, 16, 16)
            .unwrap_err();
        assert!(matches!(err, BackendError::ModelLoad(_)));
        assert_eq!(registry.current_model().as_deref(), Some("motion"));
    }

    #[test]
    fn lists_onnx_files_after_builtins() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("yolov10n.onnx"), b"").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"").unwrap();
        let registry = ModelRegistry::new(Some(dir.path().to_path_buf()));
        assert_eq!(registry.list(), vec!["motion", "yolov10n.onnx"]);
    }
}
