//! In-process detection models.
//!
//! A `Detector` is the pure model half of an on-device backend: RGB pixels in,
//! labeled boxes out. Timestamping and frame validation live in
//! `OnDeviceBackend`; model caching for the detect server lives in
//! `ModelRegistry`.

pub mod labels;
pub mod motion;
#[cfg(feature = "backend-tract")]
pub mod tract;
pub mod yolo;

use std::path::Path;

use crate::detect::error::BackendError;
use crate::detect::result::Detection;

pub use motion::MotionDetector;
#[cfg(feature = "backend-tract")]
pub use tract::TractDetector;

/// Model names that need no file on disk.
pub const BUILTIN_MODELS: &[&str] = &[motion::MODEL_NAME];

pub trait Detector: Send {
    fn name(&self) -> &str;

    /// Detect objects in an RGB8 image.
    ///
    /// Implementations treat the pixel slice as read-only and must not retain it.
    fn detect(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<Detection>, BackendError>;
}

/// Resolve a model name to a detector.
///
/// `motion` is built in; names ending in `.onnx` are loaded from `models_dir`
/// (or as a path) and need the `backend-tract` feature.
pub fn load_detector(
    model_name: &str,
    resolution: [u32; 2],
    models_dir: Option<&Path>,
) -> Result<Box<dyn Detector>, BackendError> {
    let name = model_name.trim();
    if name == motion::MODEL_NAME {
        return Ok(Box::new(MotionDetector::new()));
    }
    if name.ends_with(".onnx") {
        let path = match models_dir {
            Some(dir) => dir.join(name),
            None => Path::new(name).to_path_buf(),
        };
        return load_onnx(&path, resolution);
    }
    Err(BackendError::ModelLoad(format!(
        "unknown model '{}' (built-in: {})",
        name,
        BUILTIN_MODELS.join(", ")
    )))
}

#[cfg(feature = "backend-tract")]
fn load_onnx(path: &Path, resolution: [u32; 2]) -> Result<Box<dyn Detector>, BackendError> {
    let [width, height] = resolution;
    let detector = TractDetector::new(path, width, height)
        .map_err(|err| BackendError::ModelLoad(format!("{:#}", err)))?;
    Ok(Box::new(detector))
}

#[cfg(not(feature = "backend-tract"))]
fn load_onnx(path: &Path, _resolution: [u32; 2]) -> Result<Box<dyn Detector>, BackendError> {
    Err(BackendError::ModelLoad(format!(
        "{} requires the backend-tract feature",
        path.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_builtin_motion_model() {
        let detector = load_detector("motion", [256, 256], None).unwrap();
        assert_eq!(detector.name(), "motion");
    }

    #[test]
    fn unknown_model_is_a_load_error() {
        let err = load_detector("yolo-nonexistent", [256, 256], None)
            .err()
            .expect("load error");
        assert!(err.is_fatal());
    }

    #[test]
    fn missing_onnx_file_is_a_load_error() {
        let err = load_detector("missing.onnx", [256, 256], Some(Path::new("/nonexistent")))
            .err()
            .expect("load error");
        assert!(matches!(err, BackendError::ModelLoad(_)));
    }
}
