pub mod backend;
pub mod backends;
pub mod error;
pub mod models;
pub mod registry;
pub mod result;

pub use backend::{BackendKind, InferenceBackend};
pub use backends::{build_backend, OnDeviceBackend, RemoteBackend, RemoteSettings};
pub use error::BackendError;
pub use models::{load_detector, Detector, MotionDetector};
pub use registry::ModelRegistry;
pub use result::{Detection, DetectionResult};
