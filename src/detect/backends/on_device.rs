use std::path::Path;
use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::detect::backend::{BackendKind, InferenceBackend};
use crate::detect::error::BackendError;
use crate::detect::models::{load_detector, Detector};
use crate::detect::result::DetectionResult;
use crate::frame::Frame;

/// Runs a `Detector` in the calling thread.
///
/// `recv_ts` is taken when the call begins and `inference_ts` when it
/// returns, both from the injected clock.
pub struct OnDeviceBackend {
    name: String,
    detector: Box<dyn Detector>,
    clock: Arc<dyn Clock>,
}

impl OnDeviceBackend {
    /// Load the named model. Failure here is fatal for the backend.
    pub fn new(
        model_name: &str,
        resolution: [u32; 2],
        models_dir: Option<&Path>,
    ) -> Result<Self, BackendError> {
        let detector = load_detector(model_name, resolution, models_dir)?;
        log::info!("on-device backend loaded model {}", detector.name());
        Ok(Self::from_detector(detector))
    }

    pub fn from_detector(detector: Box<dyn Detector>) -> Self {
        Self {
            name: format!("on_device:{}", detector.name()),
            detector,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

impl InferenceBackend for OnDeviceBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> BackendKind {
        BackendKind::OnDevice
    }

    fn infer(&mut self, frame: &Frame) -> Result<DetectionResult, BackendError> {
        let recv_ts = self.clock.now_ms();
        if !frame.is_well_formed() {
            return Err(BackendError::MalformedFrame(format!(
                "frame {} has {} bytes for {}x{}",
                frame.id(),
                frame.pixels().len(),
                frame.width(),
                frame.height()
            )));
        }
        let detections = self
            .detector
            .detect(frame.pixels(), frame.width(), frame.height())?;
        let inference_ts = self.clock.now_ms().max(recv_ts);
        Ok(DetectionResult {
            frame_id: frame.id(),
            capture_ts: frame.capture_ts(),
            recv_ts,
            inference_ts,
            detections,
        })
    }
}
