use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;

use crate::detect::error::BackendError;
use crate::detect::result::DetectionResult;
use crate::frame::Frame;

/// Where inference runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    OnDevice,
    Remote,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::OnDevice => "on_device",
            BackendKind::Remote => "remote",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "on_device" | "on-device" | "ondevice" | "local" | "wasm" => Ok(BackendKind::OnDevice),
            "remote" | "server" => Ok(BackendKind::Remote),
            other => Err(anyhow!(
                "unknown backend mode '{}'; expected on_device or remote",
                other
            )),
        }
    }
}

/// A capability that turns a frame into detections.
///
/// Calls are synchronous for the caller; implementations may block on I/O or
/// computation. The pipeline holds exactly one active backend and only swaps
/// it between calls.
pub trait InferenceBackend: Send {
    /// Backend identifier, used in logs.
    fn name(&self) -> &str;

    fn kind(&self) -> BackendKind;

    /// Run inference on one frame.
    fn infer(&mut self, frame: &Frame) -> Result<DetectionResult, BackendError>;

    /// Optional warm-up hook, run before the first frame.
    fn warm_up(&mut self) -> Result<(), BackendError> {
        Ok(())
    }
}

impl<B: InferenceBackend + ?Sized> InferenceBackend for Box<B> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn kind(&self) -> BackendKind {
        (**self).kind()
    }

    fn infer(&mut self, frame: &Frame) -> Result<DetectionResult, BackendError> {
        (**self).infer(frame)
    }

    fn warm_up(&mut self) -> Result<(), BackendError> {
        (**self).warm_up()
    }
}
