use std::time::Duration;

use thiserror::Error;

use crate::latency::DropReason;

/// Errors crossing the backend boundary.
///
/// Per-frame variants cost one frame; fatal variants stop the pipeline.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("model load failed: {0}")]
    ModelLoad(String),

    #[error("backend unreachable: {0}")]
    Unreachable(String),
}

impl BackendError {
    /// Fatal errors mean the backend cannot serve any further frame.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BackendError::ModelLoad(_) | BackendError::Unreachable(_))
    }

    pub fn drop_reason(&self) -> DropReason {
        match self {
            BackendError::Timeout(_) => DropReason::Timeout,
            _ => DropReason::BackendError,
        }
    }
}
