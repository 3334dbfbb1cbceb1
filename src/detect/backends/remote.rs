use std::sync::Arc;
use std::time::Duration;

use crate::clock::{Clock, SystemClock};
use crate::codec::{self, DEFAULT_JPEG_QUALITY};
use crate::detect::backend::{BackendKind, InferenceBackend};
use crate::detect::error::BackendError;
use crate::detect::models::motion;
use crate::detect::result::DetectionResult;
use crate::frame::Frame;
use crate::transport::wire::{DetectRequest, DetectResponse, ErrorBody, DEFAULT_RESOLUTION};
use crate::transport::{HttpTransport, Transport, TransportError};

pub const DEFAULT_MAX_CONNECTION_FAILURES: u32 = 5;

#[derive(Clone, Debug)]
pub struct RemoteSettings {
    pub endpoint: String,
    pub model_name: String,
    pub resolution: [u32; 2],
    /// Per-request deadline.
    pub timeout: Duration,
    /// Consecutive connection failures tolerated before the backend is
    /// declared unreachable.
    pub max_connection_failures: u32,
    pub jpeg_quality: u8,
}

impl RemoteSettings {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            model_name: motion::MODEL_NAME.to_string(),
            resolution: DEFAULT_RESOLUTION,
            timeout: Duration::from_millis(1000 / 15),
            max_connection_failures: DEFAULT_MAX_CONNECTION_FAILURES,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

/// Sends frames to an inference server and parses its detections.
///
/// Timeouts and connection failures cost one frame; the backend stays
/// usable. A timed-out frame is never resubmitted. Malformed responses yield
/// an empty result stamped with local send/receive times.
pub struct RemoteBackend {
    name: String,
    transport: Box<dyn Transport>,
    settings: RemoteSettings,
    clock: Arc<dyn Clock>,
    consecutive_failures: u32,
}

impl RemoteBackend {
    /// Build an HTTP backend and probe the server once.
    pub fn connect(settings: RemoteSettings) -> Result<Self, BackendError> {
        let mut transport = HttpTransport::new(&settings.endpoint)
            .map_err(|err| BackendError::Unreachable(format!("{:#}", err)))?;
        let probe_timeout = settings.timeout.max(Duration::from_secs(1));
        transport.probe(probe_timeout).map_err(|err| {
            BackendError::Unreachable(format!("{}: {}", settings.endpoint, err))
        })?;
        log::info!("remote backend connected to {}", transport.endpoint());
        Ok(Self::with_transport(Box::new(transport), settings))
    }

    /// Use an already constructed transport; no probe is made.
    pub fn with_transport(transport: Box<dyn Transport>, settings: RemoteSettings) -> Self {
        Self {
            name: format!("remote:{}", transport.endpoint()),
            transport,
            settings,
            clock: Arc::new(SystemClock),
            consecutive_failures: 0,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &RemoteSettings {
        &self.settings
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    fn encode(&self, frame: &Frame) -> Result<Vec<u8>, BackendError> {
        if !frame.is_well_formed() {
            return Err(BackendError::MalformedFrame(format!(
                "frame {} has {} bytes for {}x{}",
                frame.id(),
                frame.pixels().len(),
                frame.width(),
                frame.height()
            )));
        }
        let image_data = codec::encode_data_url(
            frame.pixels(),
            frame.width(),
            frame.height(),
            self.settings.jpeg_quality,
        )
        .map_err(|err| BackendError::MalformedFrame(format!("{:#}", err)))?;
        let request = DetectRequest {
            frame_id: frame.id().to_string(),
            capture_ts: frame.capture_ts(),
            image_data,
            model_name: self.settings.model_name.clone(),
            resolution: self.settings.resolution,
        };
        serde_json::to_vec(&request)
            .map_err(|err| BackendError::Inference(format!("encode request: {}", err)))
    }

    fn connection_failed(&mut self, reason: String) -> BackendError {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= self.settings.max_connection_failures.max(1) {
            BackendError::Unreachable(format!(
                "{} consecutive connection failures to {}; last: {}",
                self.consecutive_failures,
                self.transport.endpoint(),
                reason
            ))
        } else {
            BackendError::Connection(reason)
        }
    }
}

/// Parse and check a response body against the frame it answers.
fn decode_response(frame: &Frame, body: &[u8]) -> Result<DetectionResult, BackendError> {
    let response: DetectResponse = serde_json::from_slice(body)
        .map_err(|err| BackendError::MalformedResponse(format!("invalid json: {}", err)))?;
    let expected_id = frame.id().to_string();
    if response.frame_id.trim() != expected_id {
        return Err(BackendError::MalformedResponse(format!(
            "frame_id mismatch: sent {}, got {}",
            expected_id, response.frame_id
        )));
    }
    for det in &response.detections {
        det.validate().map_err(|reason| {
            BackendError::MalformedResponse(format!("detection '{}': {}", det.label, reason))
        })?;
    }
    Ok(DetectionResult {
        frame_id: frame.id(),
        capture_ts: frame.capture_ts(),
        recv_ts: response.recv_ts,
        inference_ts: response.inference_ts,
        detections: response.detections,
    })
}

fn status_message(code: u16, body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(err) => format!("server status {}: {}", code, err.error),
        Err(_) => format!("server status {}", code),
    }
}

impl InferenceBackend for RemoteBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    fn infer(&mut self, frame: &Frame) -> Result<DetectionResult, BackendError> {
        let body = self.encode(frame)?;
        let sent_at = self.clock.now_ms();
        let outcome = self.transport.round_trip(&body, self.settings.timeout);
        let received_at = self.clock.now_ms().max(sent_at);

        let decoded = match outcome {
            Ok(bytes) => {
                self.consecutive_failures = 0;
                decode_response(frame, &bytes)
            }
            Err(TransportError::Timeout) => {
                return Err(BackendError::Timeout(self.settings.timeout));
            }
            Err(TransportError::Connection(reason)) => {
                return Err(self.connection_failed(reason));
            }
            Err(TransportError::Status { code, body }) => {
                self.consecutive_failures = 0;
                Err(BackendError::MalformedResponse(status_message(code, &body)))
            }
        };

        match decoded {
            Ok(result) => Ok(result),
            Err(err) => {
                log::warn!("frame {}: {}; treating as no detections", frame.id(), err);
                Ok(DetectionResult {
                    frame_id: frame.id(),
                    capture_ts: frame.capture_ts(),
                    recv_ts: sent_at,
                    inference_ts: received_at,
                    detections: Vec::new(),
                })
            }
        }
    }
}
