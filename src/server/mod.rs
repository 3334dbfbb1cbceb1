//! Remote inference endpoint served to `RemoteBackend`.
//!
//! - `POST /detect`: decode the JPEG payload, resize to the requested
//!   resolution, run the requested model, return detections with server-side
//!   `recv_ts`/`inference_ts`.
//! - `GET /models`: built-in models plus `.onnx` files in the model directory.
//! - `GET /health`: status and currently loaded model.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;

use crate::clock::{Clock, SystemClock};
use crate::codec;
use crate::detect::error::BackendError;
use crate::detect::registry::ModelRegistry;
use crate::detect::result::Detection;
use crate::http::{self, HttpRequest, HttpResponse, ServerHandle};
use crate::transport::wire::{DetectRequest, DetectResponse, ModelList, ServerHealth};

pub const DEFAULT_SERVER_ADDR: &str = "127.0.0.1:8000";

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub addr: String,
    pub models_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_SERVER_ADDR.to_string(),
            models_dir: None,
        }
    }
}

/// Each connection gets its own worker thread; `/detect` calls still take
/// turns on the loaded model.
pub struct DetectServer {
    cfg: ServerConfig,
    registry: Arc<ModelRegistry>,
    clock: Arc<dyn Clock>,
}

impl DetectServer {
    pub fn new(cfg: ServerConfig) -> Self {
        let registry = Arc::new(ModelRegistry::new(cfg.models_dir.clone()));
        Self {
            cfg,
            registry,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn spawn(self) -> Result<ServerHandle> {
        let registry = self.registry;
        let clock = self.clock;
        http::spawn("detect server", &self.cfg.addr, move |request| {
            route(&registry, clock.as_ref(), request)
        })
    }
}

fn route(registry: &ModelRegistry, clock: &dyn Clock, request: &HttpRequest) -> HttpResponse {
    match (request.method.as_str(), request.path.as_str()) {
        ("POST", "/detect") => detect(registry, clock, &request.body),
        ("GET", "/models") => HttpResponse::json(
            200,
            &ModelList {
                models: registry.list(),
            },
        ),
        ("GET", "/health") => HttpResponse::json(
            200,
            &ServerHealth {
                status: "healthy".to_string(),
                current_model: registry.current_model(),
            },
        ),
        (_, "/detect" | "/models" | "/health") => HttpResponse::error(405, "method_not_allowed"),
        _ => HttpResponse::error(404, "not_found"),
    }
}

fn detect(registry: &ModelRegistry, clock: &dyn Clock, body: &[u8]) -> HttpResponse {
    let recv_ts = clock.now_ms();
    let request: DetectRequest = match serde_json::from_slice(body) {
        Ok(request) => request,
        Err(err) => return HttpResponse::error(400, &format!("invalid request: {}", err)),
    };
    let frame_id = request.frame_id.clone();
    match run_detection(registry, &request) {
        Ok(detections) => {
            let inference_ts = clock.now_ms().max(recv_ts);
            log::debug!(
                "frame {}: {} detections in {}ms",
                frame_id,
                detections.len(),
                inference_ts - recv_ts
            );
            HttpResponse::json(
                200,
                &DetectResponse {
                    frame_id,
                    capture_ts: request.capture_ts,
                    recv_ts,
                    inference_ts,
                    detections,
                },
            )
        }
        Err(DetectFailure::ModelLoad(msg)) => {
            log::error!("frame {}: model load failed: {}", frame_id, msg);
            HttpResponse::error(500, "Failed to load model")
        }
        Err(DetectFailure::Other(msg)) => {
            log::warn!("frame {}: {}", frame_id, msg);
            HttpResponse::error(500, &msg)
        }
    }
}

enum DetectFailure {
    ModelLoad(String),
    Other(String),
}

fn run_detection(
    registry: &ModelRegistry,
    request: &DetectRequest,
) -> Result<Vec<Detection>, DetectFailure> {
    let other = |err: anyhow::Error| DetectFailure::Other(format!("{:#}", err));
    let jpeg = codec::decode_data_url(&request.image_data).map_err(other)?;
    let (pixels, width, height) = codec::decode_rgb(&jpeg).map_err(other)?;
    let [target_w, target_h] = request.resolution;
    let pixels = codec::resize_rgb(pixels, width, height, request.resolution).map_err(other)?;
    registry
        .detect(&request.model_name, request.resolution, &pixels, target_w, target_h)
        .map_err(|err| match err {
            BackendError::ModelLoad(msg) => DetectFailure::ModelLoad(msg),
            err => DetectFailure::Other(err.to_string()),
        })
}
