//! Read-only stats endpoint for a running pipeline.
//!
//! `GET /health` reports liveness and pipeline state, `GET /stats` the
//! latency percentiles and drop counters. Loopback peers only when bound to a
//! loopback address.

use anyhow::Result;
use serde::Serialize;

use crate::http::{self, HttpRequest, HttpResponse, ServerHandle};
use crate::pipeline::{PipelineControl, PipelineState};

pub const DEFAULT_API_ADDR: &str = "127.0.0.1:8790";

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_API_ADDR.to_string(),
        }
    }
}

pub type ApiHandle = ServerHandle;

#[derive(Serialize)]
struct Health {
    status: &'static str,
    state: PipelineState,
}

pub struct StatsServer {
    cfg: ApiConfig,
    control: PipelineControl,
}

impl StatsServer {
    pub fn new(cfg: ApiConfig, control: PipelineControl) -> Self {
        Self { cfg, control }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let control = self.control;
        http::spawn("stats api", &self.cfg.addr, move |request| {
            handle(&control, request)
        })
    }
}

fn handle(control: &PipelineControl, request: &HttpRequest) -> HttpResponse {
    if request.method != "GET" {
        return HttpResponse::error(405, "method_not_allowed");
    }
    match request.path.as_str() {
        "/health" => HttpResponse::json(
            200,
            &Health {
                status: "ok",
                state: control.state(),
            },
        ),
        "/stats" => HttpResponse::json(200, &control.snapshot()),
        _ => HttpResponse::error(404, "not_found"),
    }
}
