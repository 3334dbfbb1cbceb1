//! Live Detect
//!
//! Streams frames from a capture source to an interchangeable detection
//! backend and hands labeled boxes to an overlay, keeping end-to-end delay
//! bounded on constrained hardware.
//!
//! # Guarantees
//!
//! 1. **Bounded backlog**: at most `capacity` frames wait for inference; a
//!    full queue evicts its oldest frame.
//! 2. **Freshness first**: inference always takes the newest queued frame and
//!    an older result never overwrites a newer one on the overlay.
//! 3. **Swap between frames**: a backend switch flushes the queue and
//!    discards any in-flight result from the previous backend.
//! 4. **Per-frame failures are absorbed**: timeouts, malformed frames and
//!    malformed responses cost one frame; only model-load or reachability
//!    failures stop the pipeline.
//! 5. **Honest statistics**: every drop is counted by reason and negative
//!    latencies are rejected, never averaged in.
//!
//! # Module Structure
//!
//! - `frame`, `queue`: frame ownership and the bounded in-flight queue
//! - `detect`: backend contract, on-device and remote backends, models
//! - `pipeline`: capture and inference threads, state machine, overlay stage
//! - `latency`: rolling percentiles and drop counters
//! - `transport`, `server`: remote inference wire format, client and server
//! - `api`: stats endpoint; `config`: file + environment configuration

pub mod api;
pub mod clock;
pub mod codec;
pub mod config;
pub mod detect;
pub mod frame;
mod http;
pub mod latency;
pub mod pipeline;
pub mod queue;
pub mod server;
pub mod transport;

pub use api::{ApiConfig, ApiHandle, StatsServer};
pub use clock::{now_ms, Clock, ManualClock, SystemClock};
pub use config::PipelineConfig;
pub use detect::{
    build_backend, BackendError, BackendKind, Detection, DetectionResult, InferenceBackend,
    ModelRegistry, OnDeviceBackend, RemoteBackend, RemoteSettings,
};
pub use frame::{CapturedImage, Frame, FrameId};
pub use http::ServerHandle;
pub use latency::{DropReason, LatencySample, LatencyTracker, Percentiles, StatsSnapshot};
pub use pipeline::{
    LogOverlay, OverlaySink, Pipeline, PipelineControl, PipelineSettings, PipelineSnapshot,
    PipelineState, StopReason,
};
pub use queue::FrameQueue;
pub use server::{DetectServer, ServerConfig};
