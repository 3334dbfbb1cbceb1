//! Real-time frame pipeline.
//!
//! Two threads per session:
//! - capture: pulls images from the `FrameSource` at its native cadence, tags
//!   them and offers them to the bounded `FrameQueue`;
//! - inference: takes the newest queued frame, runs the active backend, hands
//!   fresh results to the overlay stage and records latency.
//!
//! State machine: `Idle -> Running <-> Paused`, `Running|Paused -> Stopped`
//! on stop, end of stream or a fatal backend error. `Stopped` accepts a new
//! `start`, which resets the session statistics.
//!
//! Backend swaps and stops bump a generation counter. A result whose call
//! started under an older generation is discarded and counted as cancelled.

pub mod overlay;
pub mod source;

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use serde::Serialize;

use crate::clock::{Clock, SystemClock};
use crate::detect::backend::InferenceBackend;
use crate::detect::error::BackendError;
use crate::frame::FrameIdAllocator;
use crate::latency::{DropReason, LatencyTracker, StatsSnapshot, DEFAULT_WINDOW};
use crate::queue::{FrameQueue, DEFAULT_CAPACITY};

pub use overlay::{LogOverlay, OverlaySink, OverlayStage};
pub use source::{channel, open_source, ChannelSource, FrameSender, FrameSource, SyntheticSource};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Running,
    Paused,
    Stopped,
}

impl PipelineState {
    pub fn as_str(self) -> &'static str {
        match self {
            PipelineState::Idle => "idle",
            PipelineState::Running => "running",
            PipelineState::Paused => "paused",
            PipelineState::Stopped => "stopped",
        }
    }
}

/// Why a session reached `Stopped`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StopReason {
    Requested,
    SourceEnded,
    SourceFailed(String),
    BackendFailed(String),
}

#[derive(Clone, Debug)]
pub struct PipelineSettings {
    pub queue_capacity: usize,
    pub latency_window: usize,
    /// How long the inference thread waits for a frame before re-checking state.
    pub idle_poll: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_CAPACITY,
            latency_window: DEFAULT_WINDOW,
            idle_poll: Duration::from_millis(50),
        }
    }
}

struct Status {
    state: PipelineState,
    stop_reason: Option<StopReason>,
    session: u64,
}

struct Shared {
    status: Mutex<Status>,
    changed: Condvar,
    queue: FrameQueue,
    tracker: Arc<LatencyTracker>,
    ids: FrameIdAllocator,
    clock: Arc<dyn Clock>,
    pending_backend: Mutex<Option<Box<dyn InferenceBackend>>>,
    generation: AtomicU64,
    overlay: Mutex<OverlayStage>,
    source_done: AtomicBool,
    in_flight: AtomicUsize,
}

impl Shared {
    fn status(&self) -> MutexGuard<'_, Status> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn overlay(&self) -> MutexGuard<'_, OverlayStage> {
        self.overlay.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pending(&self) -> MutexGuard<'_, Option<Box<dyn InferenceBackend>>> {
        self.pending_backend
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, from: &[PipelineState], to: PipelineState) -> bool {
        let mut status = self.status();
        if !from.contains(&status.state) {
            return false;
        }
        log::info!("pipeline {} -> {}", status.state.as_str(), to.as_str());
        status.state = to;
        drop(status);
        self.changed.notify_all();
        true
    }

    /// Enter `Stopped` once; later calls keep the first reason.
    fn finish(&self, reason: StopReason) {
        {
            let mut status = self.status();
            if !matches!(status.state, PipelineState::Running | PipelineState::Paused) {
                return;
            }
            match &reason {
                StopReason::BackendFailed(msg) => {
                    log::error!("pipeline stopped: backend failed: {}", msg)
                }
                StopReason::SourceFailed(msg) => {
                    log::error!("pipeline stopped: capture source failed: {}", msg)
                }
                other => log::info!("pipeline {} -> stopped ({:?})", status.state.as_str(), other),
            }
            status.state = PipelineState::Stopped;
            status.stop_reason = Some(reason);
            self.generation.fetch_add(1, Ordering::SeqCst);
        }
        self.changed.notify_all();
        let flushed = self.queue.clear();
        if flushed > 0 {
            log::debug!("flushed {} queued frames on stop", flushed);
        }
        self.queue.wake_all();
    }

    fn snapshot(&self) -> PipelineSnapshot {
        let state = self.status().state;
        PipelineSnapshot {
            state,
            queue_len: self.queue.len(),
            in_flight: self.in_flight.load(Ordering::SeqCst),
            stats: self.tracker.snapshot(),
        }
    }
}

/// Point-in-time view for observability.
#[derive(Clone, Debug, Serialize)]
pub struct PipelineSnapshot {
    pub state: PipelineState,
    pub queue_len: usize,
    pub in_flight: usize,
    #[serde(flatten)]
    pub stats: StatsSnapshot,
}

/// Cloneable handle for signals from other threads (visibility, stop, stats).
#[derive(Clone)]
pub struct PipelineControl {
    shared: Arc<Shared>,
}

impl PipelineControl {
    pub fn state(&self) -> PipelineState {
        self.shared.status().state
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.shared.status().stop_reason.clone()
    }

    /// `Running -> Paused`. Returns false in any other state.
    pub fn pause(&self) -> bool {
        self.shared
            .transition(&[PipelineState::Running], PipelineState::Paused)
    }

    /// `Paused -> Running`. Returns false in any other state.
    pub fn resume(&self) -> bool {
        self.shared
            .transition(&[PipelineState::Paused], PipelineState::Running)
    }

    /// Capture source visibility signal: hidden pauses, visible resumes.
    pub fn visibility_changed(&self, visible: bool) -> bool {
        if visible {
            self.resume()
        } else {
            self.pause()
        }
    }

    /// Stop without waiting for worker threads.
    pub fn request_stop(&self) {
        self.shared.finish(StopReason::Requested);
    }

    pub fn tracker(&self) -> &Arc<LatencyTracker> {
        &self.shared.tracker
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        self.shared.snapshot()
    }
}

type Worker = JoinHandle<Option<Box<dyn InferenceBackend>>>;

pub struct Pipeline {
    shared: Arc<Shared>,
    settings: PipelineSettings,
    backend: Option<Box<dyn InferenceBackend>>,
    capture: Option<JoinHandle<()>>,
    worker: Option<Worker>,
}

impl Pipeline {
    pub fn new(
        backend: Box<dyn InferenceBackend>,
        overlay: Box<dyn OverlaySink>,
        settings: PipelineSettings,
    ) -> Self {
        Self::with_clock(backend, overlay, settings, Arc::new(SystemClock))
    }

    pub fn with_clock(
        backend: Box<dyn InferenceBackend>,
        overlay: Box<dyn OverlaySink>,
        settings: PipelineSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let tracker = Arc::new(LatencyTracker::new(settings.latency_window));
        let shared = Arc::new(Shared {
            status: Mutex::new(Status {
                state: PipelineState::Idle,
                stop_reason: None,
                session: 0,
            }),
            changed: Condvar::new(),
            queue: FrameQueue::new(settings.queue_capacity, tracker.clone()),
            tracker,
            ids: FrameIdAllocator::new(),
            clock,
            pending_backend: Mutex::new(None),
            generation: AtomicU64::new(0),
            overlay: Mutex::new(OverlayStage::new(overlay)),
            source_done: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
        });
        Self {
            shared,
            settings,
            backend: Some(backend),
            capture: None,
            worker: None,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.shared.status().state
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.shared.status().stop_reason.clone()
    }

    pub fn control(&self) -> PipelineControl {
        PipelineControl {
            shared: self.shared.clone(),
        }
    }

    pub fn tracker(&self) -> &Arc<LatencyTracker> {
        &self.shared.tracker
    }

    pub fn queue_len(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        self.shared.snapshot()
    }

    /// Name of the backend the next frame will use.
    pub fn backend_name(&self) -> Option<String> {
        if let Some(pending) = self.shared.pending().as_ref() {
            return Some(pending.name().to_string());
        }
        self.backend.as_ref().map(|backend| backend.name().to_string())
    }

    /// Begin a session from `Idle` or `Stopped`.
    pub fn start(&mut self, source: Box<dyn FrameSource>) -> Result<()> {
        let state = self.state();
        if !matches!(state, PipelineState::Idle | PipelineState::Stopped) {
            return Err(anyhow!("pipeline is already {}", state.as_str()));
        }
        self.reap_threads()?;
        let backend = self
            .backend
            .take()
            .ok_or_else(|| anyhow!("no usable backend; call switch_backend before start"))?;

        if state == PipelineState::Stopped {
            self.shared.queue.clear();
            self.shared.tracker.reset();
            self.shared.overlay().reset();
        }
        self.shared.source_done.store(false, Ordering::SeqCst);
        let session = {
            let mut status = self.shared.status();
            status.session += 1;
            status.state = PipelineState::Running;
            status.stop_reason = None;
            status.session
        };
        self.shared.changed.notify_all();
        log::info!(
            "pipeline {} -> running (source {}, backend {})",
            state.as_str(),
            source.name(),
            backend.name()
        );

        let shared = self.shared.clone();
        let capture = std::thread::Builder::new()
            .name("pipeline-capture".into())
            .spawn(move || capture_loop(shared, source, session));
        let capture = match capture {
            Ok(handle) => handle,
            Err(err) => {
                self.shared
                    .finish(StopReason::SourceFailed(format!("spawn capture thread: {}", err)));
                self.backend = Some(backend);
                return Err(anyhow!("spawn capture thread: {}", err));
            }
        };
        self.capture = Some(capture);

        let shared = self.shared.clone();
        let idle_poll = self.settings.idle_poll;
        let worker = std::thread::Builder::new()
            .name("pipeline-inference".into())
            .spawn(move || inference_loop(shared, backend, idle_poll))
            .map_err(|err| {
                self.shared
                    .finish(StopReason::BackendFailed(format!("spawn inference thread: {}", err)));
                anyhow!("spawn inference thread: {}", err)
            })?;
        self.worker = Some(worker);
        Ok(())
    }

    pub fn pause(&self) -> bool {
        self.control().pause()
    }

    pub fn resume(&self) -> bool {
        self.control().resume()
    }

    /// Replace the active backend between frames.
    ///
    /// Queued frames are flushed so none reaches the new backend, and any
    /// in-flight result from the old backend is discarded.
    pub fn switch_backend(&mut self, backend: Box<dyn InferenceBackend>) {
        let running = self.worker.is_some()
            && matches!(
                self.state(),
                PipelineState::Running | PipelineState::Paused
            );
        if !running {
            log::info!("backend set to {}", backend.name());
            self.backend = Some(backend);
            self.shared.pending().take();
            return;
        }
        log::info!("switching backend to {}", backend.name());
        *self.shared.pending() = Some(backend);
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        let flushed = self.shared.queue.clear();
        if flushed > 0 {
            log::debug!("flushed {} queued frames on backend switch", flushed);
        }
        self.shared.queue.wake_all();
    }

    /// Stop the session and wait for the inference thread.
    ///
    /// Returns an error when the session ended because the source or the
    /// backend failed.
    pub fn stop(&mut self) -> Result<()> {
        self.shared.finish(StopReason::Requested);
        self.reap_threads()?;
        match self.stop_reason() {
            Some(StopReason::BackendFailed(msg)) => Err(anyhow!("backend failed: {}", msg)),
            Some(StopReason::SourceFailed(msg)) => Err(anyhow!("capture source failed: {}", msg)),
            _ => Ok(()),
        }
    }

    /// Block until the session reaches `Stopped` or `timeout` elapses.
    pub fn wait_stopped(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut status = self.shared.status();
        while status.state != PipelineState::Stopped {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            status = self
                .shared
                .changed
                .wait_timeout(status, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    fn reap_threads(&mut self) -> Result<()> {
        if let Some(worker) = self.worker.take() {
            let returned = worker
                .join()
                .map_err(|_| anyhow!("inference thread panicked"))?;
            // A backend installed with switch_backend after the stop wins.
            if let (Some(backend), None) = (returned, self.backend.as_ref()) {
                self.backend = Some(backend);
            }
        }
        if let Some(pending) = self.shared.pending().take() {
            self.backend = Some(pending);
        }
        if let Some(capture) = self.capture.take() {
            // A source blocked on its next image exits once it returns.
            if capture.is_finished() {
                capture
                    .join()
                    .map_err(|_| anyhow!("capture thread panicked"))?;
            }
        }
        Ok(())
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.shared.finish(StopReason::Requested);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn capture_loop(shared: Arc<Shared>, mut source: Box<dyn FrameSource>, session: u64) {
    loop {
        {
            let mut status = shared.status();
            while status.session == session && status.state == PipelineState::Paused {
                status = shared
                    .changed
                    .wait(status)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            if status.session != session || status.state != PipelineState::Running {
                return;
            }
        }

        let next = source.next_image();

        // Offer under the status lock so no frame lands after a stop flush.
        let status = shared.status();
        if status.session != session || status.state == PipelineState::Stopped {
            return;
        }
        match next {
            Ok(Some(image)) => {
                if status.state == PipelineState::Paused {
                    continue;
                }
                let frame = shared.ids.tag(image, shared.clock.now_ms());
                shared.tracker.frame_captured();
                shared.queue.offer(frame);
            }
            Ok(None) => {
                log::info!("capture source {} ended", source.name());
                shared.source_done.store(true, Ordering::SeqCst);
                drop(status);
                shared.queue.wake_all();
                return;
            }
            Err(err) => {
                drop(status);
                shared.finish(StopReason::SourceFailed(format!("{:#}", err)));
                return;
            }
        }
    }
}

fn inference_loop(
    shared: Arc<Shared>,
    mut backend: Box<dyn InferenceBackend>,
    idle_poll: Duration,
) -> Option<Box<dyn InferenceBackend>> {
    if let Err(err) = backend.warm_up() {
        if err.is_fatal() {
            shared.finish(StopReason::BackendFailed(err.to_string()));
            return None;
        }
        log::warn!("backend {} warm-up failed: {}", backend.name(), err);
    }

    loop {
        {
            let mut status = shared.status();
            loop {
                match status.state {
                    PipelineState::Running => break,
                    PipelineState::Paused => {
                        status = shared
                            .changed
                            .wait(status)
                            .unwrap_or_else(PoisonError::into_inner);
                    }
                    PipelineState::Idle | PipelineState::Stopped => return Some(backend),
                }
            }
        }

        if let Some(next) = shared.pending().take() {
            log::info!("backend {} -> {}", backend.name(), next.name());
            backend = next;
            shared.queue.clear();
        }

        let generation = shared.generation.load(Ordering::SeqCst);
        let Some(frame) = shared.queue.wait_latest(idle_poll) else {
            if shared.source_done.load(Ordering::SeqCst) && shared.queue.is_empty() {
                shared.finish(StopReason::SourceEnded);
            }
            continue;
        };

        if shared.generation.load(Ordering::SeqCst) != generation
            || shared.pending().is_some()
        {
            shared.tracker.record_drop(DropReason::Flushed, 1);
            continue;
        }
        if shared.overlay().is_stale(frame.capture_ts()) {
            shared.tracker.record_drop(DropReason::StaleSkip, 1);
            continue;
        }

        shared.in_flight.fetch_add(1, Ordering::SeqCst);
        let outcome = backend.infer(&frame);
        let now = shared.clock.now_ms();

        if shared.generation.load(Ordering::SeqCst) != generation {
            log::debug!("discarding result for frame {} from cancelled call", frame.id());
            shared.tracker.record_drop(DropReason::Cancelled, 1);
            shared.in_flight.fetch_sub(1, Ordering::SeqCst);
            continue;
        }

        match outcome {
            Ok(result) => {
                if shared.overlay().present(&frame, &result) {
                    shared.tracker.frame_processed();
                    shared.tracker.record(
                        result.capture_ts,
                        result.recv_ts,
                        result.inference_ts,
                        now,
                    );
                } else {
                    log::debug!(
                        "dropping stale result for frame {} (capture_ts {})",
                        frame.id(),
                        result.capture_ts
                    );
                    shared.tracker.record_drop(DropReason::StaleResult, 1);
                }
            }
            Err(err) if err.is_fatal() => {
                shared.tracker.record_drop(err.drop_reason(), 1);
                shared.in_flight.fetch_sub(1, Ordering::SeqCst);
                shared.finish(StopReason::BackendFailed(err.to_string()));
                return None;
            }
            Err(err) => {
                log_frame_error(frame.id(), &err);
                shared.tracker.record_drop(err.drop_reason(), 1);
            }
        }
        shared.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

fn log_frame_error(frame_id: u64, err: &BackendError) {
    match err {
        BackendError::Timeout(_) => log::debug!("frame {} dropped: {}", frame_id, err),
        _ => log::warn!("frame {} dropped: {}", frame_id, err),
    }
}
