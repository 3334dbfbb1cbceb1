//! Per-frame latency accounting.
//!
//! `LatencyTracker` keeps a rolling window of samples per metric and the
//! session counters (captured, processed, dropped by reason). It is shared
//! between the capture path and the inference path; every method takes the
//! lock for its own duration only.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use thiserror::Error;

/// Default number of samples retained per metric.
pub const DEFAULT_WINDOW: usize = 500;

/// Why a frame left the pipeline without a rendered result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// Oldest frame evicted by `offer` on a full queue.
    Evicted,
    /// Older frame skipped by a LIFO `take_latest`.
    StaleSkip,
    /// Queue discarded on backend switch or stop.
    Flushed,
    /// Per-frame backend failure (malformed frame, connection error, ...).
    BackendError,
    /// Remote request exceeded its deadline.
    Timeout,
    /// Result arrived for a call cancelled by a switch or stop.
    Cancelled,
    /// Result older than the overlay already on screen.
    StaleResult,
}

impl DropReason {
    pub const ALL: [DropReason; 7] = [
        DropReason::Evicted,
        DropReason::StaleSkip,
        DropReason::Flushed,
        DropReason::BackendError,
        DropReason::Timeout,
        DropReason::Cancelled,
        DropReason::StaleResult,
    ];

    fn index(self) -> usize {
        match self {
            DropReason::Evicted => 0,
            DropReason::StaleSkip => 1,
            DropReason::Flushed => 2,
            DropReason::BackendError => 3,
            DropReason::Timeout => 4,
            DropReason::Cancelled => 5,
            DropReason::StaleResult => 6,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            DropReason::Evicted => "evicted",
            DropReason::StaleSkip => "stale_skip",
            DropReason::Flushed => "flushed",
            DropReason::BackendError => "backend_error",
            DropReason::Timeout => "timeout",
            DropReason::Cancelled => "cancelled",
            DropReason::StaleResult => "stale_result",
        }
    }
}

/// A computed latency was negative: clock skew or an out-of-order response.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("negative {stage} latency ({value_ms}ms)")]
pub struct NegativeLatency {
    pub stage: &'static str,
    pub value_ms: i64,
}

/// Stage durations for one processed frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct LatencySample {
    pub network_ms: i64,
    pub server_ms: i64,
    pub total_ms: i64,
}

impl LatencySample {
    pub fn compute(
        capture_ts: i64,
        recv_ts: i64,
        inference_ts: i64,
        observed_now: i64,
    ) -> Result<Self, NegativeLatency> {
        let sample = Self {
            network_ms: recv_ts - capture_ts,
            server_ms: inference_ts - recv_ts,
            total_ms: observed_now - capture_ts,
        };
        for (stage, value_ms) in [
            ("network", sample.network_ms),
            ("server", sample.server_ms),
            ("total", sample.total_ms),
        ] {
            if value_ms < 0 {
                return Err(NegativeLatency { stage, value_ms });
            }
        }
        Ok(sample)
    }
}

/// Median and 95th percentile of a window, nearest-rank.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Percentiles {
    pub median_ms: i64,
    pub p95_ms: i64,
}

/// Sample at index `floor(len * q)` of an ascending slice.
pub fn nearest_rank(sorted: &[i64], q: f64) -> Option<i64> {
    if sorted.is_empty() {
        return None;
    }
    let idx = ((sorted.len() as f64) * q).floor() as usize;
    sorted.get(idx.min(sorted.len() - 1)).copied()
}

#[derive(Debug)]
struct RollingWindow {
    samples: VecDeque<i64>,
    capacity: usize,
}

impl RollingWindow {
    fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, value: i64) {
        while self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    fn percentiles(&self) -> Option<Percentiles> {
        let mut sorted: Vec<i64> = self.samples.iter().copied().collect();
        sorted.sort_unstable();
        Some(Percentiles {
            median_ms: nearest_rank(&sorted, 0.5)?,
            p95_ms: nearest_rank(&sorted, 0.95)?,
        })
    }

    fn clear(&mut self) {
        self.samples.clear();
    }
}

#[derive(Debug)]
struct TrackerState {
    network: RollingWindow,
    server: RollingWindow,
    total: RollingWindow,
    captured: u64,
    processed: u64,
    dropped: [u64; DropReason::ALL.len()],
    rejected: u64,
}

impl TrackerState {
    fn new(window: usize) -> Self {
        Self {
            network: RollingWindow::new(window),
            server: RollingWindow::new(window),
            total: RollingWindow::new(window),
            captured: 0,
            processed: 0,
            dropped: [0; DropReason::ALL.len()],
            rejected: 0,
        }
    }

    fn dropped_total(&self) -> u64 {
        self.dropped.iter().sum()
    }
}

/// Drop counts broken out by reason.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DropCounts {
    pub evicted: u64,
    pub stale_skip: u64,
    pub flushed: u64,
    pub backend_error: u64,
    pub timeout: u64,
    pub cancelled: u64,
    pub stale_result: u64,
}

/// Point-in-time view of the tracker, served by the stats API.
#[derive(Clone, Debug, Serialize)]
pub struct StatsSnapshot {
    pub frames_captured: u64,
    pub frames_processed: u64,
    pub frames_dropped: u64,
    pub drops: DropCounts,
    pub rejected_samples: u64,
    pub drop_rate: f64,
    pub network: Option<Percentiles>,
    pub server: Option<Percentiles>,
    pub total: Option<Percentiles>,
}

#[derive(Debug)]
pub struct LatencyTracker {
    window: usize,
    state: Mutex<TrackerState>,
}

impl LatencyTracker {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            state: Mutex::new(TrackerState::new(window)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Record stage timestamps for a processed frame.
    ///
    /// Samples with a negative stage are logged and counted as rejected,
    /// never added to the windows.
    pub fn record(
        &self,
        capture_ts: i64,
        recv_ts: i64,
        inference_ts: i64,
        observed_now: i64,
    ) -> Option<LatencySample> {
        match LatencySample::compute(capture_ts, recv_ts, inference_ts, observed_now) {
            Ok(sample) => {
                let mut state = self.lock();
                state.network.push(sample.network_ms);
                state.server.push(sample.server_ms);
                state.total.push(sample.total_ms);
                Some(sample)
            }
            Err(err) => {
                self.lock().rejected += 1;
                log::warn!(
                    "latency sample rejected: {} (capture_ts={} recv_ts={} inference_ts={} now={})",
                    err,
                    capture_ts,
                    recv_ts,
                    inference_ts,
                    observed_now
                );
                None
            }
        }
    }

    pub fn frame_captured(&self) {
        self.lock().captured += 1;
    }

    pub fn frame_processed(&self) {
        self.lock().processed += 1;
    }

    pub fn record_drop(&self, reason: DropReason, count: u64) {
        if count == 0 {
            return;
        }
        self.lock().dropped[reason.index()] += count;
    }

    pub fn frames_captured(&self) -> u64 {
        self.lock().captured
    }

    pub fn frames_processed(&self) -> u64 {
        self.lock().processed
    }

    pub fn frames_dropped(&self) -> u64 {
        self.lock().dropped_total()
    }

    pub fn dropped_by(&self, reason: DropReason) -> u64 {
        self.lock().dropped[reason.index()]
    }

    pub fn rejected_samples(&self) -> u64 {
        self.lock().rejected
    }

    /// `dropped / (processed + dropped)`, zero before any frame is accounted.
    pub fn drop_rate(&self) -> f64 {
        let state = self.lock();
        drop_rate(state.processed, state.dropped_total())
    }

    pub fn network_percentiles(&self) -> Option<Percentiles> {
        self.lock().network.percentiles()
    }

    pub fn server_percentiles(&self) -> Option<Percentiles> {
        self.lock().server.percentiles()
    }

    pub fn total_percentiles(&self) -> Option<Percentiles> {
        self.lock().total.percentiles()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let state = self.lock();
        let by = |reason: DropReason| state.dropped[reason.index()];
        let dropped = state.dropped_total();
        StatsSnapshot {
            frames_captured: state.captured,
            frames_processed: state.processed,
            frames_dropped: dropped,
            drops: DropCounts {
                evicted: by(DropReason::Evicted),
                stale_skip: by(DropReason::StaleSkip),
                flushed: by(DropReason::Flushed),
                backend_error: by(DropReason::BackendError),
                timeout: by(DropReason::Timeout),
                cancelled: by(DropReason::Cancelled),
                stale_result: by(DropReason::StaleResult),
            },
            rejected_samples: state.rejected,
            drop_rate: drop_rate(state.processed, dropped),
            network: state.network.percentiles(),
            server: state.server.percentiles(),
            total: state.total.percentiles(),
        }
    }

    /// Clear windows and counters for a fresh session.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.network.clear();
        state.server.clear();
        state.total.clear();
        state.captured = 0;
        state.processed = 0;
        state.dropped = [0; DropReason::ALL.len()];
        state.rejected = 0;
    }
}

impl Default for LatencyTracker {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

fn drop_rate(processed: u64, dropped: u64) -> f64 {
    let denom = processed + dropped;
    if denom == 0 {
        0.0
    } else {
        dropped as f64 / denom as f64
    }
}
