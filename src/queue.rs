//! Bounded in-flight frame queue.
//!
//! `offer` never blocks: on a full queue the oldest frame is evicted and handed
//! back. `take_latest` pops the newest frame and discards everything older,
//! so a live overlay is always driven by the freshest capture.
//!
//! Every discard is counted on the session's `LatencyTracker`.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::frame::Frame;
use crate::latency::{DropReason, LatencyTracker};

/// Default queue capacity.
pub const DEFAULT_CAPACITY: usize = 5;

pub struct FrameQueue {
    capacity: usize,
    frames: Mutex<VecDeque<Frame>>,
    ready: Condvar,
    tracker: Arc<LatencyTracker>,
}

impl FrameQueue {
    /// Create a queue holding at most `capacity` frames (minimum 1).
    pub fn new(capacity: usize, tracker: Arc<LatencyTracker>) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            ready: Condvar::new(),
            tracker,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Frame>> {
        self.frames.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn tracker(&self) -> &Arc<LatencyTracker> {
        &self.tracker
    }

    /// Enqueue a frame, evicting and returning the oldest one if full.
    pub fn offer(&self, frame: Frame) -> Option<Frame> {
        let evicted = {
            let mut frames = self.lock();
            let evicted = if frames.len() >= self.capacity {
                frames.pop_front()
            } else {
                None
            };
            frames.push_back(frame);
            evicted
        };
        self.ready.notify_one();
        if let Some(old) = &evicted {
            self.tracker.record_drop(DropReason::Evicted, 1);
            log::debug!("queue full: evicted frame {}", old.id());
        }
        evicted
    }

    /// Remove and return the newest frame; older frames are dropped.
    ///
    /// An empty queue is the normal "nothing ready yet" state.
    pub fn take_latest(&self) -> Option<Frame> {
        let mut frames = self.lock();
        self.pop_latest(&mut frames)
    }

    /// Like `take_latest`, but waits up to `timeout` for a frame to arrive.
    pub fn wait_latest(&self, timeout: Duration) -> Option<Frame> {
        let frames = self.lock();
        let (mut frames, _) = self
            .ready
            .wait_timeout_while(frames, timeout, |frames| frames.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        self.pop_latest(&mut frames)
    }

    fn pop_latest(&self, frames: &mut VecDeque<Frame>) -> Option<Frame> {
        let latest = frames.pop_back()?;
        let skipped = frames.len() as u64;
        frames.clear();
        self.tracker.record_drop(DropReason::StaleSkip, skipped);
        Some(latest)
    }

    /// Discard every queued frame, returning how many were dropped.
    pub fn clear(&self) -> usize {
        let flushed: Vec<Frame> = self.lock().drain(..).collect();
        self.tracker
            .record_drop(DropReason::Flushed, flushed.len() as u64);
        flushed.len()
    }

    /// Wake any thread blocked in `wait_latest`.
    pub fn wake_all(&self) {
        self.ready.notify_all();
    }
}
