//! Captured frames.
//!
//! - `CapturedImage`: what a capture adapter hands over (pixels + dimensions).
//! - `Frame`: an image tagged with `frame_id` and `capture_ts`, owned by the
//!   pipeline from capture until it is dropped or handed to a backend.
//!
//! Pixels are RGB8, row-major, 3 bytes per pixel. A `Frame` is immutable after
//! construction: there is no `Clone`, no mutable accessor and no public field.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Bytes per pixel for the RGB8 layout used throughout the pipeline.
pub const BYTES_PER_PIXEL: usize = 3;

pub type FrameId = u64;

/// Raw image produced by a capture adapter, before the pipeline tags it.
#[derive(Clone, Debug)]
pub struct CapturedImage {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Capture time stamped by the source itself, if it has one.
    pub capture_ts: Option<i64>,
}

impl CapturedImage {
    pub fn new(pixels: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            pixels,
            width,
            height,
            capture_ts: None,
        }
    }

    pub fn with_capture_ts(mut self, capture_ts: i64) -> Self {
        self.capture_ts = Some(capture_ts);
        self
    }
}

/// A frame in flight through the pipeline.
#[derive(Debug)]
pub struct Frame {
    id: FrameId,
    capture_ts: i64,
    pixels: Vec<u8>,
    width: u32,
    height: u32,
}

impl Frame {
    pub fn new(id: FrameId, capture_ts: i64, pixels: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            id,
            capture_ts,
            pixels,
            width,
            height,
        }
    }

    pub fn id(&self) -> FrameId {
        self.id
    }

    pub fn capture_ts(&self) -> i64 {
        self.capture_ts
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Read-only pixel view for backends.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Byte length an RGB8 buffer of this frame's dimensions must have.
    pub fn expected_len(&self) -> Option<usize> {
        (self.width as usize)
            .checked_mul(self.height as usize)
            .and_then(|v| v.checked_mul(BYTES_PER_PIXEL))
    }

    /// True when dimensions are non-zero and the buffer matches them.
    pub fn is_well_formed(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.expected_len() == Some(self.pixels.len())
    }
}

/// Hands out unique, monotonically increasing frame ids and capture stamps.
///
/// Stamps taken from the clock never go backwards: a clock stepped back
/// (NTP correction, manual set) repeats the last issued stamp until it
/// catches up. Timestamps supplied by the source are kept as given.
#[derive(Debug, Default)]
pub struct FrameIdAllocator {
    next: AtomicU64,
    last_stamp: AtomicI64,
}

impl FrameIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> FrameId {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Clamp `now_ms` so it is never below a stamp already issued.
    fn stamp(&self, now_ms: i64) -> i64 {
        let prev = self.last_stamp.fetch_max(now_ms, Ordering::SeqCst);
        prev.max(now_ms)
    }

    /// Tag a captured image, using the source timestamp when present.
    pub fn tag(&self, image: CapturedImage, now_ms: i64) -> Frame {
        let capture_ts = match image.capture_ts {
            Some(ts) => ts,
            None => self.stamp(now_ms),
        };
        Frame::new(
            self.next_id(),
            capture_ts,
            image.pixels,
            image.width,
            image.height,
        )
    }
}
