//! Capture adapters feeding the pipeline.
//!
//! A `FrameSource` blocks at its native cadence and hands back RGB images; the
//! pipeline assigns frame ids and capture timestamps. Sources:
//! - `stub://` synthetic scene with a moving block (tests, demos)
//! - `http(s)://` JPEG snapshot endpoints, polled at the target rate
//! - `ChannelSource`, fed by an external transport through `FrameSender`

use std::io::Read;
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};

use crate::codec::decode_rgb;
use crate::config::CaptureSettings;
use crate::frame::{CapturedImage, BYTES_PER_PIXEL};

pub trait FrameSource: Send {
    /// Block until the next image; `Ok(None)` ends the stream.
    fn next_image(&mut self) -> Result<Option<CapturedImage>>;

    fn name(&self) -> &str;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_image(&mut self) -> Result<Option<CapturedImage>> {
        (**self).next_image()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Open the source named by `settings.url`.
pub fn open_source(settings: &CaptureSettings) -> Result<Box<dyn FrameSource>> {
    let url = settings.url.trim();
    if url.starts_with("stub://") {
        let source = SyntheticSource::new(url, settings.width, settings.height)
            .with_interval(settings.frame_interval());
        return Ok(Box::new(source));
    }
    if url.starts_with("http://") || url.starts_with("https://") {
        return Ok(Box::new(SnapshotSource::new(url, settings.frame_interval())));
    }
    Err(anyhow!(
        "unsupported capture url '{}'; use stub://, http(s):// or a channel source",
        url
    ))
}

/// Sleeps until the next tick of a fixed cadence.
struct Pacer {
    interval: Duration,
    next_at: Option<Instant>,
}

impl Pacer {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_at: None,
        }
    }

    fn wait(&mut self) {
        let now = Instant::now();
        // A late tick restarts the cadence instead of bursting to catch up.
        let due = match self.next_at {
            Some(at) if at > now => {
                std::thread::sleep(at - now);
                at
            }
            _ => now,
        };
        self.next_at = Some(due + self.interval);
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for tests
// ----------------------------------------------------------------------------

/// Grey scene with a bright block sliding left to right.
pub struct SyntheticSource {
    name: String,
    width: u32,
    height: u32,
    frame_count: u64,
    max_frames: Option<u64>,
    pacer: Pacer,
}

impl SyntheticSource {
    pub fn new(name: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            name: name.into(),
            width: width.max(1),
            height: height.max(1),
            frame_count: 0,
            max_frames: None,
            pacer: Pacer::new(Duration::ZERO),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.pacer = Pacer::new(interval);
        self
    }

    /// End the stream after `max_frames` images.
    pub fn with_max_frames(mut self, max_frames: u64) -> Self {
        self.max_frames = Some(max_frames);
        self
    }

    pub fn frames_emitted(&self) -> u64 {
        self.frame_count
    }

    fn render(&self) -> Vec<u8> {
        let (w, h) = (self.width as usize, self.height as usize);
        let mut pixels = vec![40u8; w * h * BYTES_PER_PIXEL];
        let block = (w / 8).max(1);
        let travel = w.saturating_sub(block).max(1);
        let x0 = (self.frame_count as usize * (block / 2).max(1)) % travel;
        let y0 = h.saturating_sub(block) / 2;
        for y in y0..(y0 + block).min(h) {
            for x in x0..(x0 + block).min(w) {
                let idx = (y * w + x) * BYTES_PER_PIXEL;
                pixels[idx..idx + BYTES_PER_PIXEL].copy_from_slice(&[230, 230, 230]);
            }
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn next_image(&mut self) -> Result<Option<CapturedImage>> {
        if matches!(self.max_frames, Some(max) if self.frame_count >= max) {
            return Ok(None);
        }
        self.pacer.wait();
        let pixels = self.render();
        self.frame_count += 1;
        Ok(Some(CapturedImage::new(pixels, self.width, self.height)))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ----------------------------------------------------------------------------
// HTTP JPEG snapshot source
// ----------------------------------------------------------------------------

pub struct SnapshotSource {
    url: String,
    pacer: Pacer,
}

impl SnapshotSource {
    pub fn new(url: impl Into<String>, interval: Duration) -> Self {
        Self {
            url: url.into(),
            pacer: Pacer::new(interval),
        }
    }
}

impl FrameSource for SnapshotSource {
    fn next_image(&mut self) -> Result<Option<CapturedImage>> {
        self.pacer.wait();
        let response = ureq::get(&self.url)
            .call()
            .with_context(|| format!("fetch jpeg snapshot from {}", self.url))?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut bytes)
            .context("read jpeg snapshot")?;
        if bytes.is_empty() {
            return Err(anyhow!("empty jpeg snapshot"));
        }
        let (pixels, width, height) = decode_rgb(&bytes)?;
        Ok(Some(CapturedImage::new(pixels, width, height)))
    }

    fn name(&self) -> &str {
        &self.url
    }
}

// ----------------------------------------------------------------------------
// Channel source for externally delivered frames
// ----------------------------------------------------------------------------

/// Create a connected sender/source pair buffering at most `bound` images.
pub fn channel(bound: usize) -> (FrameSender, ChannelSource) {
    let (tx, rx) = mpsc::sync_channel(bound.max(1));
    (FrameSender { tx }, ChannelSource { rx })
}

#[derive(Clone)]
pub struct FrameSender {
    tx: SyncSender<CapturedImage>,
}

impl FrameSender {
    /// Deliver an image; false once the pipeline side is gone.
    pub fn send(&self, image: CapturedImage) -> bool {
        self.tx.send(image).is_ok()
    }
}

/// Ends when every `FrameSender` has been dropped.
pub struct ChannelSource {
    rx: Receiver<CapturedImage>,
}

impl FrameSource for ChannelSource {
    fn next_image(&mut self) -> Result<Option<CapturedImage>> {
        Ok(self.rx.recv().ok())
    }

    fn name(&self) -> &str {
        "channel"
    }
}
