use crate::detect::result::DetectionResult;
use crate::frame::Frame;

/// Consumer of rendered results (canvas, UI, log).
///
/// Boxes are normalized `[0,1]`; sinks map them to their own coordinates and
/// must tolerate an empty detection list.
pub trait OverlaySink: Send {
    fn render(&mut self, frame: &Frame, result: &DetectionResult);
}

impl<F> OverlaySink for F
where
    F: FnMut(&Frame, &DetectionResult) + Send,
{
    fn render(&mut self, frame: &Frame, result: &DetectionResult) {
        self(frame, result)
    }
}

/// Forwards results to a sink without ever regressing to an older frame.
pub struct OverlayStage {
    sink: Box<dyn OverlaySink>,
    last_rendered_ts: Option<i64>,
}

impl OverlayStage {
    pub fn new(sink: Box<dyn OverlaySink>) -> Self {
        Self {
            sink,
            last_rendered_ts: None,
        }
    }

    pub fn last_rendered_ts(&self) -> Option<i64> {
        self.last_rendered_ts
    }

    /// True when `capture_ts` is older than the last rendered result.
    pub fn is_stale(&self, capture_ts: i64) -> bool {
        matches!(self.last_rendered_ts, Some(last) if capture_ts < last)
    }

    /// Render `result` unless it is stale. Returns whether it was rendered.
    pub fn present(&mut self, frame: &Frame, result: &DetectionResult) -> bool {
        if self.is_stale(result.capture_ts) {
            return false;
        }
        self.last_rendered_ts = Some(result.capture_ts);
        self.sink.render(frame, result);
        true
    }

    pub fn reset(&mut self) {
        self.last_rendered_ts = None;
    }
}

/// Logs each rendered result.
#[derive(Default)]
pub struct LogOverlay;

impl OverlaySink for LogOverlay {
    fn render(&mut self, frame: &Frame, result: &DetectionResult) {
        if result.is_empty() {
            log::debug!("frame {}: no detections", frame.id());
            return;
        }
        let summary: Vec<String> = result
            .detections
            .iter()
            .map(|det| {
                format!(
                    "{} {:.2} [{:.2},{:.2},{:.2},{:.2}]",
                    det.label, det.score, det.xmin, det.ymin, det.xmax, det.ymax
                )
            })
            .collect();
        log::info!("frame {}: {}", frame.id(), summary.join("; "));
    }
}
