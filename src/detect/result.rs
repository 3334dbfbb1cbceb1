use serde::{Deserialize, Serialize};

use crate::frame::FrameId;

/// One labeled box in normalized image coordinates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub score: f32,
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
}

impl Detection {
    pub fn new(label: impl Into<String>, score: f32, bbox: [f32; 4]) -> Self {
        let [xmin, ymin, xmax, ymax] = bbox;
        Self {
            label: label.into(),
            score,
            xmin,
            ymin,
            xmax,
            ymax,
        }
    }

    /// Check score and coordinates are in `[0,1]` with non-empty extent.
    pub fn validate(&self) -> Result<(), String> {
        let unit = |v: f32| v.is_finite() && (0.0..=1.0).contains(&v);
        if !unit(self.score) {
            return Err(format!("score {} outside [0,1]", self.score));
        }
        for (name, v) in [
            ("xmin", self.xmin),
            ("ymin", self.ymin),
            ("xmax", self.xmax),
            ("ymax", self.ymax),
        ] {
            if !unit(v) {
                return Err(format!("{} {} outside [0,1]", name, v));
            }
        }
        if self.xmin >= self.xmax || self.ymin >= self.ymax {
            return Err(format!(
                "empty box [{}, {}, {}, {}]",
                self.xmin, self.ymin, self.xmax, self.ymax
            ));
        }
        Ok(())
    }
}

/// Output of one backend call.
///
/// Timestamps are epoch milliseconds; a well-behaved backend produces
/// `capture_ts <= recv_ts <= inference_ts`.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectionResult {
    pub frame_id: FrameId,
    pub capture_ts: i64,
    /// Time the backend began processing.
    pub recv_ts: i64,
    /// Time the backend finished.
    pub inference_ts: i64,
    /// In backend emission order.
    pub detections: Vec<Detection>,
}

impl DetectionResult {
    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    pub fn timestamps_ordered(&self) -> bool {
        self.capture_ts <= self.recv_ts && self.recv_ts <= self.inference_ts
    }
}
