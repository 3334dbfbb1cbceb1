//! YOLO output decoding shared by ONNX-backed detectors.
//!
//! Two end-to-end export layouts are understood:
//! - YOLOv10: `[1, N, 6]` rows of `[x1, y1, x2, y2, score, class]`, sorted by
//!   score, so decoding stops at the first row below threshold.
//! - YOLOv7 (NMS export): `[N, 7]` rows of `[batch, x1, y1, x2, y2, class, score]`,
//!   unsorted, so rows below threshold are skipped.
//!
//! Box coordinates are in model input pixels and are normalized to `[0,1]`.

use crate::detect::models::labels::coco_label;
use crate::detect::result::Detection;

pub const DEFAULT_CONFIDENCE: f32 = 0.25;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum YoloLayout {
    V10,
    V7,
}

impl YoloLayout {
    pub fn from_row_len(row_len: usize) -> Option<Self> {
        match row_len {
            6 => Some(YoloLayout::V10),
            7 => Some(YoloLayout::V7),
            _ => None,
        }
    }

    pub fn row_len(self) -> usize {
        match self {
            YoloLayout::V10 => 6,
            YoloLayout::V7 => 7,
        }
    }
}

/// Decode flattened output rows into normalized detections.
pub fn decode_rows(
    values: &[f32],
    layout: YoloLayout,
    input_size: [u32; 2],
    threshold: f32,
) -> Vec<Detection> {
    let [input_w, input_h] = input_size;
    let (w, h) = (input_w.max(1) as f32, input_h.max(1) as f32);
    let mut detections = Vec::new();
    for row in values.chunks_exact(layout.row_len()) {
        let (x1, y1, x2, y2, class_id, score) = match layout {
            YoloLayout::V10 => (row[0], row[1], row[2], row[3], row[5], row[4]),
            YoloLayout::V7 => (row[1], row[2], row[3], row[4], row[5], row[6]),
        };
        if score.is_nan() || score < threshold {
            match layout {
                YoloLayout::V10 => break,
                YoloLayout::V7 => continue,
            }
        }
        let clamp = |v: f32, extent: f32| (v / extent).clamp(0.0, 1.0);
        let det = Detection::new(
            coco_label(class_id.max(0.0) as usize),
            score.clamp(0.0, 1.0),
            [clamp(x1, w), clamp(y1, h), clamp(x2, w), clamp(y2, h)],
        );
        if det.validate().is_ok() {
            detections.push(det);
        }
    }
    detections
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v10_stops_at_first_low_score() {
        let rows = [
            10.0, 20.0, 110.0, 220.0, 0.9, 0.0, //
            0.0, 0.0, 64.0, 64.0, 0.1, 2.0, //
            0.0, 0.0, 64.0, 64.0, 0.8, 2.0,
        ];
        let dets = decode_rows(&rows, YoloLayout::V10, [256, 256], DEFAULT_CONFIDENCE);
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].label, "person");
        assert!((dets[0].xmin - 10.0 / 256.0).abs() < 1e-6);
        assert!((dets[0].ymax - 220.0 / 256.0).abs() < 1e-6);
    }

    #[test]
    fn v7_skips_low_scores_and_clamps() {
        let rows = [
            0.0, 0.0, 0.0, 64.0, 64.0, 2.0, 0.1, //
            0.0, -5.0, 10.0, 300.0, 128.0, 16.0, 0.7,
        ];
        let dets = decode_rows(&rows, YoloLayout::V7, [256, 256], DEFAULT_CONFIDENCE);
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].label, "dog");
        assert_eq!(dets[0].xmin, 0.0);
        assert_eq!(dets[0].xmax, 1.0);
    }

    #[test]
    fn degenerate_boxes_are_discarded() {
        let rows = [50.0, 50.0, 50.0, 80.0, 0.9, 0.0];
        assert!(decode_rows(&rows, YoloLayout::V10, [100, 100], 0.25).is_empty());
    }

    #[test]
    fn layout_from_row_len() {
        assert_eq!(YoloLayout::from_row_len(6), Some(YoloLayout::V10));
        assert_eq!(YoloLayout::from_row_len(7), Some(YoloLayout::V7));
        assert_eq!(YoloLayout::from_row_len(85), None);
    }
}
