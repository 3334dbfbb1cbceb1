use crate::detect::error::BackendError;
use crate::detect::models::Detector;
use crate::detect::result::Detection;
use crate::frame::BYTES_PER_PIXEL;

pub const MODEL_NAME: &str = "motion";
pub const LABEL: &str = "motion";

const GRID: u32 = 16;
const DEFAULT_THRESHOLD: f32 = 12.0;

/// Frame-differencing detector.
///
/// Averages luminance over a coarse grid and reports the bounding box of the
/// cells whose mean changed by more than the threshold since the previous
/// frame. The first frame (or a frame with new dimensions) only sets the
/// baseline.
#[derive(Debug)]
pub struct MotionDetector {
    threshold: f32,
    previous: Option<CellGrid>,
}

#[derive(Debug)]
struct CellGrid {
    frame_width: u32,
    frame_height: u32,
    cols: u32,
    rows: u32,
    means: Vec<f32>,
}

impl MotionDetector {
    pub fn new() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            previous: None,
        }
    }

    /// Override the per-cell luminance change threshold (0..255).
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }
}

impl Default for MotionDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl CellGrid {
    fn build(pixels: &[u8], width: u32, height: u32) -> Self {
        let cols = GRID.min(width);
        let rows = GRID.min(height);
        let mut sums = vec![0f64; (cols * rows) as usize];
        let mut counts = vec![0u32; (cols * rows) as usize];
        let w = width as usize;
        for (i, px) in pixels.chunks_exact(BYTES_PER_PIXEL).enumerate() {
            let x = (i % w) as u64;
            let y = (i / w) as u64;
            let cx = (x * cols as u64 / width as u64) as usize;
            let cy = (y * rows as u64 / height as u64) as usize;
            let cell = cy * cols as usize + cx;
            let luma = 0.299 * px[0] as f64 + 0.587 * px[1] as f64 + 0.114 * px[2] as f64;
            sums[cell] += luma;
            counts[cell] += 1;
        }
        let means = sums
            .iter()
            .zip(&counts)
            .map(|(sum, &count)| if count == 0 { 0.0 } else { (sum / count as f64) as f32 })
            .collect();
        Self {
            frame_width: width,
            frame_height: height,
            cols,
            rows,
            means,
        }
    }

    fn same_shape(&self, other: &CellGrid) -> bool {
        self.frame_width == other.frame_width && self.frame_height == other.frame_height
    }
}

impl Detector for MotionDetector {
    fn name(&self) -> &str {
        MODEL_NAME
    }

    fn detect(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<Detection>, BackendError> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(BYTES_PER_PIXEL))
            .ok_or_else(|| BackendError::MalformedFrame("frame dimensions overflow".into()))?;
        if width == 0 || height == 0 || pixels.len() != expected {
            return Err(BackendError::MalformedFrame(format!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                pixels.len()
            )));
        }

        let grid = CellGrid::build(pixels, width, height);
        let previous = self.previous.replace(grid);
        let (Some(previous), Some(current)) = (previous, self.previous.as_ref()) else {
            return Ok(Vec::new());
        };
        if !previous.same_shape(current) {
            return Ok(Vec::new());
        }

        let mut changed = 0u32;
        let mut bounds: Option<(u32, u32, u32, u32)> = None;
        for row in 0..current.rows {
            for col in 0..current.cols {
                let idx = (row * current.cols + col) as usize;
                if (current.means[idx] - previous.means[idx]).abs() <= self.threshold {
                    continue;
                }
                changed += 1;
                bounds = Some(match bounds {
                    None => (col, row, col, row),
                    Some((c0, r0, c1, r1)) => (c0.min(col), r0.min(row), c1.max(col), r1.max(row)),
                });
            }
        }

        let Some((c0, r0, c1, r1)) = bounds else {
            return Ok(Vec::new());
        };
        let area = (c1 - c0 + 1) * (r1 - r0 + 1);
        let score = (changed as f32 / area as f32).clamp(0.0, 1.0);
        let cols = current.cols as f32;
        let rows = current.rows as f32;
        Ok(vec![Detection::new(
            LABEL,
            score,
            [
                c0 as f32 / cols,
                r0 as f32 / rows,
                (c1 + 1) as f32 / cols,
                (r1 + 1) as f32 / rows,
            ],
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, value: u8) -> Vec<u8> {
        vec![value; (width * height * 3) as usize]
    }

    fn with_block(width: u32, height: u32, x0: u32, y0: u32, size: u32) -> Vec<u8> {
        let mut pixels = solid(width, height, 0);
        for y in y0..(y0 + size).min(height) {
            for x in x0..(x0 + size).min(width) {
                let idx = ((y * width + x) * 3) as usize;
                pixels[idx..idx + 3].copy_from_slice(&[255, 255, 255]);
            }
        }
        pixels
    }

    #[test]
    fn first_frame_sets_baseline() {
        let mut detector = MotionDetector::new();
        assert!(detector.detect(&solid(64, 64, 10), 64, 64).unwrap().is_empty());
        assert!(detector.detect(&solid(64, 64, 10), 64, 64).unwrap().is_empty());
    }

    #[test]
    fn reports_box_around_changed_region() {
        let mut detector = MotionDetector::new();
        detector.detect(&solid(64, 64, 0), 64, 64).unwrap();
        let detections = detector
            .detect(&with_block(64, 64, 32, 32, 16), 64, 64)
            .unwrap();
        assert_eq!(detections.len(), 1);
        let det = &detections[0];
        assert_eq!(det.label, "motion");
        assert!(det.validate().is_ok());
        assert_eq!(det.xmin, 0.5);
        assert_eq!(det.ymin, 0.5);
        assert_eq!(det.xmax, 0.75);
        assert_eq!(det.ymax, 0.75);
        assert_eq!(det.score, 1.0);
    }

    #[test]
    fn rejects_short_buffer() {
        let mut detector = MotionDetector::new();
        let err = detector.detect(&[0u8; 10], 4, 4).unwrap_err();
        assert!(matches!(err, BackendError::MalformedFrame(_)));
    }

    #[test]
    fn dimension_change_resets_baseline() {
        let mut detector = MotionDetector::new();
        detector.detect(&solid(32, 32, 0), 32, 32).unwrap();
        assert!(detector
            .detect(&solid(64, 64, 255), 64, 64)
            .unwrap()
            .is_empty());
    }
}
