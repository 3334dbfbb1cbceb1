#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::codec::resize_rgb;
use crate::detect::error::BackendError;
use crate::detect::models::yolo::{decode_rows, YoloLayout, DEFAULT_CONFIDENCE};
use crate::detect::models::Detector;
use crate::detect::result::Detection;

/// Tract-based ONNX detector for end-to-end YOLO exports.
///
/// Loads a local model file and runs inference on RGB frames resized to the
/// model input resolution. No network I/O and no disk writes after loading.
pub struct TractDetector {
    name: String,
    model: TypedRunnableModel<TypedModel>,
    width: u32,
    height: u32,
    confidence_threshold: f32,
}

impl TractDetector {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        let name = model_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| model_path.display().to_string());

        Ok(Self {
            name,
            model,
            width,
            height,
            confidence_threshold: DEFAULT_CONFIDENCE,
        })
    }

    /// Override the default confidence threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    fn build_input(&self, pixels: &[u8], width: u32, height: u32) -> Result<Tensor> {
        let resized = resize_rgb(pixels.to_vec(), width, height, [self.width, self.height])?;
        let w = self.width as usize;
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.height as usize, w),
            |(_, channel, y, x)| resized[(y * w + x) * 3 + channel] as f32 / 255.0,
        );
        Ok(input.into_tensor())
    }

    fn decode_outputs(&self, outputs: TVec<TValue>) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let row_len = view.shape().last().copied().unwrap_or(0);
        let layout = YoloLayout::from_row_len(row_len).ok_or_else(|| {
            anyhow!(
                "unsupported output shape {:?}; expected [1,N,6] or [N,7]",
                view.shape()
            )
        })?;
        let values: Vec<f32> = view.iter().copied().collect();
        Ok(decode_rows(
            &values,
            layout,
            [self.width, self.height],
            self.confidence_threshold,
        ))
    }
}

impl Detector for TractDetector {
    fn name(&self) -> &str {
        &self.name
    }

    fn detect(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<Detection>, BackendError> {
        let input = self
            .build_input(pixels, width, height)
            .map_err(|err| BackendError::MalformedFrame(format!("{:#}", err)))?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .map_err(|err| BackendError::Inference(format!("ONNX inference failed: {}", err)))?;
        self.decode_outputs(outputs)
            .map_err(|err| BackendError::Inference(format!("{:#}", err)))
    }
}
