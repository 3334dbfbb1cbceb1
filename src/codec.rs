//! Image payload helpers for the remote wire format.
//!
//! Frames travel as JPEG inside a `data:image/jpeg;base64,` URL. Decoding
//! accepts either a literal `,` or a URL-encoded `%2C` after the media type,
//! and bare base64 with no prefix.

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ExtendedColorType, RgbImage};

use crate::frame::BYTES_PER_PIXEL;

pub const JPEG_DATA_URL_PREFIX: &str = "data:image/jpeg;base64,";
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

fn check_rgb_len(pixels: &[u8], width: u32, height: u32) -> Result<()> {
    let expected = (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(BYTES_PER_PIXEL))
        .ok_or_else(|| anyhow!("RGB frame dimensions overflow"))?;
    if width == 0 || height == 0 || pixels.len() != expected {
        return Err(anyhow!(
            "RGB frame length mismatch: expected {} for {}x{}, got {}",
            expected,
            width,
            height,
            pixels.len()
        ));
    }
    Ok(())
}

/// Compress RGB8 pixels to JPEG.
pub fn encode_jpeg(pixels: &[u8], width: u32, height: u32, quality: u8) -> Result<Vec<u8>> {
    check_rgb_len(pixels, width, height)?;
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
        .encode(pixels, width, height, ExtendedColorType::Rgb8)
        .context("jpeg encode")?;
    Ok(out)
}

/// Encode RGB8 pixels as a JPEG data URL.
pub fn encode_data_url(pixels: &[u8], width: u32, height: u32, quality: u8) -> Result<String> {
    let jpeg = encode_jpeg(pixels, width, height, quality)?;
    Ok(format!("{}{}", JPEG_DATA_URL_PREFIX, STANDARD.encode(jpeg)))
}

/// Extract the raw bytes from a base64 data URL.
pub fn decode_data_url(data: &str) -> Result<Vec<u8>> {
    let payload = if data.starts_with("data:") {
        data.split_once(',')
            .or_else(|| data.split_once("%2C"))
            .or_else(|| data.split_once("%2c"))
            .map(|(_, payload)| payload)
            .ok_or_else(|| anyhow!("data url has no payload separator"))?
    } else {
        data
    };
    STANDARD
        .decode(payload.trim())
        .context("image_data is not valid base64")
}

/// Decode an encoded image into RGB8 pixels.
pub fn decode_rgb(bytes: &[u8]) -> Result<(Vec<u8>, u32, u32)> {
    let image = image::load_from_memory(bytes)
        .context("decode image")?
        .to_rgb8();
    let (width, height) = image.dimensions();
    Ok((image.into_raw(), width, height))
}

/// Resize RGB8 pixels to `target`; returns the input unchanged if already sized.
pub fn resize_rgb(pixels: Vec<u8>, width: u32, height: u32, target: [u32; 2]) -> Result<Vec<u8>> {
    let [tw, th] = target;
    if tw == 0 || th == 0 {
        return Err(anyhow!("target resolution must be non-zero"));
    }
    if (width, height) == (tw, th) {
        check_rgb_len(&pixels, width, height)?;
        return Ok(pixels);
    }
    check_rgb_len(&pixels, width, height)?;
    let image = RgbImage::from_raw(width, height, pixels)
        .ok_or_else(|| anyhow!("pixel buffer does not match {}x{}", width, height))?;
    Ok(image::imageops::resize(&image, tw, th, FilterType::Triangle).into_raw())
}
