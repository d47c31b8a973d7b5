//! Crop preprocessing for the LivePortrait models
//!
//! Layout contract shared by `to_model_tensor` and `from_model_tensor`:
//! - axis order NCHW (`[1, 3, H, W]` in, `[3, H, W]` out of the generator)
//! - channel order R, G, B; `VisionFrame` is already RGB, which is the
//!   order the models were trained on
//! - values in `[0, 1]`, mapped linearly from `0..=255`

use anyhow::Result;
use image::imageops::FilterType;
use image::Rgb;
use ndarray::{Array4, ArrayView3};

use crate::error::RestorerError;
use crate::VisionFrame;

/// Input size of every LivePortrait model
pub const MODEL_INPUT_SIZE: (u32, u32) = (256, 256);

/// Resize a crop to the model input size and convert it to a model tensor
pub fn prepare_crop_frame(crop: &VisionFrame) -> Array4<f32> {
    let (width, height) = MODEL_INPUT_SIZE;
    let resized = resize_area(crop, width, height);
    to_model_tensor(&resized)
}

/// Convert a generator output back to a crop of `size`
pub fn normalize_crop_frame(tensor: ArrayView3<'_, f32>, size: (u32, u32)) -> Result<VisionFrame> {
    let crop = from_model_tensor(tensor)?;
    if crop.dimensions() == size {
        return Ok(crop);
    }
    Ok(image::imageops::resize(&crop, size.0, size.1, FilterType::Triangle))
}

/// Convert a frame to a `[1, 3, H, W]` tensor in `[0, 1]`
pub fn to_model_tensor(frame: &VisionFrame) -> Array4<f32> {
    let (width, height) = frame.dimensions();
    let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

    for (x, y, pixel) in frame.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = pixel[c] as f32 / 255.0;
        }
    }

    tensor
}

/// Convert a `[3, H, W]` tensor back to a frame, clipping to `[0, 1]` first
pub fn from_model_tensor(tensor: ArrayView3<'_, f32>) -> Result<VisionFrame> {
    let (channels, height, width) = tensor.dim();
    if channels != 3 {
        return Err(RestorerError::tensor_shape(
            "generator",
            format!("expected 3 channels, got {}", channels),
        )
        .into());
    }

    Ok(VisionFrame::from_fn(width as u32, height as u32, |x, y| {
        let value = |c: usize| (tensor[[c, y as usize, x as usize]].clamp(0.0, 1.0) * 255.0).round() as u8;
        Rgb([value(0), value(1), value(2)])
    }))
}

/// Area-averaging resize.
///
/// Each output pixel is the mean of the source area it covers, weighted by
/// fractional overlap. Upscaling falls back to bilinear filtering.
pub fn resize_area(frame: &VisionFrame, width: u32, height: u32) -> VisionFrame {
    let (src_w, src_h) = frame.dimensions();
    if (src_w, src_h) == (width, height) {
        return frame.clone();
    }
    if width > src_w || height > src_h {
        return image::imageops::resize(frame, width, height, FilterType::Triangle);
    }

    let x_weights = area_weights(src_w as usize, width as usize);
    let y_weights = area_weights(src_h as usize, height as usize);

    // Horizontal pass: src_h rows x width columns
    let mut rows = vec![[0.0f32; 3]; src_h as usize * width as usize];
    for y in 0..src_h as usize {
        for (x, weights) in x_weights.iter().enumerate() {
            let mut acc = [0.0f32; 3];
            for &(sx, w) in weights {
                let p = frame.get_pixel(sx as u32, y as u32);
                for c in 0..3 {
                    acc[c] += p[c] as f32 * w;
                }
            }
            rows[y * width as usize + x] = acc;
        }
    }

    VisionFrame::from_fn(width, height, |x, y| {
        let mut acc = [0.0f32; 3];
        for &(sy, w) in &y_weights[y as usize] {
            let row = rows[sy * width as usize + x as usize];
            for c in 0..3 {
                acc[c] += row[c] * w;
            }
        }
        Rgb(acc.map(|v| v.round().clamp(0.0, 255.0) as u8))
    })
}

/// Normalized overlap weights of each destination cell over source cells
fn area_weights(src: usize, dst: usize) -> Vec<Vec<(usize, f32)>> {
    let scale = src as f64 / dst as f64;

    (0..dst)
        .map(|d| {
            let start = d as f64 * scale;
            let end = (start + scale).min(src as f64);
            let mut weights = Vec::new();

            let mut s = start.floor() as usize;
            while (s as f64) < end && s < src {
                let overlap = (end.min(s as f64 + 1.0) - start.max(s as f64)).max(0.0);
                if overlap > 1e-9 {
                    weights.push((s, (overlap / scale) as f32));
                }
                s += 1;
            }
            weights
        })
        .collect()
}
