//! Blend masks for crop paste-back
//!
//! Every source vetoes the pixels it considers unsafe to overwrite; sources
//! are combined by element-wise minimum and clamped to `[0, 1]`.

use anyhow::Result;
use image::{ImageBuffer, Luma};
use ndarray::{Array2, Zip};

use crate::error::RestorerError;

/// Single-channel mask, indexed `[row, column]`
pub type Mask = Array2<f32>;

/// Rectangular mask with a blurred falloff towards the crop border.
///
/// `size` is `(width, height)`, `blur` is the falloff as a fraction of half
/// the crop width, `padding` is `[top, right, bottom, left]` in percent.
/// At least one border pixel on each side is always masked out.
pub fn static_box_mask(size: (u32, u32), blur: f32, padding: [u32; 4]) -> Mask {
    let (width, height) = size;
    let (w, h) = (width as usize, height as usize);

    let blur_amount = (width as f32 * 0.5 * blur) as usize;
    let blur_area = (blur_amount / 2).max(1);
    let [top, right, bottom, left] = padding;

    let edge = |extent: usize, percent: u32| blur_area.max(extent * percent as usize / 100).min(extent);
    let (top, bottom) = (edge(h, top), edge(h, bottom));
    let (left, right) = (edge(w, left), edge(w, right));

    let mut mask = Mask::zeros((h, w));
    if top + bottom < h && left + right < w {
        mask.slice_mut(ndarray::s![top..h - bottom, left..w - right]).fill(1.0);
    }

    if blur_amount > 0 {
        mask = gaussian_blur(mask, blur_amount as f32 * 0.25);
    }
    mask
}

fn gaussian_blur(mask: Mask, sigma: f32) -> Mask {
    let (h, w) = mask.dim();
    let raw: Vec<f32> = mask.iter().copied().collect();

    let Some(buffer) = ImageBuffer::<Luma<f32>, Vec<f32>>::from_raw(w as u32, h as u32, raw) else {
        return mask;
    };
    let blurred = image::imageops::blur(&buffer, sigma);

    Array2::from_shape_vec((h, w), blurred.into_raw()).unwrap_or(mask)
}

/// Element-wise minimum of all masks, clamped to `[0, 1]`
pub fn combine_masks(masks: &[Mask]) -> Result<Mask> {
    let Some((first, rest)) = masks.split_first() else {
        anyhow::bail!("No masks to combine");
    };

    let mut combined = first.clone();
    for mask in rest {
        if mask.dim() != combined.dim() {
            return Err(RestorerError::FrameSize {
                expected: combined.dim(),
                actual: mask.dim(),
            }
            .into());
        }
        Zip::from(&mut combined).and(mask).for_each(|c, &m| *c = c.min(m));
    }

    combined.mapv_inplace(|v| v.clamp(0.0, 1.0));
    Ok(combined)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn in_unit_range(mask: &Mask) -> bool {
        mask.iter().all(|v| (0.0..=1.0).contains(v))
    }

    #[test]
    fn test_box_mask_without_blur() {
        let mask = static_box_mask((8, 6), 0.0, [0, 0, 0, 0]);
        assert_eq!(mask.dim(), (6, 8));
        assert_eq!(mask[[0, 3]], 0.0);
        assert_eq!(mask[[5, 3]], 0.0);
        assert_eq!(mask[[3, 0]], 0.0);
        assert_eq!(mask[[3, 7]], 0.0);
        assert_eq!(mask[[3, 3]], 1.0);
    }

    #[test]
    fn test_box_mask_padding() {
        let mask = static_box_mask((10, 10), 0.0, [50, 0, 0, 0]);
        assert_eq!(mask[[4, 5]], 0.0);
        assert_eq!(mask[[6, 5]], 1.0);
    }

    #[test]
    fn test_box_mask_blur_falloff() {
        let mask = static_box_mask((128, 128), 0.3, [0, 0, 0, 0]);
        assert!(in_unit_range(&mask));
        assert!(mask[[64, 64]] > 0.99);
        assert!(mask[[0, 64]] < 0.1);
        assert!(mask[[20, 64]] > mask[[5, 64]]);
    }

    #[test]
    fn test_combine_takes_minimum() {
        let a = Mask::from_elem((2, 2), 0.8);
        let mut b = Mask::from_elem((2, 2), 0.5);
        b[[0, 0]] = 1.0;

        let combined = combine_masks(&[a.clone(), b.clone()]).unwrap();
        assert_eq!(combined[[0, 0]], 0.8);
        assert_eq!(combined[[1, 1]], 0.5);
        assert_eq!(combined, combine_masks(&[b, a]).unwrap());
    }

    #[test]
    fn test_combine_idempotent_and_clamped() {
        let mut a = Mask::from_elem((3, 3), 0.4);
        a[[1, 1]] = 1.7;
        a[[0, 0]] = -0.2;

        let once = combine_masks(&[a.clone()]).unwrap();
        assert_eq!(combine_masks(&[a.clone(), a]).unwrap(), once);
        assert!(in_unit_range(&once));
        assert_eq!(once[[1, 1]], 1.0);
        assert_eq!(once[[0, 0]], 0.0);
    }

    #[test]
    fn test_combine_rejects_size_mismatch() {
        let a = Mask::ones((2, 2));
        let b = Mask::ones((3, 2));
        assert!(combine_masks(&[a, b]).is_err());
        assert!(combine_masks(&[]).is_err());
    }
}
