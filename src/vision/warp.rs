//! Crop transform between frame space and template-aligned crop space
//!
//! The forward warp resamples a frame into a fixed-size crop whose 5-point
//! landmarks sit on a canonical template. Paste-back maps a processed crop
//! into frame space through the same matrix and blends it by a mask.
//! Samples falling outside either raster read as zero.

use anyhow::{bail, Result};
use image::Rgb;

use crate::error::RestorerError;
use crate::face::Point;
use crate::VisionFrame;

use super::mask::Mask;

/// 2x3 affine matrix mapping frame coordinates to crop coordinates
pub type AffineMatrix = [[f32; 3]; 2];

/// Canonical 5-point layouts, normalized to a unit crop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarpTemplate {
    Arcface128V2,
}

impl WarpTemplate {
    /// Left eye, right eye, nose, left mouth corner, right mouth corner
    pub fn points(&self) -> [Point; 5] {
        match self {
            WarpTemplate::Arcface128V2 => [
                (0.361_676_56, 0.403_877_34),
                (0.636_967_19, 0.402_354_69),
                (0.500_196_87, 0.560_442_19),
                (0.387_103_91, 0.721_605_47),
                (0.615_077_34, 0.720_344_53),
            ],
        }
    }

    /// Template points scaled to a crop size
    pub fn scaled(&self, size: (u32, u32)) -> [Point; 5] {
        let (width, height) = (size.0 as f32, size.1 as f32);
        self.points().map(|(x, y)| (x * width, y * height))
    }
}

/// Least-squares similarity transform (rotation, uniform scale, translation)
/// mapping `src` onto `dst`.
///
/// Closed form of the 2D Umeyama estimate without reflection.
pub fn estimate_similarity_transform(src: &[Point], dst: &[Point]) -> Result<AffineMatrix> {
    if src.len() != dst.len() || src.len() < 2 {
        bail!(
            "Similarity estimation needs matching point sets of at least 2, got {} and {}",
            src.len(),
            dst.len()
        );
    }

    let n = src.len() as f32;
    let centroid = |points: &[Point]| {
        let (sx, sy) = points
            .iter()
            .fold((0.0f32, 0.0f32), |(ax, ay), (x, y)| (ax + x, ay + y));
        (sx / n, sy / n)
    };
    let (src_cx, src_cy) = centroid(src);
    let (dst_cx, dst_cy) = centroid(dst);

    let mut var_src = 0.0f32;
    let mut dot = 0.0f32;
    let mut cross = 0.0f32;

    for (s, d) in src.iter().zip(dst.iter()) {
        let (sx, sy) = (s.0 - src_cx, s.1 - src_cy);
        let (dx, dy) = (d.0 - dst_cx, d.1 - dst_cy);

        var_src += sx * sx + sy * sy;
        dot += sx * dx + sy * dy;
        cross += sx * dy - sy * dx;
    }

    if var_src <= 1e-10 {
        bail!("Degenerate landmark set: all points coincide");
    }

    // [a -b; b a] = scale * R
    let a = dot / var_src;
    let b = cross / var_src;

    let tx = dst_cx - (a * src_cx - b * src_cy);
    let ty = dst_cy - (b * src_cx + a * src_cy);

    Ok([[a, -b, tx], [b, a, ty]])
}

/// Invert a 2x3 affine matrix
pub fn invert_affine(matrix: &AffineMatrix) -> Result<AffineMatrix> {
    let [[a, b, tx], [c, d, ty]] = *matrix;
    let det = a * d - b * c;
    if det.abs() < 1e-12 {
        bail!("Affine matrix is singular");
    }

    let (ia, ib, ic, id) = (d / det, -b / det, -c / det, a / det);
    Ok([
        [ia, ib, -(ia * tx + ib * ty)],
        [ic, id, -(ic * tx + id * ty)],
    ])
}

#[inline]
fn apply(matrix: &AffineMatrix, x: f32, y: f32) -> (f32, f32) {
    (
        matrix[0][0] * x + matrix[0][1] * y + matrix[0][2],
        matrix[1][0] * x + matrix[1][1] * y + matrix[1][2],
    )
}

/// Bilinear sample with zero fill outside the raster.
///
/// `read(x, y)` is only called for in-bounds neighbours with non-zero weight.
#[inline]
fn sample_bilinear<const N: usize>(
    width: u32,
    height: u32,
    x: f32,
    y: f32,
    read: impl Fn(u32, u32) -> [f32; N],
) -> [f32; N] {
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;

    let mut out = [0.0f32; N];
    let neighbours = [
        (x0, y0, (1.0 - fx) * (1.0 - fy)),
        (x0 + 1.0, y0, fx * (1.0 - fy)),
        (x0, y0 + 1.0, (1.0 - fx) * fy),
        (x0 + 1.0, y0 + 1.0, fx * fy),
    ];

    for (nx, ny, weight) in neighbours {
        if weight <= 0.0 || nx < 0.0 || ny < 0.0 || nx >= width as f32 || ny >= height as f32 {
            continue;
        }
        let value = read(nx as u32, ny as u32);
        for c in 0..N {
            out[c] += value[c] * weight;
        }
    }

    out
}

fn sample_frame(frame: &VisionFrame, x: f32, y: f32) -> [f32; 3] {
    sample_bilinear(frame.width(), frame.height(), x, y, |px, py| {
        let p = frame.get_pixel(px, py);
        [p[0] as f32, p[1] as f32, p[2] as f32]
    })
}

fn sample_mask(mask: &Mask, x: f32, y: f32) -> f32 {
    let (rows, cols) = mask.dim();
    sample_bilinear(cols as u32, rows as u32, x, y, |px, py| [mask[[py as usize, px as usize]]])[0]
}

#[inline]
fn to_channel(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

/// Resample `frame` into a `size` crop through `matrix` (frame -> crop)
pub fn warp_affine(frame: &VisionFrame, matrix: &AffineMatrix, size: (u32, u32)) -> Result<VisionFrame> {
    let inverse = invert_affine(matrix)?;
    let (width, height) = size;

    Ok(VisionFrame::from_fn(width, height, |x, y| {
        let (src_x, src_y) = apply(&inverse, x as f32, y as f32);
        let [r, g, b] = sample_frame(frame, src_x, src_y);
        Rgb([to_channel(r), to_channel(g), to_channel(b)])
    }))
}

/// Align a face to `template` at `size`, returning the crop and the matrix
/// that produced it.
pub fn warp_face_by_landmark_5(
    frame: &VisionFrame,
    landmark_5: &[Point],
    template: WarpTemplate,
    size: (u32, u32),
) -> Result<(VisionFrame, AffineMatrix)> {
    if landmark_5.len() != 5 {
        return Err(RestorerError::MissingLandmarks.into());
    }

    let matrix = estimate_similarity_transform(landmark_5, &template.scaled(size))?;
    let crop = warp_affine(frame, &matrix, size)?;
    Ok((crop, matrix))
}

/// Blend `crop` into `target` through `matrix`, the one returned by the warp
/// that produced the crop.
///
/// Every target pixel takes `target * (1 - m) + crop * m`, where `m` is the
/// mask sampled at the pixel's crop-space position. Pixels outside the
/// crop's footprint are copied unchanged.
pub fn paste_back(
    target: &VisionFrame,
    crop: &VisionFrame,
    mask: &Mask,
    matrix: &AffineMatrix,
) -> Result<VisionFrame> {
    let (rows, cols) = mask.dim();
    if (cols as u32, rows as u32) != crop.dimensions() {
        return Err(RestorerError::FrameSize {
            expected: (crop.height() as usize, crop.width() as usize),
            actual: (rows, cols),
        }
        .into());
    }

    let mut output = target.clone();
    let Some((x_range, y_range)) = footprint(target, crop, matrix)? else {
        return Ok(output);
    };

    for y in y_range {
        for x in x_range.clone() {
            let (cx, cy) = apply(matrix, x as f32, y as f32);
            let m = sample_mask(mask, cx, cy).clamp(0.0, 1.0);
            if m <= 0.0 {
                continue;
            }

            let sampled = sample_frame(crop, cx, cy);
            let pixel = output.get_pixel_mut(x, y);
            for c in 0..3 {
                let blended = pixel[c] as f32 * (1.0 - m) + sampled[c] * m;
                pixel[c] = to_channel(blended);
            }
        }
    }

    Ok(output)
}

/// Target-frame pixel ranges covered by the crop, clamped to the frame
fn footprint(
    target: &VisionFrame,
    crop: &VisionFrame,
    matrix: &AffineMatrix,
) -> Result<Option<(std::ops::Range<u32>, std::ops::Range<u32>)>> {
    let inverse = invert_affine(matrix)?;
    let (cw, ch) = (crop.width() as f32, crop.height() as f32);
    let corners = [(0.0, 0.0), (cw, 0.0), (0.0, ch), (cw, ch)].map(|(x, y)| apply(&inverse, x, y));

    let min_x = corners.iter().map(|c| c.0).fold(f32::INFINITY, f32::min).floor() - 1.0;
    let max_x = corners.iter().map(|c| c.0).fold(f32::NEG_INFINITY, f32::max).ceil() + 1.0;
    let min_y = corners.iter().map(|c| c.1).fold(f32::INFINITY, f32::min).floor() - 1.0;
    let max_y = corners.iter().map(|c| c.1).fold(f32::NEG_INFINITY, f32::max).ceil() + 1.0;

    let x0 = min_x.max(0.0) as u32;
    let y0 = min_y.max(0.0) as u32;
    let x1 = max_x.min(target.width() as f32).max(0.0) as u32;
    let y1 = max_y.min(target.height() as f32).max(0.0) as u32;

    if x0 >= x1 || y0 >= y1 {
        return Ok(None);
    }
    Ok(Some((x0..x1, y0..y1)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn pattern(width: u32, height: u32) -> VisionFrame {
        VisionFrame::from_fn(width, height, |x, y| {
            Rgb([(x * 13 % 256) as u8, (y * 29 % 256) as u8, ((x + y) * 7 % 256) as u8])
        })
    }

    #[test]
    fn test_estimate_recovers_similarity() {
        let angle = 0.3f32;
        let scale = 1.7f32;
        let (tx, ty) = (12.0f32, -4.0f32);
        let src: Vec<Point> = vec![(10.0, 20.0), (40.0, 22.0), (25.0, 35.0), (15.0, 50.0), (38.0, 49.0)];
        let dst: Vec<Point> = src
            .iter()
            .map(|(x, y)| {
                (
                    scale * (angle.cos() * x - angle.sin() * y) + tx,
                    scale * (angle.sin() * x + angle.cos() * y) + ty,
                )
            })
            .collect();

        let m = estimate_similarity_transform(&src, &dst).unwrap();
        assert!((m[0][0] - scale * angle.cos()).abs() < 1e-3);
        assert!((m[1][0] - scale * angle.sin()).abs() < 1e-3);
        assert!((m[0][2] - tx).abs() < 1e-2);
        assert!((m[1][2] - ty).abs() < 1e-2);
    }

    #[test]
    fn test_degenerate_landmarks_rejected() {
        let src = vec![(5.0, 5.0); 5];
        let dst = WarpTemplate::Arcface128V2.scaled((512, 512));
        assert!(estimate_similarity_transform(&src, &dst).is_err());
    }

    #[test]
    fn test_invert_affine() {
        let m: AffineMatrix = [[2.0, -1.0, 3.0], [1.0, 2.0, -5.0]];
        let inv = invert_affine(&m).unwrap();
        let (x, y) = apply(&m, 7.0, 11.0);
        let (bx, by) = apply(&inv, x, y);
        assert!((bx - 7.0).abs() < 1e-4);
        assert!((by - 11.0).abs() < 1e-4);
    }

    #[test]
    fn test_warp_zero_fills_outside() {
        let frame = VisionFrame::from_pixel(4, 4, Rgb([200, 200, 200]));
        // Shift so the crop reads beyond the right/bottom edge
        let m: AffineMatrix = [[1.0, 0.0, -2.0], [0.0, 1.0, -2.0]];
        let crop = warp_affine(&frame, &m, (4, 4)).unwrap();
        assert_eq!(crop.get_pixel(0, 0), &Rgb([200, 200, 200]));
        assert_eq!(crop.get_pixel(1, 1), &Rgb([200, 200, 200]));
        assert_eq!(crop.get_pixel(3, 3), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_paste_back_round_trip_identity() {
        let frame = pattern(12, 10);
        let m: AffineMatrix = [[1.0, 0.0, -3.0], [0.0, 1.0, -2.0]];
        let crop = warp_affine(&frame, &m, (5, 4)).unwrap();
        let ones = Array2::<f32>::ones((4, 5));

        let restored = paste_back(&frame, &crop, &ones, &m).unwrap();
        assert_eq!(restored, frame);
    }

    #[test]
    fn test_paste_back_leaves_outside_footprint() {
        let frame = pattern(20, 20);
        let crop = VisionFrame::from_pixel(4, 4, Rgb([255, 0, 255]));
        let ones = Array2::<f32>::ones((4, 4));
        let m: AffineMatrix = [[1.0, 0.0, -8.0], [0.0, 1.0, -8.0]];

        let output = paste_back(&frame, &crop, &ones, &m).unwrap();
        for (x, y, pixel) in output.enumerate_pixels() {
            let inside = (8..12).contains(&x) && (8..12).contains(&y);
            if inside {
                assert_eq!(pixel, &Rgb([255, 0, 255]));
            } else if !(7..=12).contains(&x) || !(7..=12).contains(&y) {
                assert_eq!(pixel, frame.get_pixel(x, y));
            }
        }
    }

    #[test]
    fn test_paste_back_zero_mask_is_noop() {
        let frame = pattern(16, 16);
        let crop = VisionFrame::from_pixel(8, 8, Rgb([1, 2, 3]));
        let zeros = Array2::<f32>::zeros((8, 8));
        let m: AffineMatrix = [[0.5, 0.0, 0.0], [0.0, 0.5, 0.0]];

        assert_eq!(paste_back(&frame, &crop, &zeros, &m).unwrap(), frame);
    }

    #[test]
    fn test_paste_back_rejects_mask_size() {
        let frame = pattern(8, 8);
        let crop = VisionFrame::new(4, 4);
        let mask = Array2::<f32>::ones((3, 4));
        let m: AffineMatrix = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
        assert!(paste_back(&frame, &crop, &mask, &m).is_err());
    }

    #[test]
    fn test_warp_face_aligns_template() {
        let size = (64, 64);
        // Landmarks placed on the template shifted by (5, 7)
        let landmarks: Vec<Point> = WarpTemplate::Arcface128V2
            .scaled(size)
            .iter()
            .map(|(x, y)| (x + 5.0, y + 7.0))
            .collect();
        let frame = pattern(96, 96);

        let (crop, m) = warp_face_by_landmark_5(&frame, &landmarks, WarpTemplate::Arcface128V2, size).unwrap();
        assert_eq!(crop.dimensions(), size);
        assert!((m[0][0] - 1.0).abs() < 1e-4);
        assert!((m[0][2] + 5.0).abs() < 1e-3);
        assert!((m[1][2] + 7.0).abs() < 1e-3);
        assert_eq!(crop.get_pixel(10, 10), frame.get_pixel(15, 17));
    }

    #[test]
    fn test_warp_face_requires_five_points() {
        let frame = pattern(8, 8);
        let result = warp_face_by_landmark_5(&frame, &[(1.0, 1.0); 3], WarpTemplate::Arcface128V2, (8, 8));
        assert!(result.is_err());
    }
}
