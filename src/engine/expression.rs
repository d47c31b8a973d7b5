//! Expression transfer engine
//!
//! Three LivePortrait models run in order: the feature extractor encodes the
//! target crop's appearance, the motion extractor decomposes source and
//! target crops into pose and expression, and the generator renders the
//! target appearance driven by keypoints that keep the target's head pose
//! but carry a blend of source and target expression.

use std::sync::Arc;

use anyhow::{Context, Result};
use ndarray::{Array1, Array2, Array3, Array4, ArrayD, Axis, Ix4};
use tracing::debug;

use crate::error::RestorerError;

use super::pool::{InferenceSessionPool, SessionPoolCache};
use super::registry::ModelKind;

/// Pose and expression decomposition of one crop
#[derive(Debug, Clone, PartialEq)]
pub struct MotionCode {
    /// 3x3 rotation matrix
    pub rotation: Array2<f32>,
    pub scale: f32,
    /// Translation added to every keypoint
    pub translation: Array1<f32>,
    /// Per-keypoint expression offsets, `K x 3`
    pub expression: Array2<f32>,
    /// Canonical keypoints before pose and expression, `K x 3`
    pub raw_keypoints: Array2<f32>,
    /// Posed keypoints, `K x 3`
    pub keypoints: Array2<f32>,
}

fn to_points(name: &'static str, array: ArrayD<f32>) -> Result<Array2<f32>> {
    let len = array.len();
    if len == 0 || len % 3 != 0 {
        return Err(RestorerError::tensor_shape(name, format!("{} values are not 3D points", len)).into());
    }
    let data: Vec<f32> = array.iter().copied().collect();
    Ok(Array2::from_shape_vec((len / 3, 3), data)?)
}

impl MotionCode {
    /// Parse the motion extractor outputs: rotation, scale, translation,
    /// expression, raw keypoints, keypoints.
    pub fn from_outputs(outputs: Vec<ArrayD<f32>>) -> Result<Self> {
        let [rotation, scale, translation, expression, raw_keypoints, keypoints]: [ArrayD<f32>; 6] = outputs
            .try_into()
            .map_err(|outputs: Vec<ArrayD<f32>>| {
                RestorerError::tensor_shape("motion_extractor", format!("expected 6 outputs, got {}", outputs.len()))
            })?;

        if rotation.len() != 9 {
            return Err(RestorerError::tensor_shape("rotation", format!("shape {:?}", rotation.shape())).into());
        }
        if scale.len() != 1 {
            return Err(RestorerError::tensor_shape("scale", format!("shape {:?}", scale.shape())).into());
        }
        if translation.len() != 3 {
            return Err(RestorerError::tensor_shape("translation", format!("shape {:?}", translation.shape())).into());
        }

        let code = Self {
            rotation: Array2::from_shape_vec((3, 3), rotation.iter().copied().collect())?,
            scale: scale.iter().copied().next().unwrap_or(1.0),
            translation: Array1::from_iter(translation.iter().copied()),
            expression: to_points("expression", expression)?,
            raw_keypoints: to_points("raw_keypoints", raw_keypoints)?,
            keypoints: to_points("keypoints", keypoints)?,
        };

        let count = code.keypoints.nrows();
        if code.expression.nrows() != count || code.raw_keypoints.nrows() != count {
            return Err(RestorerError::tensor_shape(
                "motion_extractor",
                format!(
                    "keypoint counts differ: expression {}, raw {}, posed {}",
                    code.expression.nrows(),
                    code.raw_keypoints.nrows(),
                    count
                ),
            )
            .into());
        }

        Ok(code)
    }

    /// Keypoints with this code's pose applied to `expression`:
    /// `scale * (raw_keypoints . rotation + expression) + translation`
    pub fn drive(&self, expression: &Array2<f32>) -> Array2<f32> {
        let mut points = self.raw_keypoints.dot(&self.rotation) + expression;
        points *= self.scale;
        points += &self.translation;
        points
    }
}

/// `source * factor + target * (1 - factor)`
pub fn blend_expression(source: &Array2<f32>, target: &Array2<f32>, factor: f32) -> Array2<f32> {
    source * factor + target * (1.0 - factor)
}

fn batch_points(points: &Array2<f32>) -> Array3<f32> {
    points.clone().insert_axis(Axis(0))
}

fn extract_motion(pool: &InferenceSessionPool, crop: &Array4<f32>) -> Result<MotionCode> {
    let outputs = pool.run(ModelKind::MotionExtractor, &[("input", crop.view().into_dyn())])?;
    MotionCode::from_outputs(outputs)
}

/// Runs the feature extractor, motion extractor and generator
pub struct ExpressionEngine {
    sessions: Arc<SessionPoolCache>,
}

impl ExpressionEngine {
    pub fn new(sessions: Arc<SessionPoolCache>) -> Self {
        Self { sessions }
    }

    /// Render the target crop with its expression moved towards the source's.
    ///
    /// Both crops are `[1, 3, 256, 256]` model tensors; `factor` 0 keeps the
    /// target expression, 1 substitutes the source expression, 2 extrapolates.
    /// Returns the `[3, H, W]` generator output.
    pub fn synthesize(&self, source: &Array4<f32>, target: &Array4<f32>, factor: f32) -> Result<Array3<f32>> {
        let pool = self.sessions.get()?;

        let feature_volume = pool
            .run(ModelKind::FeatureExtractor, &[("input", target.view().into_dyn())])?
            .into_iter()
            .next()
            .context("Feature extractor returned no output")?;

        let source_motion = extract_motion(&pool, source)?;
        let target_motion = extract_motion(&pool, target)?;

        let expression = blend_expression(&source_motion.expression, &target_motion.expression, factor);
        let motion_points = target_motion.drive(&expression);
        debug!("Driving {} keypoints with factor {:.2}", motion_points.nrows(), factor);

        let kp_source = batch_points(&target_motion.keypoints);
        let kp_driving = batch_points(&motion_points);

        let generated = pool
            .run(
                ModelKind::Generator,
                &[
                    ("feature_3d", feature_volume.view()),
                    ("kp_source", kp_source.view().into_dyn()),
                    ("kp_driving", kp_driving.view().into_dyn()),
                ],
            )?
            .into_iter()
            .next()
            .context("Generator returned no output")?;

        let generated = generated.into_dimensionality::<Ix4>().map_err(|_| {
            RestorerError::tensor_shape("generator", "expected a [1, 3, H, W] output".to_string())
        })?;
        Ok(generated.index_axis_move(Axis(0), 0))
    }
}
