//! Face selection modes

use crate::config::{FaceSelectorConfig, FaceSelectorMode};

use super::traits::FaceAnalyser;
use super::types::Face;

/// Which detected faces a frame pass operates on
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SelectionMode {
    /// Every detected face, in detector order
    Many,
    /// One representative face, chosen by the analyser
    One,
    /// Faces closer than the threshold to any reference face
    Reference(f32),
}

impl From<&FaceSelectorConfig> for SelectionMode {
    fn from(config: &FaceSelectorConfig) -> Self {
        match config.mode {
            FaceSelectorMode::Many => SelectionMode::Many,
            FaceSelectorMode::One => SelectionMode::One,
            FaceSelectorMode::Reference => SelectionMode::Reference(config.reference_face_distance),
        }
    }
}

impl SelectionMode {
    pub fn needs_reference_faces(&self) -> bool {
        matches!(self, SelectionMode::Reference(_))
    }

    /// Apply the mode to already filtered and sorted faces.
    ///
    /// A missing reference set selects nothing.
    pub fn select(
        &self,
        analyser: &dyn FaceAnalyser,
        faces: Vec<Face>,
        reference_faces: Option<&[Face]>,
    ) -> Vec<Face> {
        match self {
            SelectionMode::Many => faces,
            SelectionMode::One => analyser.select_one(&faces).into_iter().collect(),
            SelectionMode::Reference(threshold) => match reference_faces {
                Some(references) if !references.is_empty() => {
                    analyser.select_by_reference_distance(&faces, references, *threshold)
                }
                _ => Vec::new(),
            },
        }
    }
}
