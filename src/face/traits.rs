//! Face-analysis collaborator traits
//!
//! Implementations wrap detector, landmarker, occluder and parser models
//! owned by the surrounding pipeline. They must be thread-safe: frames of a
//! video may be processed concurrently.

use anyhow::Result;

use crate::utils::math::cosine_distance;
use crate::vision::mask::Mask;
use crate::VisionFrame;

use super::types::Face;

/// Face detection and selection
pub trait FaceAnalyser: Send + Sync {
    /// Detect every face in a frame, in detector order.
    fn detect_faces(&self, frame: &VisionFrame) -> Result<Vec<Face>>;

    /// Apply the pipeline's face filters and ordering.
    fn filter_and_sort(&self, faces: Vec<Face>) -> Vec<Face> {
        faces
    }

    /// Pick the single representative face.
    fn select_one(&self, faces: &[Face]) -> Option<Face> {
        faces.first().cloned()
    }

    /// Faces whose distance to any reference face is below `threshold`.
    fn select_by_reference_distance(
        &self,
        faces: &[Face],
        reference_faces: &[Face],
        threshold: f32,
    ) -> Vec<Face> {
        faces
            .iter()
            .filter(|face| {
                reference_faces
                    .iter()
                    .any(|reference| face_distance(face, reference).is_some_and(|d| d < threshold))
            })
            .cloned()
            .collect()
    }

    /// Drop cached models and analysis results.
    fn clear_caches(&self) {}
}

/// Occlusion and face-region masks for a crop
pub trait FaceMasker: Send + Sync {
    /// Mask of pixels not covered by obstructions (hands, hair, glasses...).
    fn occlusion_mask(&self, crop: &VisionFrame) -> Result<Mask>;

    /// Mask of the face region of a synthesized crop.
    fn face_region_mask(&self, crop: &VisionFrame) -> Result<Mask>;

    /// Drop cached occluder/parser sessions.
    fn clear_caches(&self) {}
}

/// Source of the reference faces used by the `reference` selection mode
pub trait ReferenceFaceStore: Send + Sync {
    fn reference_faces(&self) -> Vec<Face>;
}

impl ReferenceFaceStore for Vec<Face> {
    fn reference_faces(&self) -> Vec<Face> {
        self.clone()
    }
}

/// Embedding distance between two faces, `None` when either lacks an embedding.
pub fn face_distance(a: &Face, b: &Face) -> Option<f32> {
    match (&a.embedding, &b.embedding) {
        (Some(x), Some(y)) => Some(cosine_distance(x, y)),
        _ => None,
    }
}
