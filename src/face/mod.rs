//! Face descriptors and the face-analysis collaborators
//!
//! Detection, landmarking and masking models live outside this crate; the
//! traits here are the seams the restorer consumes them through.

pub mod selector;
pub mod traits;
pub mod types;

pub use selector::SelectionMode;
pub use traits::{FaceAnalyser, FaceMasker, ReferenceFaceStore};
pub use types::{BoundingBox, Face, LandmarkKind, Point};
