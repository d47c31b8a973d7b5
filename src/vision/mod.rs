//! Crop geometry and blend masks
//!
//! `warp` maps between full frames and template-aligned crops, `mask` builds
//! the blend masks used when a processed crop is pasted back.

pub mod mask;
pub mod warp;

pub use mask::{combine_masks, static_box_mask, Mask};
pub use warp::{paste_back, warp_face_by_landmark_5, AffineMatrix, WarpTemplate};
