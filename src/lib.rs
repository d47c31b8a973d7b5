//! Expression Restorer
//!
//! Restores facial expression on target faces by transferring motion codes
//! extracted from a source frame, then compositing the synthesized face back
//! into the original frame through a masked affine paste-back.

pub mod config;
pub mod error;
pub mod engine;
pub mod face;
pub mod service;
pub mod utils;
pub mod vision;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
pub use error::RestorerError;
pub use service::{BatchDriver, ExpressionRestorer};

/// A dense RGB pixel raster (height x width x 3)
pub type VisionFrame = image::RgbImage;
