//! Error taxonomy for the expression restorer
//!
//! Runtime paths propagate `anyhow::Error`; these variants name the failure
//! classes callers may want to match on.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by validation, model availability checks and inference.
#[derive(Debug, Error)]
pub enum RestorerError {
    #[error("Choose an image or a video for the target: {0}")]
    InvalidTarget(PathBuf),

    #[error("Specify an output path inside an existing directory: {0}")]
    InvalidOutput(PathBuf),

    #[error("Target and output extensions differ: {target} vs {output}")]
    ExtensionMismatch { target: PathBuf, output: PathBuf },

    #[error("Model download is not done: {0}")]
    ModelDownloadIncomplete(String),

    #[error("Model file is not present: {0}")]
    ModelFileMissing(PathBuf),

    #[error("Inference session not available: {0}")]
    MissingSession(&'static str),

    #[error("Unexpected tensor shape for {name}: {detail}")]
    TensorShape { name: &'static str, detail: String },

    #[error("Face has no 5-point landmark set")]
    MissingLandmarks,

    #[error("Frame size mismatch: expected {expected:?}, got {actual:?}")]
    FrameSize {
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl RestorerError {
    /// Create a tensor shape error.
    pub fn tensor_shape(name: &'static str, detail: impl Into<String>) -> Self {
        Self::TensorShape {
            name,
            detail: detail.into(),
        }
    }

    /// Whether this error was raised before any processing started.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidTarget(_)
                | Self::InvalidOutput(_)
                | Self::ExtensionMismatch { .. }
                | Self::InvalidConfig(_)
        )
    }

    /// Whether this error comes from missing or incomplete model files.
    pub fn is_resource(&self) -> bool {
        matches!(
            self,
            Self::ModelDownloadIncomplete(_) | Self::ModelFileMissing(_)
        )
    }
}
