//! Inference engine module
//!
//! Provides OpenVINO-based inference with:
//! - Lazily built, explicitly cleared session pool
//! - Per-model bounded call concurrency
//! - LivePortrait-style expression transfer

pub mod expression;
pub mod pool;
pub mod preprocess;
pub mod registry;

pub use expression::{ExpressionEngine, MotionCode};
pub use pool::{InferenceSession, InferenceSessionPool, SessionFactory, SessionPoolCache};
pub use registry::{ModelDownloader, ModelKind, ModelSource, ModelSpec};
