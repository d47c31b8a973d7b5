//! Service layer types

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::engine::{ModelDownloader, SessionFactory};
use crate::face::{FaceAnalyser, FaceMasker};

/// What the surrounding pipeline is about to do with the processor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessMode {
    Output,
    Preview,
    Stream,
}

/// One extracted video frame awaiting processing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuePayload {
    /// Index of the frame on the original video's timeline
    pub frame_number: u32,
    pub frame_path: PathBuf,
}

/// Video run result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoRunResult {
    pub frames_total: usize,
    pub frames_processed: usize,
    pub elapsed_ms: u64,
}

/// External services the processor delegates to
#[derive(Clone)]
pub struct Collaborators {
    pub sessions: Arc<dyn SessionFactory>,
    pub analyser: Arc<dyn FaceAnalyser>,
    pub masker: Arc<dyn FaceMasker>,
    pub downloader: Arc<dyn ModelDownloader>,
}
