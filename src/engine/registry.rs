//! Model registry
//!
//! Static description of the models each expression restorer choice needs,
//! and the download collaborator that guarantees they are present locally.

use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::config::ExpressionRestorerModel;
use crate::vision::WarpTemplate;

const LIVE_PORTRAIT_RELEASE: &str =
    "https://github.com/harisreedhar/LivePortrait-Experiments/releases/download/v3";

/// Models of the expression transfer pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelKind {
    FeatureExtractor,
    MotionExtractor,
    Generator,
}

impl ModelKind {
    pub const ALL: [ModelKind; 3] = [
        ModelKind::FeatureExtractor,
        ModelKind::MotionExtractor,
        ModelKind::Generator,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::FeatureExtractor => "feature_extractor",
            ModelKind::MotionExtractor => "motion_extractor",
            ModelKind::Generator => "generator",
        }
    }
}

/// Where a model comes from and where it lives on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSource {
    pub kind: ModelKind,
    pub url: String,
    pub path: PathBuf,
}

/// Registry entry for one expression restorer model choice
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSpec {
    pub model: ExpressionRestorerModel,
    pub sources: Vec<ModelSource>,
    pub template: WarpTemplate,
    /// Crop size (width, height) faces are warped to
    pub size: (u32, u32),
}

impl ModelSpec {
    /// Resolve the registry entry with local paths under `models_dir`
    pub fn resolve(model: ExpressionRestorerModel, models_dir: &Path) -> Self {
        match model {
            ExpressionRestorerModel::LivePortrait => Self {
                model,
                sources: ModelKind::ALL
                    .iter()
                    .map(|kind| ModelSource {
                        kind: *kind,
                        url: format!("{}/{}.onnx", LIVE_PORTRAIT_RELEASE, kind.as_str()),
                        path: models_dir.join(format!("{}.onnx", kind.as_str())),
                    })
                    .collect(),
                template: WarpTemplate::Arcface128V2,
                size: (512, 512),
            },
        }
    }

    pub fn source(&self, kind: ModelKind) -> Option<&ModelSource> {
        self.sources.iter().find(|source| source.kind == kind)
    }

    pub fn urls(&self) -> Vec<&str> {
        self.sources.iter().map(|source| source.url.as_str()).collect()
    }
}

/// Download collaborator; retries and resumption are its concern
pub trait ModelDownloader: Send + Sync {
    /// Download every URL into `directory` unless already present.
    fn conditional_download(&self, directory: &Path, urls: &[&str]) -> Result<()>;

    /// Whether the file at `path` is the complete download of `url`.
    fn is_download_done(&self, url: &str, path: &Path) -> bool;
}
