//! Expression restorer configuration

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::RestorerError;

/// Upper bound of the user-facing expression factor (percent)
pub const MAX_EXPRESSION_FACTOR: u32 = 200;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub inference: InferenceConfig,
    pub models: ModelsConfig,
    pub expression_restorer: ExpressionRestorerConfig,
    pub face_selector: FaceSelectorConfig,
    pub face_mask: FaceMaskConfig,
    pub memory: MemoryConfig,
}

/// Hardware backend a model may be compiled for, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionProvider {
    Cpu,
    Gpu,
    Npu,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub device_id: u32,
    pub providers: Vec<ExecutionProvider>,
    /// Concurrent calls allowed against one loaded model
    pub max_concurrent_calls: usize,
    pub thread_count: usize,
    pub queue_count: usize,
}

impl InferenceConfig {
    /// Resolve the OpenVINO device string for the configured providers.
    ///
    /// A single provider maps to its device, several providers become an
    /// `AUTO:` priority list in the configured order.
    pub fn device(&self) -> String {
        let devices: Vec<String> = self
            .providers
            .iter()
            .map(|provider| match provider {
                ExecutionProvider::Cpu => "CPU".to_string(),
                ExecutionProvider::Gpu => format!("GPU.{}", self.device_id),
                ExecutionProvider::Npu => "NPU".to_string(),
            })
            .collect();

        match devices.len() {
            0 => "CPU".to_string(),
            1 => devices[0].clone(),
            _ => format!("AUTO:{}", devices.join(",")),
        }
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            device_id: 0,
            providers: vec![ExecutionProvider::Cpu],
            max_concurrent_calls: 1,
            thread_count: 4,
            queue_count: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub directory: PathBuf,
    pub skip_download: bool,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(".assets/models"),
            skip_download: false,
        }
    }
}

/// Registered expression restorer models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpressionRestorerModel {
    #[default]
    LivePortrait,
}

impl ExpressionRestorerModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpressionRestorerModel::LivePortrait => "live_portrait",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExpressionRestorerConfig {
    pub model: ExpressionRestorerModel,
    /// Percentage in `0..=200`; 100 fully substitutes the source expression
    pub factor: u32,
}

impl Default for ExpressionRestorerConfig {
    fn default() -> Self {
        Self {
            model: ExpressionRestorerModel::LivePortrait,
            factor: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FaceSelectorMode {
    Many,
    One,
    Reference,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FaceSelectorConfig {
    pub mode: FaceSelectorMode,
    pub reference_face_distance: f32,
}

impl Default for FaceSelectorConfig {
    fn default() -> Self {
        Self {
            mode: FaceSelectorMode::Reference,
            reference_face_distance: 0.6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FaceMaskType {
    Box,
    Occlusion,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FaceMaskConfig {
    pub types: Vec<FaceMaskType>,
    pub blur: f32,
    /// Top, right, bottom, left padding in percent of the crop size
    pub padding: [u32; 4],
}

impl FaceMaskConfig {
    pub fn has(&self, mask_type: FaceMaskType) -> bool {
        self.types.contains(&mask_type)
    }
}

impl Default for FaceMaskConfig {
    fn default() -> Self {
        Self {
            types: vec![FaceMaskType::Box],
            blur: 0.3,
            padding: [0, 0, 0, 0],
        }
    }
}

/// How aggressively cached resources are released after a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryStrategy {
    None,
    Moderate,
    #[default]
    Strict,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub video_memory_strategy: MemoryStrategy,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn default_path() -> &'static str {
        "config.toml"
    }

    /// Reject values the pipeline cannot honour.
    pub fn validate(&self) -> Result<(), RestorerError> {
        if self.expression_restorer.factor > MAX_EXPRESSION_FACTOR {
            return Err(RestorerError::InvalidConfig(format!(
                "expression_restorer.factor must be within 0..={}, got {}",
                MAX_EXPRESSION_FACTOR, self.expression_restorer.factor
            )));
        }
        if !(0.0..=1.0).contains(&self.face_mask.blur) {
            return Err(RestorerError::InvalidConfig(format!(
                "face_mask.blur must be within 0..=1, got {}",
                self.face_mask.blur
            )));
        }
        if self.face_mask.padding.iter().any(|p| *p > 100) {
            return Err(RestorerError::InvalidConfig(
                "face_mask.padding values must be within 0..=100".to_string(),
            ));
        }
        if self.inference.max_concurrent_calls == 0 {
            return Err(RestorerError::InvalidConfig(
                "inference.max_concurrent_calls must be at least 1".to_string(),
            ));
        }
        if self.inference.providers.is_empty() {
            return Err(RestorerError::InvalidConfig(
                "inference.providers must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
