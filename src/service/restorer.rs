//! Expression Restorer - per-frame processing
//!
//! Detects and selects target faces, then folds warp, synthesis, masking and
//! paste-back over each selected face. Also carries the processor lifecycle
//! hooks: model checks before a run, input validation, and cache teardown
//! after a batch according to the memory strategy.

use std::borrow::Cow;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use image::imageops::FilterType;
use tracing::{debug, error, info};

use crate::config::{Config, FaceMaskType, InferenceConfig, MAX_EXPRESSION_FACTOR};
use crate::engine::preprocess::{normalize_crop_frame, prepare_crop_frame};
use crate::engine::{ExpressionEngine, ModelDownloader, ModelSpec, SessionPoolCache};
use crate::error::RestorerError;
use crate::face::{Face, FaceAnalyser, FaceMasker, SelectionMode};
use crate::utils::image::{in_directory, is_image, is_video, same_file_extension};
use crate::utils::math::map_float;
use crate::utils::StaticImageCache;
use crate::vision::{combine_masks, paste_back, static_box_mask, warp_face_by_landmark_5};
use crate::VisionFrame;

use super::lifecycle::ProcessManager;
use super::types::{Collaborators, ProcessMode};

/// Frame processor restoring expressions on the selected target faces
pub struct ExpressionRestorer {
    config: Config,
    selection: SelectionMode,
    sessions: Arc<SessionPoolCache>,
    engine: ExpressionEngine,
    analyser: Arc<dyn FaceAnalyser>,
    masker: Arc<dyn FaceMasker>,
    downloader: Arc<dyn ModelDownloader>,
    process: Arc<ProcessManager>,
    images: StaticImageCache,
}

impl ExpressionRestorer {
    /// Create a restorer for the configured model
    pub fn new(config: Config, collaborators: Collaborators, process: Arc<ProcessManager>) -> Result<Self> {
        config.validate()?;

        let spec = ModelSpec::resolve(config.expression_restorer.model, &config.models.directory);
        let sessions = Arc::new(SessionPoolCache::new(
            spec,
            config.inference.clone(),
            collaborators.sessions,
            process.clone(),
        ));
        let engine = ExpressionEngine::new(sessions.clone());

        info!(
            "Expression restorer ready: model={}, device={}, factor={}%",
            config.expression_restorer.model.as_str(),
            config.inference.device(),
            config.expression_restorer.factor
        );

        Ok(Self {
            selection: SelectionMode::from(&config.face_selector),
            config,
            sessions,
            engine,
            analyser: collaborators.analyser,
            masker: collaborators.masker,
            downloader: collaborators.downloader,
            process,
            images: StaticImageCache::new(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn selection(&self) -> SelectionMode {
        self.selection
    }

    pub fn sessions(&self) -> &Arc<SessionPoolCache> {
        &self.sessions
    }

    pub fn process(&self) -> &Arc<ProcessManager> {
        &self.process
    }

    /// Blend factor in `[0, 2]` for the configured percentage
    pub fn factor(&self) -> f32 {
        map_float(
            self.config.expression_restorer.factor as f32,
            0.0,
            MAX_EXPRESSION_FACTOR as f32,
            0.0,
            2.0,
        )
    }

    /// Switch execution devices; the session pool is rebuilt on next use.
    pub fn set_inference(&mut self, inference: InferenceConfig) {
        self.sessions.reconfigure(inference.clone());
        self.config.inference = inference;
    }

    /// Read an image through the static cache
    pub fn read_static_image(&self, path: &Path) -> Result<Arc<VisionFrame>> {
        self.images.read(path)
    }

    /// Make sure every model file is present, downloading unless disabled.
    pub fn pre_check(&self) -> Result<()> {
        let spec = self.sessions.spec();

        if !self.config.models.skip_download {
            let _checking = self.process.check();
            self.downloader
                .conditional_download(&self.config.models.directory, &spec.urls())?;
        }

        for source in &spec.sources {
            if !source.path.is_file() {
                error!("Model file is not present: {}", source.path.display());
                return Err(RestorerError::ModelFileMissing(source.path.clone()).into());
            }
        }
        Ok(())
    }

    /// Verify downloads completed and every model file is present.
    pub fn post_check(&self) -> Result<()> {
        let spec = self.sessions.spec();

        if !self.config.models.skip_download {
            for source in &spec.sources {
                if !self.downloader.is_download_done(&source.url, &source.path) {
                    error!("Model download is not done: {}", source.url);
                    return Err(RestorerError::ModelDownloadIncomplete(source.url.clone()).into());
                }
            }
        }

        for source in &spec.sources {
            if !source.path.is_file() {
                error!("Model file is not present: {}", source.path.display());
                return Err(RestorerError::ModelFileMissing(source.path.clone()).into());
            }
        }
        Ok(())
    }

    /// Validate target and output paths before a run.
    pub fn pre_process(&self, mode: ProcessMode, target_path: &Path, output_path: Option<&Path>) -> Result<()> {
        let renders = matches!(mode, ProcessMode::Output | ProcessMode::Preview);
        if renders && !is_image(target_path) && !is_video(target_path) {
            error!("Choose an image or a video for the target: {}", target_path.display());
            return Err(RestorerError::InvalidTarget(target_path.to_path_buf()).into());
        }

        if mode == ProcessMode::Output {
            let output_path = match output_path {
                Some(path) if in_directory(path) => path,
                other => {
                    let path = other.map(Path::to_path_buf).unwrap_or_default();
                    error!("Specify an output path inside an existing directory: {}", path.display());
                    return Err(RestorerError::InvalidOutput(path).into());
                }
            };

            if !same_file_extension(&[target_path, output_path]) {
                error!(
                    "Target and output extensions differ: {} vs {}",
                    target_path.display(),
                    output_path.display()
                );
                return Err(RestorerError::ExtensionMismatch {
                    target: target_path.to_path_buf(),
                    output: output_path.to_path_buf(),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Release cached resources after a batch.
    pub fn post_process(&self) {
        self.images.clear();

        let strategy = self.config.memory.video_memory_strategy;
        if strategy.releases_sessions() {
            self.sessions.clear();
        }
        if strategy.releases_analysers() {
            self.analyser.clear_caches();
            self.masker.clear_caches();
        }
        debug!("Post-process done with {:?} memory strategy", strategy);
    }

    /// Restore expressions on every selected face of `target_frame`.
    ///
    /// Faces are processed in selection order, each pass compositing onto
    /// the previous pass's output. Without a selected face the target is
    /// returned unchanged.
    pub fn process_frame(
        &self,
        source_frame: &VisionFrame,
        target_frame: &VisionFrame,
        reference_faces: Option<&[Face]>,
    ) -> Result<VisionFrame> {
        let start = Instant::now();
        let faces = self.analyser.filter_and_sort(self.analyser.detect_faces(target_frame)?);
        let detected = faces.len();
        let selected = self.selection.select(self.analyser.as_ref(), faces, reference_faces);

        debug!("Selected {} of {} faces", selected.len(), detected);
        if selected.is_empty() {
            return Ok(target_frame.clone());
        }

        let source_frame = fit_to(source_frame, target_frame.dimensions());
        let mut output = target_frame.clone();
        for face in &selected {
            output = self.restore_expression(&source_frame, face, &output)?;
        }

        debug!("Restored {} faces in {:?}", selected.len(), start.elapsed());
        Ok(output)
    }

    /// Restore the expression of one face of `temp_frame`.
    ///
    /// Both frames are aligned with the target face's landmarks, so the
    /// source crop shows the same region of the source frame.
    pub fn restore_expression(
        &self,
        source_frame: &VisionFrame,
        target_face: &Face,
        temp_frame: &VisionFrame,
    ) -> Result<VisionFrame> {
        let spec = self.sessions.spec();
        let landmark_5 = target_face.landmark_5().ok_or(RestorerError::MissingLandmarks)?;

        let (source_crop, _) = warp_face_by_landmark_5(source_frame, landmark_5, spec.template, spec.size)?;
        let (target_crop, affine_matrix) =
            warp_face_by_landmark_5(temp_frame, landmark_5, spec.template, spec.size)?;

        let mask_config = &self.config.face_mask;
        let mut crop_masks = vec![static_box_mask(spec.size, mask_config.blur, mask_config.padding)];
        if mask_config.has(FaceMaskType::Occlusion) {
            crop_masks.push(self.masker.occlusion_mask(&target_crop)?);
        }

        let generated = self.engine.synthesize(
            &prepare_crop_frame(&source_crop),
            &prepare_crop_frame(&target_crop),
            self.factor(),
        )?;
        let generated = normalize_crop_frame(generated.view(), spec.size)?;

        crop_masks.push(self.masker.face_region_mask(&generated)?);
        let crop_mask = combine_masks(&crop_masks)?;

        paste_back(temp_frame, &generated, &crop_mask, &affine_matrix)
    }
}

/// Resize `frame` to `size` unless it already matches
fn fit_to(frame: &VisionFrame, size: (u32, u32)) -> Cow<'_, VisionFrame> {
    if frame.dimensions() == size {
        Cow::Borrowed(frame)
    } else {
        Cow::Owned(image::imageops::resize(frame, size.0, size.1, FilterType::Triangle))
    }
}
