//! Fake collaborators for unit tests

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use ndarray::{ArrayD, ArrayViewD, IxDyn};
use parking_lot::Mutex;

use crate::config::InferenceConfig;
use crate::engine::pool::{InferenceSession, SessionFactory};
use crate::engine::registry::{ModelDownloader, ModelKind, ModelSource};
use crate::face::traits::{FaceAnalyser, FaceMasker};
use crate::face::types::{BoundingBox, Face, LandmarkKind};
use crate::utils::video::VideoFrameSource;
use crate::vision::mask::Mask;
use crate::vision::warp::WarpTemplate;
use crate::VisionFrame;

type RunFn = dyn Fn(&[(&str, ArrayViewD<'_, f32>)]) -> Result<Vec<ArrayD<f32>>> + Send + Sync;

/// Session backed by a closure
pub struct FnSession {
    run: Box<RunFn>,
}

impl FnSession {
    pub fn new<F>(run: F) -> Self
    where
        F: Fn(&[(&str, ArrayViewD<'_, f32>)]) -> Result<Vec<ArrayD<f32>>> + Send + Sync + 'static,
    {
        Self { run: Box::new(run) }
    }
}

impl InferenceSession for FnSession {
    fn run(&self, inputs: &[(&str, ArrayViewD<'_, f32>)]) -> Result<Vec<ArrayD<f32>>> {
        (self.run)(inputs)
    }
}

pub const KEYPOINTS: usize = 21;

/// Self-consistent motion extractor outputs: identity pose, uniform
/// expression, keypoints equal to `raw + expression`.
pub fn motion_outputs(expression: f32, offset: f32) -> Vec<ArrayD<f32>> {
    let raw: Vec<f32> = (0..KEYPOINTS * 3).map(|i| i as f32 * 0.01 + offset).collect();
    let posed: Vec<f32> = raw.iter().map(|v| v + expression).collect();
    let rotation = vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];

    vec![
        ArrayD::from_shape_vec(IxDyn(&[1, 3, 3]), rotation).unwrap(),
        ArrayD::from_elem(IxDyn(&[1, 1]), 1.0),
        ArrayD::zeros(IxDyn(&[1, 3])),
        ArrayD::from_elem(IxDyn(&[1, KEYPOINTS, 3]), expression),
        ArrayD::from_shape_vec(IxDyn(&[1, KEYPOINTS, 3]), raw).unwrap(),
        ArrayD::from_shape_vec(IxDyn(&[1, KEYPOINTS, 3]), posed).unwrap(),
    ]
}

/// Calls seen by the fake LivePortrait sessions
#[derive(Default)]
pub struct Recorder {
    pub calls: Vec<ModelKind>,
    /// Crops fed to the motion extractor, in call order
    pub motion_inputs: Vec<ArrayD<f32>>,
    /// `(kp_source, kp_driving)` of the last generator call
    pub generator_keypoints: Option<(ArrayD<f32>, ArrayD<f32>)>,
}

fn input<'a, 'b>(inputs: &'a [(&str, ArrayViewD<'b, f32>)], name: &str) -> Result<&'a ArrayViewD<'b, f32>> {
    inputs
        .iter()
        .find(|(input_name, _)| *input_name == name)
        .map(|(_, array)| array)
        .ok_or_else(|| anyhow!("missing input {}", name))
}

/// Factory of fake LivePortrait sessions.
///
/// The motion extractor derives the expression from the input mean, so a
/// brighter crop reads as a stronger expression. The generator returns a
/// uniform crop of `generator_value`.
pub struct CountingFactory {
    built: AtomicUsize,
    delay: Option<Duration>,
    last_config: Mutex<Option<InferenceConfig>>,
    recorder: Option<Arc<Mutex<Recorder>>>,
    generator_value: f32,
}

impl Default for CountingFactory {
    fn default() -> Self {
        Self {
            built: AtomicUsize::new(0),
            delay: None,
            last_config: Mutex::new(None),
            recorder: None,
            generator_value: 0.5,
        }
    }
}

impl CountingFactory {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn recording(recorder: Arc<Mutex<Recorder>>) -> Self {
        Self {
            recorder: Some(recorder),
            ..Self::default()
        }
    }

    /// Pools built so far; each pool creates exactly one feature extractor.
    pub fn pools_built(&self) -> usize {
        self.built.load(Ordering::SeqCst)
    }

    pub fn last_config(&self) -> InferenceConfig {
        self.last_config.lock().clone().unwrap_or_default()
    }
}

impl SessionFactory for CountingFactory {
    fn create_session(
        &self,
        source: &ModelSource,
        inference: &InferenceConfig,
    ) -> Result<Arc<dyn InferenceSession>> {
        if source.kind == ModelKind::FeatureExtractor {
            if let Some(delay) = self.delay {
                std::thread::sleep(delay);
            }
            self.built.fetch_add(1, Ordering::SeqCst);
        }
        *self.last_config.lock() = Some(inference.clone());

        let kind = source.kind;
        let recorder = self.recorder.clone();
        let generator_value = self.generator_value;

        Ok(Arc::new(FnSession::new(move |inputs| {
            if let Some(recorder) = &recorder {
                recorder.lock().calls.push(kind);
            }

            match kind {
                ModelKind::FeatureExtractor => {
                    input(inputs, "input")?;
                    Ok(vec![ArrayD::zeros(IxDyn(&[1, 32, 16, 8, 8]))])
                }
                ModelKind::MotionExtractor => {
                    let crop = input(inputs, "input")?;
                    if let Some(recorder) = &recorder {
                        recorder.lock().motion_inputs.push(crop.to_owned());
                    }
                    let mean = crop.mean().unwrap_or(0.5);
                    Ok(motion_outputs(mean - 0.5, 0.0))
                }
                ModelKind::Generator => {
                    input(inputs, "feature_3d")?;
                    let kp_source = input(inputs, "kp_source")?.to_owned();
                    let kp_driving = input(inputs, "kp_driving")?.to_owned();
                    if let Some(recorder) = &recorder {
                        recorder.lock().generator_keypoints = Some((kp_source, kp_driving));
                    }
                    Ok(vec![ArrayD::from_elem(IxDyn(&[1, 3, 256, 256]), generator_value)])
                }
            }
        })))
    }
}

/// Face whose 5-point landmarks place the template at `center` with the
/// template's unit square spanning `size` pixels.
pub fn face_at(center: (f32, f32), size: f32) -> Face {
    let (cx, cy) = center;
    let landmarks = WarpTemplate::Arcface128V2
        .points()
        .iter()
        .map(|(x, y)| (cx + (x - 0.5) * size, cy + (y - 0.5) * size))
        .collect();
    let half = size / 2.0;

    Face::new(
        BoundingBox { x1: cx - half, y1: cy - half, x2: cx + half, y2: cy + half },
        0.9,
    )
    .with_landmarks(LandmarkKind::FiveFrom68, landmarks)
}

type DetectFn = dyn Fn(&VisionFrame) -> Vec<Face> + Send + Sync;

/// Analyser returning faces computed from the frame
pub struct FakeAnalyser {
    detect: Box<DetectFn>,
    pub cleared: AtomicUsize,
}

impl FakeAnalyser {
    pub fn new<F>(detect: F) -> Self
    where
        F: Fn(&VisionFrame) -> Vec<Face> + Send + Sync + 'static,
    {
        Self {
            detect: Box::new(detect),
            cleared: AtomicUsize::new(0),
        }
    }

    pub fn fixed(faces: Vec<Face>) -> Self {
        Self::new(move |_| faces.clone())
    }
}

impl FaceAnalyser for FakeAnalyser {
    fn detect_faces(&self, frame: &VisionFrame) -> Result<Vec<Face>> {
        Ok((self.detect)(frame))
    }

    fn clear_caches(&self) {
        self.cleared.fetch_add(1, Ordering::SeqCst);
    }
}

/// Masker returning all-ones masks
#[derive(Default)]
pub struct FakeMasker {
    pub occlusion_calls: AtomicUsize,
    pub region_calls: AtomicUsize,
    pub cleared: AtomicUsize,
}

fn full_mask(crop: &VisionFrame) -> Mask {
    Mask::ones((crop.height() as usize, crop.width() as usize))
}

impl FaceMasker for FakeMasker {
    fn occlusion_mask(&self, crop: &VisionFrame) -> Result<Mask> {
        self.occlusion_calls.fetch_add(1, Ordering::SeqCst);
        Ok(full_mask(crop))
    }

    fn face_region_mask(&self, crop: &VisionFrame) -> Result<Mask> {
        self.region_calls.fetch_add(1, Ordering::SeqCst);
        Ok(full_mask(crop))
    }

    fn clear_caches(&self) {
        self.cleared.fetch_add(1, Ordering::SeqCst);
    }
}

/// Video made of in-memory frames
#[derive(Default)]
pub struct FakeVideo {
    frames: HashMap<u32, VisionFrame>,
    pub requested: Mutex<Vec<u32>>,
}

impl FakeVideo {
    pub fn new(frames: Vec<VisionFrame>) -> Self {
        Self {
            frames: frames.into_iter().enumerate().map(|(i, f)| (i as u32, f)).collect(),
            requested: Mutex::new(Vec::new()),
        }
    }
}

impl VideoFrameSource for FakeVideo {
    fn read_frame(&self, _video_path: &Path, frame_number: u32) -> Result<VisionFrame> {
        self.requested.lock().push(frame_number);
        self.frames
            .get(&frame_number)
            .cloned()
            .ok_or_else(|| anyhow!("no frame {}", frame_number))
    }
}

/// Downloader that records requests and reports a fixed completion state
pub struct FakeDownloader {
    pub done: bool,
    pub requested: Mutex<Vec<String>>,
}

impl FakeDownloader {
    pub fn new(done: bool) -> Self {
        Self {
            done,
            requested: Mutex::new(Vec::new()),
        }
    }
}

impl ModelDownloader for FakeDownloader {
    fn conditional_download(&self, _directory: &Path, urls: &[&str]) -> Result<()> {
        self.requested.lock().extend(urls.iter().map(|url| url.to_string()));
        Ok(())
    }

    fn is_download_done(&self, _url: &str, _path: &Path) -> bool {
        self.done
    }
}
