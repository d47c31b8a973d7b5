//! Indexed video frame reading

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{bail, Context, Result};
use tracing::debug;

use crate::VisionFrame;

use super::image::decode_image;

/// Reads a single frame of a video by its frame number
pub trait VideoFrameSource: Send + Sync {
    fn read_frame(&self, video_path: &Path, frame_number: u32) -> Result<VisionFrame>;
}

/// Frame reader backed by the FFmpeg CLI
pub struct FfmpegFrameReader {
    ffmpeg: PathBuf,
}

impl FfmpegFrameReader {
    /// Locate `ffmpeg` in PATH
    pub fn new() -> Result<Self> {
        let ffmpeg = which::which("ffmpeg").context("FFmpeg not found in PATH")?;
        Ok(Self { ffmpeg })
    }

    pub fn with_binary(ffmpeg: impl Into<PathBuf>) -> Self {
        Self { ffmpeg: ffmpeg.into() }
    }

    fn frame_args(video_path: &Path, frame_number: u32) -> Vec<String> {
        vec![
            "-v".to_string(),
            "error".to_string(),
            "-i".to_string(),
            video_path.to_string_lossy().into_owned(),
            "-vf".to_string(),
            format!("select=eq(n\\,{})", frame_number),
            "-vsync".to_string(),
            "0".to_string(),
            "-frames:v".to_string(),
            "1".to_string(),
            "-f".to_string(),
            "image2pipe".to_string(),
            "-vcodec".to_string(),
            "png".to_string(),
            "-".to_string(),
        ]
    }
}

impl VideoFrameSource for FfmpegFrameReader {
    fn read_frame(&self, video_path: &Path, frame_number: u32) -> Result<VisionFrame> {
        debug!("Reading frame {} of {}", frame_number, video_path.display());

        let output = Command::new(&self.ffmpeg)
            .args(Self::frame_args(video_path, frame_number))
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("Failed to run {}", self.ffmpeg.display()))?;

        if !output.status.success() {
            bail!(
                "FFmpeg failed reading frame {} of {}: {}",
                frame_number,
                video_path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        if output.stdout.is_empty() {
            bail!("Frame {} not present in {}", frame_number, video_path.display());
        }

        Ok(decode_image(&output.stdout)?.to_rgb8())
    }
}
