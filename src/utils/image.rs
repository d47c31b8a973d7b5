//! Image file utilities

use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use image::{DynamicImage, ImageFormat};
use parking_lot::Mutex;

use crate::VisionFrame;

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "mov", "avi", "webm", "m4v", "wmv", "mpeg", "mpg"];

/// Read an image file into an RGB frame, honouring EXIF orientation
pub fn read_image(path: &Path) -> Result<VisionFrame> {
    let data = std::fs::read(path).with_context(|| format!("Failed to read image {}", path.display()))?;
    let image = decode_image(&data).with_context(|| format!("Failed to decode image {}", path.display()))?;
    Ok(image.to_rgb8())
}

/// Write a frame; the format follows the file extension
pub fn write_image(path: &Path, frame: &VisionFrame) -> Result<()> {
    frame
        .save(path)
        .with_context(|| format!("Failed to write image {}", path.display()))
}

/// Decode an encoded image, turning it upright per its EXIF orientation
pub fn decode_image(data: &[u8]) -> Result<DynamicImage> {
    let image = image::load_from_memory(data)?;
    Ok(orient(image, exif_orientation(data)))
}

/// EXIF orientation tag, 1 (upright) when absent or unreadable
fn exif_orientation(data: &[u8]) -> u32 {
    exif::Reader::new()
        .read_from_container(&mut Cursor::new(data))
        .ok()
        .and_then(|meta| {
            meta.get_field(exif::Tag::Orientation, exif::In::PRIMARY)
                .and_then(|field| field.value.get_uint(0))
        })
        .unwrap_or(1)
}

/// Undo the camera transform named by an EXIF orientation value
fn orient(image: DynamicImage, orientation: u32) -> DynamicImage {
    let mirrored = matches!(orientation, 2 | 4 | 5 | 7);
    let image = match orientation {
        3 | 4 => image.rotate180(),
        5 | 6 => image.rotate90(),
        7 | 8 => image.rotate270(),
        _ => image,
    };
    if mirrored {
        image.fliph()
    } else {
        image
    }
}

/// Whether the path names an existing file with an image extension
pub fn is_image(path: &Path) -> bool {
    path.is_file() && ImageFormat::from_path(path).is_ok()
}

/// Whether the path names an existing file with a video extension
pub fn is_video(path: &Path) -> bool {
    path.is_file() && extension(path).is_some_and(|ext| VIDEO_EXTENSIONS.contains(&ext.as_str()))
}

/// Whether the path's parent directory exists
pub fn in_directory(path: &Path) -> bool {
    match path.parent() {
        Some(parent) if parent.as_os_str().is_empty() => !path.is_dir(),
        Some(parent) => parent.is_dir() && !path.is_dir(),
        None => false,
    }
}

/// Whether all paths share one (case-insensitive) extension
pub fn same_file_extension(paths: &[&Path]) -> bool {
    let mut extensions = paths.iter().map(|path| extension(path));
    match extensions.next() {
        Some(first) => extensions.all(|ext| ext == first),
        None => true,
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

/// Path-keyed cache of decoded still images
///
/// Image-mode runs read the same files for the source and the target, the
/// cache keeps one decode per path until `clear` is called.
#[derive(Default)]
pub struct StaticImageCache {
    frames: Mutex<HashMap<PathBuf, Arc<VisionFrame>>>,
}

impl StaticImageCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self, path: &Path) -> Result<Arc<VisionFrame>> {
        if let Some(frame) = self.frames.lock().get(path) {
            return Ok(frame.clone());
        }

        let frame = Arc::new(read_image(path)?);
        self.frames.lock().insert(path.to_path_buf(), frame.clone());
        Ok(frame)
    }

    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }

    pub fn clear(&self) {
        self.frames.lock().clear();
    }
}
