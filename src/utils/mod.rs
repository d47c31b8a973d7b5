//! Media I/O and numeric helpers

pub mod image;
pub mod math;
pub mod video;

pub use self::image::StaticImageCache;
pub use self::video::{FfmpegFrameReader, VideoFrameSource};
