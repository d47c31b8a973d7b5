//! Batch Driver
//!
//! Applies the frame processor to a single image or to the extracted frames
//! of a video. For videos the source frame of each target frame is read from
//! the original media at the same frame number.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::face::{Face, ReferenceFaceStore};
use crate::utils::image::{read_image, write_image};
use crate::utils::VideoFrameSource;

use super::restorer::ExpressionRestorer;
use super::types::{QueuePayload, VideoRunResult};

/// Build queue payloads for extracted frames; frame numbers follow name order.
pub fn queue_payloads(frame_paths: &[PathBuf]) -> Vec<QueuePayload> {
    let mut frame_paths = frame_paths.to_vec();
    frame_paths.sort();

    frame_paths
        .into_iter()
        .enumerate()
        .map(|(index, frame_path)| QueuePayload {
            frame_number: index as u32,
            frame_path,
        })
        .collect()
}

/// Drives the restorer over images and video frame queues
pub struct BatchDriver {
    restorer: Arc<ExpressionRestorer>,
    /// The original target media; source frames are read from it
    target_path: PathBuf,
    video: Arc<dyn VideoFrameSource>,
    references: Arc<dyn ReferenceFaceStore>,
}

impl BatchDriver {
    pub fn new(
        restorer: Arc<ExpressionRestorer>,
        target_path: impl Into<PathBuf>,
        video: Arc<dyn VideoFrameSource>,
        references: Arc<dyn ReferenceFaceStore>,
    ) -> Self {
        Self {
            restorer,
            target_path: target_path.into(),
            video,
            references,
        }
    }

    pub fn restorer(&self) -> &Arc<ExpressionRestorer> {
        &self.restorer
    }

    fn reference_faces(&self) -> Option<Vec<Face>> {
        self.restorer
            .selection()
            .needs_reference_faces()
            .then(|| self.references.reference_faces())
    }

    /// Process one image; the source frame is the original target media.
    pub fn process_image(&self, _source_paths: &[PathBuf], target_path: &Path, output_path: &Path) -> Result<()> {
        let start = Instant::now();
        let reference_faces = self.reference_faces();

        let source_frame = self.restorer.read_static_image(&self.target_path)?;
        let target_frame = self.restorer.read_static_image(target_path)?;
        let output_frame = self
            .restorer
            .process_frame(&source_frame, &target_frame, reference_faces.as_deref())?;

        write_image(output_path, &output_frame)?;
        info!("Processed image {} in {:?}", output_path.display(), start.elapsed());
        Ok(())
    }

    /// Process queued video frames in place, reporting one unit per frame.
    ///
    /// Frames already handed out complete even if processing is stopped.
    pub fn process_video_frames<F>(
        &self,
        _source_paths: &[PathBuf],
        queue_payloads: &[QueuePayload],
        update_progress: F,
    ) -> Result<()>
    where
        F: Fn(usize),
    {
        let reference_faces = self.reference_faces();

        for payload in self.restorer.process().manage(queue_payloads) {
            let source_frame = self
                .video
                .read_frame(&self.target_path, payload.frame_number)
                .with_context(|| format!("Failed to read source frame {}", payload.frame_number))?;
            let target_frame = read_image(&payload.frame_path)?;

            let output_frame = self
                .restorer
                .process_frame(&source_frame, &target_frame, reference_faces.as_deref())?;
            write_image(&payload.frame_path, &output_frame)?;

            debug!("Frame {} done", payload.frame_number);
            update_progress(1);
        }
        Ok(())
    }

    /// Process every extracted frame on a pool of `thread_count` workers,
    /// `queue_count` frames per task. The first error aborts the run.
    pub fn process_video(&self, source_paths: &[PathBuf], frame_paths: &[PathBuf]) -> Result<VideoRunResult> {
        let start = Instant::now();
        let inference = &self.restorer.config().inference;
        let payloads = queue_payloads(frame_paths);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(inference.thread_count.max(1))
            .build()
            .context("Failed to build frame worker pool")?;

        info!(
            "Processing {} frames with {} threads, {} per task",
            payloads.len(),
            inference.thread_count.max(1),
            inference.queue_count.max(1)
        );

        let processed = AtomicUsize::new(0);
        let process = self.restorer.process();
        process.start();

        let result = pool.install(|| {
            payloads
                .par_chunks(inference.queue_count.max(1))
                .try_for_each(|chunk| {
                    self.process_video_frames(source_paths, chunk, |count| {
                        processed.fetch_add(count, Ordering::Relaxed);
                    })
                })
        });
        process.end();
        result?;

        let summary = VideoRunResult {
            frames_total: payloads.len(),
            frames_processed: processed.load(Ordering::Relaxed),
            elapsed_ms: start.elapsed().as_millis() as u64,
        };
        info!(
            "Processed {}/{} frames in {}ms",
            summary.frames_processed, summary.frames_total, summary.elapsed_ms
        );
        Ok(summary)
    }
}
