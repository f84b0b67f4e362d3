//! Pipeline stages: narration, images, composition
//!
//! Stages run one at a time. Each receives a [`StageContext`] with the run's
//! tracker, cancellation token, directories and configuration, and returns
//! artifact lists parallel to the scene list.

pub mod audio;
pub mod compose;
pub mod image;

use std::future::Future;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::progress::Tracker;
use crate::subtitle::SubtitleFormat;

pub use audio::{synthesize, AudioOutput};
pub use compose::{compose, Composition};
pub use image::{build_prompt, generate_images};

/// Per-run directory layout under the work directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunDirs {
    pub run_id: String,
    pub root: PathBuf,
    pub audio: PathBuf,
    pub images: PathBuf,
}

impl RunDirs {
    #[must_use]
    pub fn new(work_dir: &Path, run_id: &str) -> Self {
        let root = work_dir.join(run_id);
        Self {
            run_id: run_id.to_string(),
            audio: root.join("audio"),
            images: root.join("images"),
            root,
        }
    }

    /// Fresh run id: UTC timestamp plus a short random suffix
    #[must_use]
    pub fn new_run_id() -> String {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!(
            "{}-{}",
            chrono::Utc::now().format("%Y%m%d-%H%M%S"),
            &suffix[..8]
        )
    }

    pub async fn create(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.audio).await?;
        tokio::fs::create_dir_all(&self.images).await
    }

    #[must_use]
    pub fn captions_path(&self, format: SubtitleFormat) -> PathBuf {
        self.root.join(format!("captions.{}", format.extension()))
    }

    /// Deterministic still path for one scene
    #[must_use]
    pub fn image_path(&self, scene_index: usize, extension: &str) -> PathBuf {
        self.images
            .join(format!("scene_{scene_index:03}.{extension}"))
    }

    /// Where narration for a scene lands when the service names no file
    #[must_use]
    pub fn audio_path(&self, scene_index: usize) -> PathBuf {
        self.audio.join(format!("scene_{scene_index:03}.mp3"))
    }
}

/// Shared inputs for a stage
#[derive(Debug, Clone, Copy)]
pub struct StageContext<'a> {
    pub tracker: &'a Tracker,
    pub cancel: &'a CancellationToken,
    pub dirs: &'a RunDirs,
    pub config: &'a PipelineConfig,
}

impl StageContext<'_> {
    /// Race `fut` against the cancellation token.
    ///
    /// The in-flight future is dropped when the token fires.
    pub async fn cancellable<F: Future>(&self, fut: F) -> Result<F::Output> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(PipelineError::Cancelled),
            out = fut => Ok(out),
        }
    }
}
