//! Pipeline orchestration: audio -> images -> video
//!
//! A [`Pipeline`] owns one run's state. Stages run strictly in sequence; the
//! first stage-fatal error is recorded in the state and ends the run.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::progress::{PipelineEvent, Tracker};
use crate::scene::{scene_durations, AudioArtifact, ImageArtifact, Scene, SceneDuration};
use crate::services::Services;
use crate::stage::{self, RunDirs, StageContext};
pub use crate::state::{PipelineState, Step};

/// Summary of a completed run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineOutput {
    pub run_id: String,
    pub video_path: PathBuf,
    pub duration_ms: u64,
    pub size_bytes: u64,
    /// Allocated time per composed scene
    pub scene_durations: Vec<SceneDuration>,
    pub caption_path: PathBuf,
    pub audio: Vec<AudioArtifact>,
    pub images: Vec<ImageArtifact>,
    pub elapsed_secs: f64,
}

/// Narration-to-video pipeline
#[derive(Debug)]
pub struct Pipeline {
    services: Services,
    config: PipelineConfig,
    tracker: Tracker,
    cancel: CancellationToken,
    run_id: Option<String>,
}

impl Pipeline {
    #[must_use]
    pub fn new(services: Services, config: PipelineConfig) -> Self {
        Self {
            services,
            config,
            tracker: Tracker::default(),
            cancel: CancellationToken::new(),
            run_id: None,
        }
    }

    /// Send progress and log events to `events`
    #[must_use]
    pub fn with_events(mut self, events: mpsc::Sender<PipelineEvent>) -> Self {
        self.tracker = Tracker::new(Some(events));
        self
    }

    /// Reuse an existing run directory instead of creating a new one
    #[must_use]
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Token that aborts the run when cancelled
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Snapshot of the current state
    #[must_use]
    pub fn state(&self) -> PipelineState {
        self.tracker.snapshot()
    }

    /// Run every stage for `scenes`.
    ///
    /// On failure the error is also recorded in [`Pipeline::state`].
    pub async fn run(&self, scenes: &[Scene]) -> Result<PipelineOutput> {
        let started = Instant::now();
        self.tracker.begin_run();

        let result = self.run_stages(scenes, started).await;
        match &result {
            Ok(output) => {
                self.tracker.complete();
                info!(
                    "Run {} finished in {:.1}s",
                    output.run_id, output.elapsed_secs
                );
            }
            Err(e) => self.tracker.fail(e),
        }
        result
    }

    async fn run_stages(&self, scenes: &[Scene], started: Instant) -> Result<PipelineOutput> {
        if scenes.iter().all(|s| s.text.trim().is_empty()) {
            return Err(PipelineError::EmptyScript);
        }
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let run_id = self.run_id.clone().unwrap_or_else(RunDirs::new_run_id);
        let dirs = RunDirs::new(&self.config.work_dir, &run_id);
        dirs.create().await?;
        debug!("Run directory: {:?}", dirs.root);
        self.tracker.info(format!(
            "run {run_id}: {} scenes in {}",
            scenes.len(),
            dirs.root.display()
        ));

        let ctx = StageContext {
            tracker: &self.tracker,
            cancel: &self.cancel,
            dirs: &dirs,
            config: &self.config,
        };

        let audio = stage::synthesize(ctx, self.services.synthesizer.as_ref(), scenes).await?;
        let images = stage::generate_images(ctx, self.services.images.as_ref(), scenes).await?;
        let composition = stage::compose(
            ctx,
            self.services.probe.as_ref(),
            self.services.compositor.as_ref(),
            scenes,
            &audio.artifacts,
            &images,
        )
        .await?;

        Ok(PipelineOutput {
            run_id,
            video_path: composition.video_path,
            duration_ms: composition.duration_ms,
            size_bytes: composition.size_bytes,
            scene_durations: scene_durations(&composition.scene_durations_ms),
            caption_path: composition.caption_path,
            audio: audio.artifacts,
            images,
            elapsed_secs: started.elapsed().as_secs_f64(),
        })
    }
}
