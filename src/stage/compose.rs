//! Final composition
//!
//! Measures the narration that actually exists, re-times scenes and captions
//! against that total, and hands everything to the compositor.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::StageContext;
use crate::error::{PipelineError, Result};
use crate::scene::{file_exists, AudioArtifact, ImageArtifact, Scene};
use crate::services::{CompositorRequest, DurationProbe, VideoCompositor};
use crate::state::Step;
use crate::subtitle::build_cues;
use crate::timing;

/// Result of the composition stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Composition {
    pub video_path: PathBuf,
    pub duration_ms: u64,
    pub size_bytes: u64,
    /// Allocated time per composed scene
    pub scene_durations_ms: Vec<u64>,
    pub caption_path: PathBuf,
}

/// Measure the narration, re-time scenes and captions, and render the video.
///
/// Usable images are paired with the first `min(images, scenes)` scenes in
/// order, so a failed early image shifts every later still one scene forward.
pub async fn compose(
    ctx: StageContext<'_>,
    probe: &dyn DurationProbe,
    compositor: &dyn VideoCompositor,
    scenes: &[Scene],
    audio: &[AudioArtifact],
    images: &[ImageArtifact],
) -> Result<Composition> {
    let tracker = ctx.tracker;
    let timing_config = &ctx.config.timing;
    tracker.enter(Step::Video);

    let mut audio_files = Vec::with_capacity(audio.len());
    for artifact in audio {
        if artifact.verify().await {
            audio_files.push(artifact.file_path.clone());
        }
    }
    if audio_files.is_empty() {
        return Err(PipelineError::NoUsableAudio);
    }

    let mut image_files = Vec::with_capacity(images.len());
    for artifact in images {
        if let Some(path) = &artifact.local_path {
            if file_exists(path).await {
                image_files.push(path.clone());
            }
        }
    }
    if image_files.is_empty() {
        return Err(PipelineError::NoUsableImages);
    }

    let used = image_files.len().min(scenes.len());
    if used == 0 {
        return Err(PipelineError::NothingToCompose);
    }
    image_files.truncate(used);
    let used_scenes = &scenes[..used];

    let mut total_ms = 0u64;
    for path in &audio_files {
        let measured = ctx.cancellable(probe.probe(path)).await?;
        total_ms += match measured {
            Ok(duration) => duration.as_millis() as u64,
            Err(e) => {
                tracker.warn(format!(
                    "could not measure {}: {e}; assuming {}ms",
                    path.display(),
                    timing_config.probe_fallback_ms
                ));
                timing_config.probe_fallback_ms
            }
        };
    }
    if total_ms == 0 {
        tracker.warn(format!(
            "measured narration is empty; assuming {}ms",
            timing_config.empty_audio_fallback_ms
        ));
        total_ms = timing_config.empty_audio_fallback_ms;
    }
    tracker.info(format!(
        "{} narration files, {total_ms}ms total, {used} scenes",
        audio_files.len()
    ));

    let scene_durations_ms =
        timing::allocate_for_scenes(used_scenes, total_ms, timing_config.scene_min_ms);
    let caption_durations =
        timing::allocate_for_scenes(used_scenes, total_ms, timing_config.caption_min_ms);
    let cues = build_cues(used_scenes, &caption_durations);

    let format = ctx.config.caption_format;
    let caption_path = ctx.dirs.captions_path(format);
    format.generator().write_to_file(&cues, &caption_path).await?;
    tracker.info(format!("captions re-timed: {} cues", cues.len()));

    let request = CompositorRequest {
        audio_files,
        image_files,
        output_path: ctx.dirs.root.join(&ctx.config.output_name),
        subtitle_path: Some(caption_path.clone()),
        scene_durations_ms: scene_durations_ms.clone(),
        width: ctx.config.style.width,
        height: ctx.config.style.height,
        options: ctx.config.compositor.clone(),
    };

    let reporter = tracker.clone();
    let progress = Box::new(move |pct: u8| reporter.progress(Step::Video, pct));
    let result = ctx
        .cancellable(compositor.compose(&request, progress))
        .await?
        .map_err(|e| PipelineError::CompositionFailed(e.to_string()))?;

    if !file_exists(&result.video_path).await {
        tracker.warn(format!(
            "compositor reported success but {} does not exist",
            result.video_path.display()
        ));
    }
    if let Some(message) = &result.message {
        tracker.info(message.clone());
    }

    tracker.progress(Step::Video, 100);
    tracker.success(format!(
        "video ready: {} ({}ms, {} bytes)",
        result.video_path.display(),
        result.duration_ms,
        result.size_bytes
    ));

    Ok(Composition {
        video_path: result.video_path,
        duration_ms: result.duration_ms,
        size_bytes: result.size_bytes,
        scene_durations_ms,
        caption_path,
    })
}
