//! Narration synthesis
//!
//! One batched synthesis call for the whole script. Every returned descriptor
//! is checked on disk; missing files are reported and kept as gaps.

use std::path::PathBuf;

use super::StageContext;
use crate::error::{PipelineError, Result};
use crate::progress::percent;
use crate::scene::{file_exists, AudioArtifact, Scene};
use crate::services::{SpeechSynthesizer, SynthesisRequest};
use crate::state::Step;
use crate::subtitle::build_cues;
use crate::timing;

/// Result of the narration stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioOutput {
    /// One artifact per scene, in scene order
    pub artifacts: Vec<AudioArtifact>,
    /// First-pass captions from estimated timing, if they could be written
    pub caption_path: Option<PathBuf>,
}

impl AudioOutput {
    #[must_use]
    pub fn usable(&self) -> usize {
        self.artifacts.iter().filter(|a| a.exists).count()
    }
}

pub async fn synthesize(
    ctx: StageContext<'_>,
    synthesizer: &dyn SpeechSynthesizer,
    scenes: &[Scene],
) -> Result<AudioOutput> {
    let tracker = ctx.tracker;
    tracker.enter(Step::Audio);

    let voice = &ctx.config.voice;
    let request = SynthesisRequest {
        scenes: scenes.to_vec(),
        voice_id: voice.voice_id.clone(),
        speed: voice.speed,
        output_dir: ctx.dirs.audio.clone(),
    };

    let total = scenes.len();
    let reporter = tracker.clone();
    let progress = Box::new(move |done: usize| {
        reporter.progress(Step::Audio, percent(done, total));
    });

    let result = ctx
        .cancellable(synthesizer.synthesize(&request, progress))
        .await?
        .map_err(|e| PipelineError::service(Step::Audio, e))?;

    if result.audio_files.len() > total {
        tracker.warn(format!(
            "synthesis returned {} files for {} scenes; extras ignored",
            result.audio_files.len(),
            total
        ));
    }

    let mut artifacts = Vec::with_capacity(total);
    for scene in scenes {
        let i = scene.index;
        let file_path = result
            .audio_files
            .get(artifacts.len())
            .map_or_else(|| ctx.dirs.audio_path(i), |f| f.path.clone());
        let exists = file_exists(&file_path).await;
        if !exists {
            tracker.warn(format!(
                "narration for scene {} missing: {}",
                i + 1,
                file_path.display()
            ));
        }
        artifacts.push(AudioArtifact {
            scene_index: i,
            file_path,
            exists,
        });
    }

    let output = AudioOutput {
        artifacts,
        caption_path: None,
    };
    let usable = output.usable();
    if usable == 0 {
        return Err(PipelineError::NoAudioProduced);
    }

    tracker.progress(Step::Audio, 100);
    tracker.success(format!("{usable}/{total} narration files ready"));

    let caption_path = write_estimated_captions(ctx, scenes).await;
    Ok(AudioOutput {
        caption_path,
        ..output
    })
}

/// Estimated narration length from the speaking rate, in milliseconds
#[must_use]
pub fn estimate_total_ms(scenes: &[Scene], chars_per_second: f64, speed: f32) -> u64 {
    let rate = chars_per_second * f64::from(speed);
    if rate <= 0.0 {
        return 0;
    }
    let chars: usize = scenes.iter().map(Scene::weight).sum();
    ((chars as f64 / rate) * 1000.0).round() as u64
}

/// First-pass captions, later overwritten from measured audio
async fn write_estimated_captions(ctx: StageContext<'_>, scenes: &[Scene]) -> Option<PathBuf> {
    let timing_config = &ctx.config.timing;
    let total_ms = estimate_total_ms(scenes, timing_config.chars_per_second, ctx.config.voice.speed);
    let durations = timing::allocate_for_scenes(scenes, total_ms, timing_config.caption_min_ms);
    let cues = build_cues(scenes, &durations);

    let format = ctx.config.caption_format;
    let path = ctx.dirs.captions_path(format);
    match format.generator().write_to_file(&cues, &path).await {
        Ok(()) => {
            ctx.tracker
                .info(format!("estimated captions written ({total_ms}ms)"));
            Some(path)
        }
        Err(e) => {
            ctx.tracker
                .warn(format!("could not write estimated captions: {e}"));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_scales_with_speed() {
        let scenes = [Scene::new(0, "abcdefghijklmn"), Scene::new(1, "abcdefghijklmn")];
        assert_eq!(estimate_total_ms(&scenes, 14.0, 1.0), 2000);
        assert_eq!(estimate_total_ms(&scenes, 14.0, 2.0), 1000);
        assert_eq!(estimate_total_ms(&scenes, 0.0, 1.0), 0);
    }
}
