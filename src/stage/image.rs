//! Per-scene image generation
//!
//! Scenes are illustrated one at a time in order. A scene that still fails
//! after its retries keeps its slot with no local path and the stage moves on.

use super::StageContext;
use crate::config::StyleConfig;
use crate::error::{Result, ServiceError};
use crate::progress::percent;
use crate::retry::{self, Backoff, ErrorClass, RetryContext};
use crate::scene::{file_exists, ImageArtifact, Scene};
use crate::services::{image_extension, ImageGenerator, ImageRequest, IMAGE_EXTENSIONS};
use crate::state::Step;

/// Prompt for one scene: the visual description, or an excerpt of the
/// narration, followed by the style phrase.
#[must_use]
pub fn build_prompt(scene: &Scene, style: &StyleConfig) -> String {
    let subject = match scene.visual_description.as_deref().map(str::trim) {
        Some(description) if !description.is_empty() => description.to_string(),
        _ => excerpt(&scene.text, style.prompt_excerpt_chars),
    };

    if style.style.trim().is_empty() {
        subject
    } else {
        format!("{subject}, {}", style.style.trim())
    }
}

/// First `max_chars` characters of `text` with whitespace collapsed
fn excerpt(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }
    let cut: String = collapsed.chars().take(max_chars).collect();
    format!("{}...", cut.trim_end())
}

pub async fn generate_images(
    ctx: StageContext<'_>,
    generator: &dyn ImageGenerator,
    scenes: &[Scene],
) -> Result<Vec<ImageArtifact>> {
    let tracker = ctx.tracker;
    let style = &ctx.config.style;
    tracker.enter(Step::Images);

    let total = scenes.len();
    let mut artifacts = Vec::with_capacity(total);

    for (position, scene) in scenes.iter().enumerate() {
        let i = scene.index;

        let reused = if style.skip_existing {
            existing_image(ctx, i).await
        } else {
            None
        };

        let artifact = if let Some(path) = reused {
            tracker.info(format!("scene {} image reused: {}", i + 1, path.display()));
            ImageArtifact {
                scene_index: i,
                local_path: Some(path),
                source_url: None,
                provider: generator.provider().to_string(),
                error: None,
            }
        } else {
            ctx.cancellable(generate_one(ctx, generator, scene)).await?
        };

        artifacts.push(artifact);
        tracker.progress(Step::Images, percent(position + 1, total));
    }

    let ok = artifacts.iter().filter(|a| a.is_success()).count();
    if ok == total {
        tracker.success(format!("{ok}/{total} images ready"));
    } else {
        tracker.warn(format!("{ok}/{total} images ready"));
    }

    Ok(artifacts)
}

async fn existing_image(ctx: StageContext<'_>, scene_index: usize) -> Option<std::path::PathBuf> {
    for ext in IMAGE_EXTENSIONS {
        let path = ctx.dirs.image_path(scene_index, ext);
        if file_exists(&path).await {
            return Some(path);
        }
    }
    None
}

async fn generate_one(
    ctx: StageContext<'_>,
    generator: &dyn ImageGenerator,
    scene: &Scene,
) -> ImageArtifact {
    let style = &ctx.config.style;
    let i = scene.index;
    let request = ImageRequest {
        prompt: build_prompt(scene, style),
        style: style.style.clone(),
        width: style.width,
        height: style.height,
        aspect_ratio: style.aspect_ratio.clone(),
    };

    let retry_ctx = RetryContext::new(
        format!("image for scene {}", i + 1),
        style.max_retries,
        style.retry_step_ms,
    )
    .with_backoff(Backoff::Linear);

    // Every failure gets the fixed retry budget, whatever its class
    let outcome = retry::execute_with(
        &retry_ctx,
        |_: &ServiceError| ErrorClass::Retryable,
        |_| attempt(ctx, generator, &request, i),
    )
    .await;

    match outcome {
        Ok((path, url, provider)) => {
            ctx.tracker
                .info(format!("scene {} image saved: {}", i + 1, path.display()));
            ImageArtifact {
                scene_index: i,
                local_path: Some(path),
                source_url: Some(url),
                provider,
                error: None,
            }
        }
        Err(e) => {
            ctx.tracker.warn(format!(
                "scene {} image failed after {} attempts: {e}",
                i + 1,
                style.max_retries + 1
            ));
            ImageArtifact::failed(i, generator.provider(), e.to_string())
        }
    }
}

/// Generate, then persist the first returned image
async fn attempt(
    ctx: StageContext<'_>,
    generator: &dyn ImageGenerator,
    request: &ImageRequest,
    scene_index: usize,
) -> std::result::Result<(std::path::PathBuf, String, String), ServiceError> {
    let generated = generator.generate(request).await?;
    let url = generated
        .images
        .into_iter()
        .next()
        .ok_or_else(|| ServiceError::Rejected("no images returned".to_string()))?;

    let extension = image_extension(&url).unwrap_or("png");
    let dest = ctx.dirs.image_path(scene_index, extension);
    generator.download(&url, &dest).await?;

    if !file_exists(&dest).await {
        return Err(ServiceError::Rejected(format!(
            "image not found at {} after download",
            dest.display()
        )));
    }
    Ok((dest, url, generated.provider))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visual_description_is_preferred() {
        let scene = Scene::new(0, "Narration text.").with_visual("a red kite over dunes");
        let style = StyleConfig::default();
        assert_eq!(
            build_prompt(&scene, &style),
            "a red kite over dunes, cinematic illustration"
        );
    }

    #[test]
    fn blank_visual_falls_back_to_excerpt() {
        let scene = Scene::new(0, "The   tide\nturns.").with_visual("   ");
        let style = StyleConfig {
            style: String::new(),
            ..Default::default()
        };
        assert_eq!(build_prompt(&scene, &style), "The tide turns.");
    }

    #[test]
    fn long_text_is_truncated_on_char_boundary() {
        let text = "é".repeat(300);
        let style = StyleConfig {
            prompt_excerpt_chars: 10,
            style: "ink".to_string(),
            ..Default::default()
        };
        let prompt = build_prompt(&Scene::new(0, text), &style);
        assert_eq!(prompt, format!("{}..., ink", "é".repeat(10)));
    }
}
