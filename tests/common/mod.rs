//! In-process fakes for the pipeline collaborators.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use storyreel::scene::Scene;
use storyreel::services::{
    AudioFile, CompositorRequest, CompositorResult, DurationProbe, ImageGenResult, ImageGenerator,
    ImageRequest, PercentProgress, SceneProgress, Services, SpeechSynthesizer, SynthesisRequest,
    SynthesisResult, VideoCompositor,
};
use storyreel::{PipelineConfig, ServiceError};

pub fn scenes(texts: &[&str]) -> Vec<Scene> {
    texts
        .iter()
        .enumerate()
        .map(|(i, t)| Scene::new(i, *t))
        .collect()
}

pub fn config(work_dir: &Path) -> PipelineConfig {
    PipelineConfig::default().with_work_dir(work_dir)
}

// ─── Speech ──────────────────────────────────────────────────────────────────

/// Writes one small file per scene, except for indices in `missing`
#[derive(Default)]
pub struct FakeSynthesizer {
    pub missing: Vec<usize>,
    pub error: Option<fn() -> ServiceError>,
}

#[async_trait]
impl SpeechSynthesizer for FakeSynthesizer {
    async fn synthesize(
        &self,
        request: &SynthesisRequest,
        progress: SceneProgress,
    ) -> Result<SynthesisResult, ServiceError> {
        if let Some(error) = self.error {
            return Err(error());
        }

        let mut audio_files = Vec::new();
        for scene in &request.scenes {
            let file_name = format!("narration_{:03}.mp3", scene.index);
            let path = request.output_dir.join(&file_name);
            if !self.missing.contains(&scene.index) {
                tokio::fs::write(&path, scene.text.as_bytes()).await?;
            }
            audio_files.push(AudioFile { file_name, path });
            progress(scene.index + 1);
        }
        Ok(SynthesisResult { audio_files })
    }
}

// ─── Images ──────────────────────────────────────────────────────────────────

/// Fails the first `fail_first` calls (or every call), then succeeds
#[derive(Default)]
pub struct FakeImages {
    pub fail_first: u32,
    pub always_fail: bool,
    pub calls: AtomicU32,
    pub prompts: Mutex<Vec<String>>,
}

impl FakeImages {
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageGenerator for FakeImages {
    fn provider(&self) -> &str {
        "fake"
    }

    async fn generate(&self, request: &ImageRequest) -> Result<ImageGenResult, ServiceError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(request.prompt.clone());
        if self.always_fail || n < self.fail_first {
            return Err(ServiceError::Http {
                status: 500,
                message: format!("render failed on call {}", n + 1),
            });
        }
        Ok(ImageGenResult {
            images: vec![format!("https://images.invalid/render-{n}.png")],
            provider: "fake".to_string(),
        })
    }

    async fn download(&self, _location: &str, dest: &Path) -> Result<u64, ServiceError> {
        tokio::fs::write(dest, b"\x89PNG").await?;
        Ok(4)
    }
}

// ─── Probe ───────────────────────────────────────────────────────────────────

/// Durations keyed by file name; unknown files fail to probe
#[derive(Default)]
pub struct FakeProbe {
    pub durations: HashMap<String, Duration>,
    pub default: Option<Duration>,
}

impl FakeProbe {
    pub fn uniform(ms: u64) -> Self {
        Self {
            durations: HashMap::new(),
            default: Some(Duration::from_millis(ms)),
        }
    }
}

#[async_trait]
impl DurationProbe for FakeProbe {
    async fn probe(&self, path: &Path) -> Result<Duration, ServiceError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        self.durations
            .get(&name)
            .copied()
            .or(self.default)
            .ok_or_else(|| ServiceError::process("ffprobe", format!("cannot read {name}")))
    }
}

// ─── Compositor ──────────────────────────────────────────────────────────────

/// Records the request and writes a placeholder video
#[derive(Default)]
pub struct FakeCompositor {
    pub fail: bool,
    pub skip_output: bool,
    /// Cancelled on entry, then the call never returns
    pub cancel_and_hang: Option<CancellationToken>,
    pub requests: Mutex<Vec<CompositorRequest>>,
}

impl FakeCompositor {
    pub fn last_request(&self) -> Option<CompositorRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl VideoCompositor for FakeCompositor {
    async fn compose(
        &self,
        request: &CompositorRequest,
        progress: PercentProgress,
    ) -> Result<CompositorResult, ServiceError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(token) = &self.cancel_and_hang {
            token.cancel();
            std::future::pending::<()>().await;
        }
        if self.fail {
            return Err(ServiceError::process("ffmpeg", "encoder exploded"));
        }

        progress(40);
        progress(90);
        if !self.skip_output {
            tokio::fs::write(&request.output_path, b"video").await?;
        }
        Ok(CompositorResult {
            video_path: request.output_path.clone(),
            duration_ms: request.total_ms(),
            size_bytes: 5,
            message: Some("fake render".to_string()),
        })
    }
}

// ─── Bundle ──────────────────────────────────────────────────────────────────

pub struct Fakes {
    pub synthesizer: Arc<FakeSynthesizer>,
    pub images: Arc<FakeImages>,
    pub probe: Arc<FakeProbe>,
    pub compositor: Arc<FakeCompositor>,
}

impl Default for Fakes {
    fn default() -> Self {
        Self {
            synthesizer: Arc::new(FakeSynthesizer::default()),
            images: Arc::new(FakeImages::default()),
            probe: Arc::new(FakeProbe::uniform(3000)),
            compositor: Arc::new(FakeCompositor::default()),
        }
    }
}

impl Fakes {
    pub fn services(&self) -> Services {
        Services {
            synthesizer: self.synthesizer.clone(),
            images: self.images.clone(),
            probe: self.probe.clone(),
            compositor: self.compositor.clone(),
        }
    }
}
