//! External collaborators used by the pipeline stages
//!
//! Each collaborator is an async trait so stages can be driven by the bundled
//! HTTP/ffmpeg implementations or by in-process fakes.
//!
//! - [`SpeechSynthesizer`]: narration for a batch of scenes
//! - [`ImageGenerator`]: one illustration per prompt
//! - [`DurationProbe`]: playback length of an audio file
//! - [`VideoCompositor`]: stills + narration + captions into one video

pub mod ffmpeg;
pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::CompositorOptions;
use crate::error::ServiceError;
use crate::scene::Scene;

pub use ffmpeg::{check_dependencies, FfmpegCompositor, FfprobeDurationProbe};
pub use http::{HttpImageGenerator, HttpSpeechSynthesizer};

/// Called with the number of scenes processed so far
pub type SceneProgress = Box<dyn Fn(usize) + Send + Sync>;

/// Called with a completion percentage (0..=100)
pub type PercentProgress = Box<dyn Fn(u8) + Send + Sync>;

/// Batch narration request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisRequest {
    pub scenes: Vec<Scene>,
    pub voice_id: String,
    pub speed: f32,
    /// Where produced files should be stored
    pub output_dir: PathBuf,
}

/// One produced narration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFile {
    pub file_name: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesisResult {
    /// Descriptors in scene order
    pub audio_files: Vec<AudioFile>,
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize narration for every scene in `request`.
    ///
    /// `progress` may be called any number of times with a non-decreasing count.
    async fn synthesize(
        &self,
        request: &SynthesisRequest,
        progress: SceneProgress,
    ) -> Result<SynthesisResult, ServiceError>;
}

/// Single illustration request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRequest {
    pub prompt: String,
    pub style: String,
    pub width: u32,
    pub height: u32,
    pub aspect_ratio: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageGenResult {
    /// Image locations; the first one is used
    pub images: Vec<String>,
    pub provider: String,
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Provider name recorded on artifacts
    fn provider(&self) -> &str;

    async fn generate(&self, request: &ImageRequest) -> Result<ImageGenResult, ServiceError>;

    /// Persist the image at `location` to `dest`, returning bytes written
    async fn download(&self, location: &str, dest: &Path) -> Result<u64, ServiceError>;
}

#[async_trait]
pub trait DurationProbe: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<Duration, ServiceError>;
}

/// Everything the compositor needs for one video
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositorRequest {
    /// Narration files, concatenated in order
    pub audio_files: Vec<PathBuf>,
    /// One still per scene, same order as `scene_durations_ms`
    pub image_files: Vec<PathBuf>,
    pub output_path: PathBuf,
    pub subtitle_path: Option<PathBuf>,
    pub scene_durations_ms: Vec<u64>,
    pub width: u32,
    pub height: u32,
    pub options: CompositorOptions,
}

impl CompositorRequest {
    #[must_use]
    pub fn total_ms(&self) -> u64 {
        self.scene_durations_ms.iter().sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositorResult {
    pub video_path: PathBuf,
    pub duration_ms: u64,
    pub size_bytes: u64,
    pub message: Option<String>,
}

#[async_trait]
pub trait VideoCompositor: Send + Sync {
    async fn compose(
        &self,
        request: &CompositorRequest,
        progress: PercentProgress,
    ) -> Result<CompositorResult, ServiceError>;
}

/// The four collaborators a pipeline run needs
#[derive(Clone)]
pub struct Services {
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub images: Arc<dyn ImageGenerator>,
    pub probe: Arc<dyn DurationProbe>,
    pub compositor: Arc<dyn VideoCompositor>,
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("images", &self.images.provider())
            .finish_non_exhaustive()
    }
}

/// File extension implied by an image location, if it looks like an image
#[must_use]
pub fn image_extension(location: &str) -> Option<&'static str> {
    let path = url::Url::parse(location)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| location.to_string());
    let ext = Path::new(&path).extension()?.to_str()?.to_ascii_lowercase();
    IMAGE_EXTENSIONS.iter().copied().find(|known| *known == ext)
}

/// Extensions recognised for scene stills
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp"];
