//! Configuration loaded from `~/.config/storyreel/config.toml`.
//!
//! Every field has a default, so an empty or partial file is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;
use crate::subtitle::SubtitleFormat;

/// Narration voice settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    pub voice_id: String,
    /// Playback speed multiplier (1.0 = normal)
    pub speed: f32,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            voice_id: "narrator".to_string(),
            speed: 1.0,
        }
    }
}

/// Image generation settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StyleConfig {
    /// Style phrase appended to every prompt
    pub style: String,
    pub width: u32,
    pub height: u32,
    pub aspect_ratio: String,
    /// Additional attempts after the first failed generation
    pub max_retries: u32,
    /// Wait before retry `n` is `retry_step_ms * n`
    pub retry_step_ms: u64,
    /// Prompt excerpt length when a scene has no visual description
    pub prompt_excerpt_chars: usize,
    /// Reuse a scene image already present in the run directory
    pub skip_existing: bool,
}

impl Default for StyleConfig {
    fn default() -> Self {
        Self {
            style: "cinematic illustration".to_string(),
            width: 1920,
            height: 1080,
            aspect_ratio: "16:9".to_string(),
            max_retries: 2,
            retry_step_ms: 2000,
            prompt_excerpt_chars: 200,
            skip_existing: false,
        }
    }
}

impl StyleConfig {
    /// Switch to portrait 9:16 output for short-form video
    #[must_use]
    pub fn portrait(mut self) -> Self {
        self.width = 1080;
        self.height = 1920;
        self.aspect_ratio = "9:16".to_string();
        self
    }
}

/// Timing floors and fallbacks, all in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub scene_min_ms: u64,
    pub caption_min_ms: u64,
    /// Substituted when one audio file cannot be measured
    pub probe_fallback_ms: u64,
    /// Used when every measurement came back as zero
    pub empty_audio_fallback_ms: u64,
    /// Speaking rate for first-pass caption estimates
    pub chars_per_second: f64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            scene_min_ms: 1200,
            caption_min_ms: 1200,
            probe_fallback_ms: 1000,
            empty_audio_fallback_ms: 10_000,
            chars_per_second: 14.0,
        }
    }
}

/// Encoder options forwarded to the compositor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositorOptions {
    pub fps: u32,
    pub video_codec: String,
    pub audio_codec: String,
}

impl Default for CompositorOptions {
    fn default() -> Self {
        Self {
            fps: 30,
            video_codec: "libx264".to_string(),
            audio_codec: "aac".to_string(),
        }
    }
}

/// Full pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Parent of the per-run directories
    pub work_dir: PathBuf,
    /// File name of the final video inside the run directory
    pub output_name: String,
    pub voice: VoiceConfig,
    pub style: StyleConfig,
    pub timing: TimingConfig,
    pub compositor: CompositorOptions,
    pub retry: RetryPolicy,
    pub caption_format: SubtitleFormat,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            work_dir: std::env::temp_dir().join("storyreel"),
            output_name: "video.mp4".to_string(),
            voice: VoiceConfig::default(),
            style: StyleConfig::default(),
            timing: TimingConfig::default(),
            compositor: CompositorOptions::default(),
            retry: RetryPolicy::default(),
            caption_format: SubtitleFormat::default(),
        }
    }
}

impl PipelineConfig {
    #[must_use]
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }
}

/// Endpoints and tool locations for the bundled collaborators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    pub synthesis_url: String,
    pub image_url: String,
    /// Environment variable holding the bearer token, if any
    pub api_key_env: String,
    pub request_timeout_secs: u64,
    pub ffmpeg_path: Option<String>,
    pub ffprobe_path: Option<String>,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            synthesis_url: "http://127.0.0.1:8400/v1/synthesize".to_string(),
            image_url: "http://127.0.0.1:8400/v1/images".to_string(),
            api_key_env: "STORYREEL_API_KEY".to_string(),
            request_timeout_secs: 300,
            ffmpeg_path: None,
            ffprobe_path: None,
        }
    }
}

impl ServiceSettings {
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Bearer token from the configured environment variable
    #[must_use]
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }

    #[must_use]
    pub fn ffmpeg(&self) -> String {
        resolve_tool(self.ffmpeg_path.as_deref(), "ffmpeg")
    }

    #[must_use]
    pub fn ffprobe(&self) -> String {
        resolve_tool(self.ffprobe_path.as_deref(), "ffprobe")
    }
}

fn resolve_tool(configured: Option<&str>, name: &str) -> String {
    configured.map_or_else(
        || {
            which::which(name).map_or_else(
                |_| name.to_string(),
                |p| p.to_string_lossy().to_string(),
            )
        },
        str::to_string,
    )
}

/// Top-level configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub pipeline: PipelineConfig,
    pub services: ServiceSettings,
}

impl Settings {
    /// Load from `path`, or from the default location when `path` is `None`.
    ///
    /// A missing default file yields defaults; an explicit path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let path = config_path();
                if path.exists() {
                    Self::from_file(&path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("invalid TOML in {}", path.display()))
    }
}

/// Return the path to the default config file.
#[must_use]
pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("storyreel")
        .join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_empty_config() {
        let settings: Settings = toml::from_str("").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.pipeline.timing.scene_min_ms, 1200);
        assert_eq!(settings.pipeline.style.max_retries, 2);
    }

    #[test]
    fn parse_partial_config() {
        let toml_str = r#"
[pipeline]
work_dir = "/srv/reels"
caption_format = "vtt"

[pipeline.voice]
voice_id = "alto"

[pipeline.retry]
max_retries = 6

[services]
synthesis_url = "https://tts.example.com/v1/synthesize"
ffmpeg_path = "/opt/ffmpeg/bin/ffmpeg"
"#;
        let settings: Settings = toml::from_str(toml_str).unwrap();

        assert_eq!(settings.pipeline.work_dir, PathBuf::from("/srv/reels"));
        assert_eq!(settings.pipeline.caption_format, SubtitleFormat::Vtt);
        assert_eq!(settings.pipeline.voice.voice_id, "alto");
        assert!((settings.pipeline.voice.speed - 1.0).abs() < f32::EPSILON);
        assert_eq!(settings.pipeline.retry.max_retries, 6);
        assert_eq!(settings.pipeline.retry.base_delay_ms, 1000);
        assert_eq!(settings.services.ffmpeg(), "/opt/ffmpeg/bin/ffmpeg");
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let err = Settings::load(Some(Path::new("/no/such/storyreel.toml"))).unwrap_err();
        assert!(err.to_string().contains("failed to read"));
    }

    #[test]
    fn invalid_toml_is_reported_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[pipeline\nwork_dir = 3").unwrap();
        let err = Settings::load(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("invalid TOML"));
    }

    #[test]
    fn portrait_style_swaps_dimensions() {
        let style = StyleConfig {
            style: "watercolor".to_string(),
            ..Default::default()
        }
        .portrait();
        assert_eq!((style.width, style.height), (1080, 1920));
        assert_eq!(style.aspect_ratio, "9:16");
        assert_eq!(style.style, "watercolor");
        assert_eq!(style.max_retries, 2);
    }

    #[test]
    fn config_path_is_under_storyreel() {
        assert!(config_path().ends_with("storyreel/config.toml"));
    }
}
