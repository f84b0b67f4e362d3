//! `storyreel` - narration script to finished video
//!
//! # Pipeline
//!
//! - **Audio**: batched speech synthesis, every file verified on disk
//! - **Images**: one illustration per scene, sequential, bounded retries
//! - **Video**: measured narration re-times scenes and captions, then ffmpeg
//!   composes stills, narration and burned-in captions
//!
//! Scene timing is exact: per-scene durations always sum to the measured
//! narration length and honor a minimum floor whenever it is feasible.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use storyreel::config::Settings;
//! use storyreel::services::{
//!     FfmpegCompositor, FfprobeDurationProbe, HttpImageGenerator, HttpSpeechSynthesizer, Services,
//! };
//! use storyreel::{script, Pipeline};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load(None)?;
//!     let retry = settings.pipeline.retry;
//!     let services = Services {
//!         synthesizer: Arc::new(HttpSpeechSynthesizer::new(&settings.services, retry)?),
//!         images: Arc::new(HttpImageGenerator::new(&settings.services, retry)?),
//!         probe: Arc::new(FfprobeDurationProbe::new(settings.services.ffprobe())),
//!         compositor: Arc::new(FfmpegCompositor::new(settings.services.ffmpeg())),
//!     };
//!
//!     let scenes = script::load_script("script.txt".as_ref()).await?;
//!     let output = Pipeline::new(services, settings.pipeline).run(&scenes).await?;
//!     println!("{}", output.video_path.display());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod retry;
pub mod scene;
pub mod script;
pub mod services;
pub mod stage;
pub mod state;
pub mod subtitle;
pub mod timing;

pub use config::{PipelineConfig, Settings};
pub use error::{PipelineError, ReasonCode, ServiceError};
pub use pipeline::{Pipeline, PipelineOutput};
pub use progress::{event_channel, PipelineEvent, Tracker};
pub use retry::{Backoff, Classify, ErrorClass, RetryContext, RetryPolicy};
pub use scene::{AudioArtifact, ImageArtifact, Scene, SceneDuration};
pub use state::{LogLevel, PipelineState, Step};
pub use subtitle::{build_cues, SubtitleCue, SubtitleFormat};
pub use timing::allocate;

/// Version of storyreel
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
