//! ffprobe duration measurement and the ffmpeg slideshow compositor

use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{CompositorRequest, CompositorResult, DurationProbe, PercentProgress, VideoCompositor};
use crate::error::ServiceError;

/// Measures audio length with `ffprobe`
#[derive(Debug, Clone)]
pub struct FfprobeDurationProbe {
    ffprobe_path: String,
}

impl FfprobeDurationProbe {
    #[must_use]
    pub fn new(ffprobe_path: impl Into<String>) -> Self {
        Self {
            ffprobe_path: ffprobe_path.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

fn parse_probe_duration(stdout: &[u8]) -> Result<Duration, ServiceError> {
    let probe: FfprobeOutput = serde_json::from_slice(stdout)?;
    let seconds: f64 = probe
        .format
        .and_then(|f| f.duration)
        .and_then(|d| d.trim().parse().ok())
        .ok_or_else(|| ServiceError::process("ffprobe", "no duration in output"))?;

    // Rejects negative, non-finite and out-of-range values
    Duration::try_from_secs_f64(seconds)
        .map_err(|e| ServiceError::process("ffprobe", format!("invalid duration {seconds}: {e}")))
}

#[async_trait]
impl DurationProbe for FfprobeDurationProbe {
    async fn probe(&self, path: &Path) -> Result<Duration, ServiceError> {
        let output = Command::new(&self.ffprobe_path)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_entries",
                "format=duration",
            ])
            .arg(path)
            .output()
            .await?;

        if !output.status.success() {
            return Err(ServiceError::process(
                "ffprobe",
                format!("exited with {} for {}", output.status, path.display()),
            ));
        }

        parse_probe_duration(&output.stdout)
    }
}

/// Renders scene stills over concatenated narration with ffmpeg
#[derive(Debug, Clone)]
pub struct FfmpegCompositor {
    ffmpeg_path: String,
}

impl FfmpegCompositor {
    #[must_use]
    pub fn new(ffmpeg_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }

    /// Build the filter graph: scale/pad each still, concat video, optionally
    /// burn captions, concat narration.
    fn build_filter_complex(request: &CompositorRequest) -> String {
        let images = request.image_files.len();
        let audio = request.audio_files.len();
        let (w, h) = (request.width, request.height);
        let fps = request.options.fps;
        let mut filters = Vec::with_capacity(images + 3);

        for i in 0..images {
            filters.push(format!(
                "[{i}:v]scale={w}:{h}:force_original_aspect_ratio=decrease,\
                 pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,setsar=1,fps={fps},format=yuv420p[v{i}]"
            ));
        }

        let video_labels: String = (0..images).map(|i| format!("[v{i}]")).collect();
        filters.push(format!("{video_labels}concat=n={images}:v=1:a=0[vcat]"));

        match &request.subtitle_path {
            Some(path) => {
                let escaped = escape_filter_path(path);
                filters.push(format!("[vcat]subtitles='{escaped}'[vout]"));
            }
            None => filters.push("[vcat]null[vout]".to_string()),
        }

        let audio_labels: String = (0..audio).map(|j| format!("[{}:a]", images + j)).collect();
        filters.push(format!("{audio_labels}concat=n={audio}:v=0:a=1[aout]"));

        filters.join(";")
    }

    fn build_args(request: &CompositorRequest) -> Vec<String> {
        let mut args: Vec<String> = ["-hide_banner", "-loglevel", "warning", "-nostats"]
            .iter()
            .map(std::string::ToString::to_string)
            .collect();

        // Machine-readable progress on stdout
        args.extend(["-progress".to_string(), "pipe:1".to_string()]);

        let fps = request.options.fps.to_string();
        for (image, ms) in request.image_files.iter().zip(&request.scene_durations_ms) {
            args.extend([
                "-loop".to_string(),
                "1".to_string(),
                "-framerate".to_string(),
                fps.clone(),
                "-t".to_string(),
                format!("{:.3}", *ms as f64 / 1000.0),
                "-i".to_string(),
                image.to_string_lossy().to_string(),
            ]);
        }

        for audio in &request.audio_files {
            args.push("-i".to_string());
            args.push(audio.to_string_lossy().to_string());
        }

        args.extend([
            "-filter_complex".to_string(),
            Self::build_filter_complex(request),
            "-map".to_string(),
            "[vout]".to_string(),
            "-map".to_string(),
            "[aout]".to_string(),
            "-c:v".to_string(),
            request.options.video_codec.clone(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-r".to_string(),
            fps,
            "-c:a".to_string(),
            request.options.audio_codec.clone(),
            "-movflags".to_string(),
            "+faststart".to_string(),
            "-y".to_string(),
            request.output_path.to_string_lossy().to_string(),
        ]);

        args
    }
}

fn escape_filter_path(path: &Path) -> String {
    path.to_string_lossy()
        .replace('\\', "\\\\")
        .replace(':', "\\:")
        .replace('\'', "\\'")
}

/// Parse an encoded-time stat from an ffmpeg progress line, in seconds.
///
/// Accepts `-progress` output (`out_time=00:00:01.500000`) and `-stats`
/// lines (`frame=  12 ... time=00:00:01.50 bitrate=...`).
fn parse_progress_seconds(line: &str) -> Option<f64> {
    let time = if let Some(rest) = line.strip_prefix("out_time=") {
        rest.trim()
    } else {
        line.split("time=").nth(1)?.split_whitespace().next()?
    };

    let parts: Vec<&str> = time.split(':').collect();
    if parts.len() != 3 {
        return None;
    }

    let hours: f64 = parts[0].parse().ok()?;
    let minutes: f64 = parts[1].parse().ok()?;
    let seconds: f64 = parts[2].parse().ok()?;
    let total = hours * 3600.0 + minutes * 60.0 + seconds;
    (total >= 0.0).then_some(total)
}

#[async_trait]
impl VideoCompositor for FfmpegCompositor {
    async fn compose(
        &self,
        request: &CompositorRequest,
        progress: PercentProgress,
    ) -> Result<CompositorResult, ServiceError> {
        if request.image_files.is_empty() || request.audio_files.is_empty() {
            return Err(ServiceError::process("ffmpeg", "nothing to compose"));
        }

        if let Some(parent) = request.output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let args = Self::build_args(request);
        debug!("ffmpeg args: {:?}", args);

        let mut child = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ServiceError::process("ffmpeg", "failed to capture stdout"))?;

        // Keep the tail of stderr for the error message
        let stderr_task = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                let mut tail: Vec<String> = Vec::new();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("ffmpeg: {}", line);
                    if tail.len() == 8 {
                        tail.remove(0);
                    }
                    tail.push(line);
                }
                tail.join("\n")
            })
        });

        let total_secs = request.total_ms() as f64 / 1000.0;
        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
            if let Some(secs) = parse_progress_seconds(&line) {
                if total_secs > 0.0 {
                    progress(((secs / total_secs) * 100.0).clamp(0.0, 99.0) as u8);
                }
            }
        }

        let status = child.wait().await?;
        let stderr_tail = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        if !status.success() {
            return Err(ServiceError::process(
                "ffmpeg",
                format!("exited with {status}: {stderr_tail}"),
            ));
        }
        progress(100);

        let size_bytes = match tokio::fs::metadata(&request.output_path).await {
            Ok(meta) => meta.len(),
            Err(e) => {
                warn!("Output {:?} not readable: {}", request.output_path, e);
                0
            }
        };

        info!(
            "Composited {} scenes to {:?} ({} bytes)",
            request.image_files.len(),
            request.output_path,
            size_bytes
        );

        Ok(CompositorResult {
            video_path: request.output_path.clone(),
            duration_ms: request.total_ms(),
            size_bytes,
            message: None,
        })
    }
}

async fn tool_available(path: &str) -> bool {
    Command::new(path)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Report which external tools can be executed
pub async fn check_dependencies(ffmpeg_path: &str, ffprobe_path: &str) -> Vec<(String, bool)> {
    vec![
        ("ffmpeg".to_string(), tool_available(ffmpeg_path).await),
        ("ffprobe".to_string(), tool_available(ffprobe_path).await),
    ]
}
