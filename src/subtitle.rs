//! Caption cues laid end-to-end over the narration timeline
//!
//! Supports SRT (the canonical caption artifact) and `WebVTT` output, plus an
//! SRT parser so written files can be read back.

use serde::{Deserialize, Serialize};
use std::fmt::Write as FmtWrite;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tokio::fs;

use crate::scene::Scene;

/// Caption read/write errors
#[derive(Error, Debug)]
pub enum CaptionError {
    #[error("invalid timestamp line: {0}")]
    TimestampLine(String),

    #[error("invalid timestamp: {0}")]
    Timestamp(String),

    #[error("unknown caption format: {0}")]
    UnknownFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Format error: {0}")]
    Format(#[from] std::fmt::Error),
}

pub type Result<T> = std::result::Result<T, CaptionError>;

/// Caption file format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubtitleFormat {
    /// `SubRip` format (.srt)
    #[default]
    Srt,
    /// `WebVTT` format (.vtt)
    Vtt,
}

impl SubtitleFormat {
    /// Get file extension for this format
    #[must_use]
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Srt => "srt",
            Self::Vtt => "vtt",
        }
    }

    /// Generator writing this format
    #[must_use]
    pub fn generator(&self) -> Box<dyn SubtitleGenerator> {
        match self {
            Self::Srt => Box::new(SrtGenerator),
            Self::Vtt => Box::new(VttGenerator),
        }
    }
}

impl FromStr for SubtitleFormat {
    type Err = CaptionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "srt" => Ok(Self::Srt),
            "vtt" | "webvtt" => Ok(Self::Vtt),
            other => Err(CaptionError::UnknownFormat(other.to_string())),
        }
    }
}

/// A single caption entry with timing and text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtitleCue {
    /// Start time in milliseconds
    pub start_ms: u64,
    /// End time in milliseconds, always greater than `start_ms`
    pub end_ms: u64,
    /// Caption text (may contain newlines, never blank lines)
    pub text: String,
}

impl SubtitleCue {
    #[must_use]
    pub fn new(start_ms: u64, end_ms: u64, text: impl Into<String>) -> Self {
        Self {
            start_ms,
            end_ms,
            text: text.into(),
        }
    }

    /// Format time as SRT timestamp (HH:MM:SS,mmm)
    #[must_use]
    pub fn format_srt_time(ms: u64) -> String {
        let (hours, minutes, seconds, millis) = split_ms(ms);
        format!("{hours:02}:{minutes:02}:{seconds:02},{millis:03}")
    }

    /// Format time as VTT timestamp (HH:MM:SS.mmm)
    #[must_use]
    pub fn format_vtt_time(ms: u64) -> String {
        let (hours, minutes, seconds, millis) = split_ms(ms);
        format!("{hours:02}:{minutes:02}:{seconds:02}.{millis:03}")
    }
}

fn split_ms(ms: u64) -> (u64, u64, u64, u64) {
    (
        ms / 3_600_000,
        (ms % 3_600_000) / 60_000,
        (ms % 60_000) / 1000,
        ms % 1000,
    )
}

/// Build cues from scenes and their allocated durations.
///
/// Scenes with blank text (or a zero duration) emit no cue but still advance
/// the clock, so later cues stay aligned with the audio.
#[must_use]
pub fn build_cues(scenes: &[Scene], durations_ms: &[u64]) -> Vec<SubtitleCue> {
    let mut cues = Vec::with_capacity(scenes.len());
    let mut clock = 0u64;

    for (scene, &duration) in scenes.iter().zip(durations_ms) {
        let text = caption_text(&scene.text);
        let end = clock + duration;
        if !text.is_empty() && duration > 0 {
            cues.push(SubtitleCue::new(clock, end, text));
        }
        clock = end;
    }

    cues
}

/// Trim every line and drop blank ones; a blank line would end an SRT block
fn caption_text(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Trait for caption writers
pub trait SubtitleGenerator: Send + Sync {
    /// Get the format this generator produces
    fn format(&self) -> SubtitleFormat;

    /// Generate caption file content from cues
    fn generate(&self, cues: &[SubtitleCue]) -> Result<String>;

    /// Write captions to a file (UTF-8, no byte-order mark)
    fn write_to_file<'a>(
        &'a self,
        cues: &'a [SubtitleCue],
        path: &'a Path,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let content = self.generate(cues)?;
            fs::write(path, content).await?;
            Ok(())
        })
    }
}

/// SRT caption generator
#[derive(Debug, Clone, Copy, Default)]
pub struct SrtGenerator;

impl SubtitleGenerator for SrtGenerator {
    fn format(&self) -> SubtitleFormat {
        SubtitleFormat::Srt
    }

    fn generate(&self, cues: &[SubtitleCue]) -> Result<String> {
        let mut output = String::new();

        for (i, cue) in cues.iter().enumerate() {
            // Sequence number (1-indexed)
            writeln!(output, "{}", i + 1)?;
            writeln!(
                output,
                "{} --> {}",
                SubtitleCue::format_srt_time(cue.start_ms),
                SubtitleCue::format_srt_time(cue.end_ms)
            )?;
            writeln!(output, "{}", cue.text)?;
            writeln!(output)?;
        }

        Ok(output)
    }
}

/// `WebVTT` caption generator
#[derive(Debug, Clone, Copy, Default)]
pub struct VttGenerator;

impl SubtitleGenerator for VttGenerator {
    fn format(&self) -> SubtitleFormat {
        SubtitleFormat::Vtt
    }

    fn generate(&self, cues: &[SubtitleCue]) -> Result<String> {
        let mut output = String::from("WEBVTT\n\n");

        for cue in cues {
            writeln!(
                output,
                "{} --> {}",
                SubtitleCue::format_vtt_time(cue.start_ms),
                SubtitleCue::format_vtt_time(cue.end_ms)
            )?;
            writeln!(output, "{}", cue.text)?;
            writeln!(output)?;
        }

        Ok(output)
    }
}

/// Parse SRT file content into cues
pub fn parse_srt(content: &str) -> Result<Vec<SubtitleCue>> {
    let mut cues = Vec::new();
    let mut lines = content.lines().peekable();

    while lines.peek().is_some() {
        while lines.peek().is_some_and(|l| l.trim().is_empty()) {
            lines.next();
        }

        let Some(seq_line) = lines.next() else {
            break;
        };

        if seq_line.trim().parse::<u32>().is_err() {
            continue;
        }

        let Some(time_line) = lines.next() else {
            break;
        };

        let (start_ms, end_ms) = parse_srt_timestamp_line(time_line)?;

        let mut text_lines = Vec::new();
        while lines.peek().is_some_and(|l| !l.trim().is_empty()) {
            if let Some(line) = lines.next() {
                text_lines.push(line);
            }
        }

        cues.push(SubtitleCue::new(start_ms, end_ms, text_lines.join("\n")));
    }

    Ok(cues)
}

/// Read and parse an SRT file
pub async fn read_srt(path: &Path) -> Result<Vec<SubtitleCue>> {
    let content = fs::read_to_string(path).await?;
    parse_srt(&content)
}

/// Parse SRT timestamp line "HH:MM:SS,mmm --> HH:MM:SS,mmm"
fn parse_srt_timestamp_line(line: &str) -> Result<(u64, u64)> {
    let parts: Vec<&str> = line.split("-->").collect();
    if parts.len() != 2 {
        return Err(CaptionError::TimestampLine(line.to_string()));
    }

    let start = parse_srt_timestamp(parts[0].trim())?;
    let end = parse_srt_timestamp(parts[1].trim())?;

    Ok((start, end))
}

/// Parse SRT timestamp "HH:MM:SS,mmm" to milliseconds
fn parse_srt_timestamp(ts: &str) -> Result<u64> {
    let parts: Vec<&str> = ts.split(&[',', ':'][..]).collect();
    if parts.len() != 4 {
        return Err(CaptionError::Timestamp(ts.to_string()));
    }

    let field = |s: &str| {
        s.parse::<u64>()
            .map_err(|_| CaptionError::Timestamp(ts.to_string()))
    };

    Ok(field(parts[0])? * 3_600_000 + field(parts[1])? * 60_000 + field(parts[2])? * 1000 + field(parts[3])?)
}
