//! Error types for external services and the pipeline

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::retry::{Classify, ErrorClass};
use crate::state::Step;

/// Failure of an external collaborator (synthesis, generation, probe, compositor)
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("transport error: {0}")]
    Transport(String),

    /// The service answered but reported `ok = false`
    #[error("service rejected request: {0}")]
    Rejected(String),

    #[error("{tool} failed: {message}")]
    Process { tool: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ServiceError {
    pub fn process(tool: &str, message: impl Into<String>) -> Self {
        Self::Process {
            tool: tool.to_string(),
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if let Some(status) = err.status() {
            Self::Http {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else if err.is_decode() && caused_by_json(&err) {
            Self::Rejected(format!("undecodable response: {err}"))
        } else {
            // Includes bodies cut off mid-read, which reqwest also reports as decode errors
            Self::Transport(err.to_string())
        }
    }
}

/// The response arrived in full but was not the JSON we expected
fn caused_by_json(err: &reqwest::Error) -> bool {
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        if cause.is::<serde_json::Error>() {
            return true;
        }
        source = cause.source();
    }
    false
}

impl Classify for ServiceError {
    fn classify(&self) -> ErrorClass {
        match self {
            Self::Http { status: 503, .. } => ErrorClass::Overloaded,
            Self::Http { message, .. } | Self::Rejected(message) if mentions_overload(message) => {
                ErrorClass::Overloaded
            }
            Self::Http { status, .. } if *status == 429 || *status >= 500 => ErrorClass::Retryable,
            Self::Timeout(_) | Self::Transport(_) => ErrorClass::Retryable,
            Self::Http { .. }
            | Self::Rejected(_)
            | Self::Process { .. }
            | Self::Io(_)
            | Self::Json(_) => ErrorClass::Fatal,
        }
    }
}

fn mentions_overload(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("overloaded") || lower.contains("unavailable")
}

/// Machine-classifiable reason recorded in `PipelineState.error`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    EmptyScript,
    InvalidScript,
    NoAudioProduced,
    NoUsableAudio,
    NoUsableImages,
    NothingToCompose,
    ServiceFailure,
    CompositionFailed,
    Cancelled,
    Io,
}

impl ReasonCode {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EmptyScript => "empty_script",
            Self::InvalidScript => "invalid_script",
            Self::NoAudioProduced => "no_audio_produced",
            Self::NoUsableAudio => "no_usable_audio",
            Self::NoUsableImages => "no_usable_images",
            Self::NothingToCompose => "nothing_to_compose",
            Self::ServiceFailure => "service_failure",
            Self::CompositionFailed => "composition_failed",
            Self::Cancelled => "cancelled",
            Self::Io => "io",
        }
    }
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage-fatal pipeline failures
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("script has no scenes")]
    EmptyScript,

    #[error("invalid script: {0}")]
    InvalidScript(String),

    #[error("speech synthesis produced no usable audio files")]
    NoAudioProduced,

    #[error("no synthesized audio file exists on disk")]
    NoUsableAudio,

    #[error("no generated image exists on disk")]
    NoUsableImages,

    #[error("no scene has both narration and an image")]
    NothingToCompose,

    #[error("{step} stage failed: {source}")]
    Service {
        step: Step,
        #[source]
        source: ServiceError,
    },

    #[error("compositor failed: {0}")]
    CompositionFailed(String),

    #[error("pipeline cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn service(step: Step, source: ServiceError) -> Self {
        Self::Service { step, source }
    }

    #[must_use]
    pub fn reason_code(&self) -> ReasonCode {
        match self {
            Self::EmptyScript => ReasonCode::EmptyScript,
            Self::InvalidScript(_) => ReasonCode::InvalidScript,
            Self::NoAudioProduced => ReasonCode::NoAudioProduced,
            Self::NoUsableAudio => ReasonCode::NoUsableAudio,
            Self::NoUsableImages => ReasonCode::NoUsableImages,
            Self::NothingToCompose => ReasonCode::NothingToCompose,
            Self::Service { .. } => ReasonCode::ServiceFailure,
            Self::CompositionFailed(_) => ReasonCode::CompositionFailed,
            Self::Cancelled => ReasonCode::Cancelled,
            Self::Io(_) => ReasonCode::Io,
        }
    }
}

impl From<crate::subtitle::CaptionError> for PipelineError {
    fn from(err: crate::subtitle::CaptionError) -> Self {
        match err {
            crate::subtitle::CaptionError::Io(io) => Self::Io(io),
            other => Self::Io(std::io::Error::other(other.to_string())),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
