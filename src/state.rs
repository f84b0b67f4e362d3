//! Pipeline state as seen by the presentation layer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::ReasonCode;

/// Pipeline step
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    #[default]
    Idle,
    Script,
    Audio,
    Images,
    Video,
    Completed,
    Error,
    Cancelled,
}

impl Step {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Script => "script",
            Self::Audio => "audio",
            Self::Images => "images",
            Self::Video => "video",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Cancelled)
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity of a log record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
    Success,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub step: Step,
}

/// Terminal failure: reason code plus human-readable detail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ReasonCode,
    pub detail: String,
    pub step: Step,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineState {
    pub current_step: Step,
    /// Percent complete per step, 0..=100
    pub progress: BTreeMap<Step, u8>,
    pub logs: Vec<LogEntry>,
    pub error: Option<ErrorInfo>,
    pub start_time: Option<DateTime<Utc>>,
}

impl PipelineState {
    #[must_use]
    pub fn progress_of(&self, step: Step) -> u8 {
        self.progress.get(&step).copied().unwrap_or(0)
    }

    /// Record progress; values are clamped and never move backwards.
    /// Returns the stored value.
    pub fn set_progress(&mut self, step: Step, percent: u8) -> u8 {
        let entry = self.progress.entry(step).or_insert(0);
        *entry = (*entry).max(percent.min(100));
        *entry
    }

    /// Most recent `count` log entries, oldest first
    #[must_use]
    pub fn recent_logs(&self, count: usize) -> &[LogEntry] {
        let start = self.logs.len().saturating_sub(count);
        &self.logs[start..]
    }
}
