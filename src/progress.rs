//! Progress and log reporting
//!
//! A [`Tracker`] is the only writer of [`PipelineState`]. Every update is also
//! pushed to an optional bounded channel for the presentation layer. Sends
//! never wait: when the listener is slow or gone the event is dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;

use crate::error::PipelineError;
use crate::state::{ErrorInfo, LogEntry, LogLevel, PipelineState, Step};

/// Default capacity for [`event_channel`]
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// One record on the progress/log channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineEvent {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub step: Step,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent: Option<u8>,
}

/// Bounded channel for pipeline events
#[must_use]
pub fn event_channel(capacity: usize) -> (mpsc::Sender<PipelineEvent>, mpsc::Receiver<PipelineEvent>) {
    mpsc::channel(capacity.max(1))
}

/// `done / total` as a whole percentage
#[must_use]
pub fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done.min(total) * 100) / total) as u8
}

/// Shared handle for writing pipeline state and emitting events
#[derive(Debug, Clone, Default)]
pub struct Tracker {
    state: Arc<Mutex<PipelineState>>,
    events: Option<mpsc::Sender<PipelineEvent>>,
}

impl Tracker {
    #[must_use]
    pub fn new(events: Option<mpsc::Sender<PipelineEvent>>) -> Self {
        Self {
            state: Arc::default(),
            events,
        }
    }

    /// Copy of the current state
    #[must_use]
    pub fn snapshot(&self) -> PipelineState {
        self.with_state(|s| s.clone())
    }

    #[must_use]
    pub fn current_step(&self) -> Step {
        self.with_state(|s| s.current_step)
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut PipelineState) -> R) -> R {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Reset for a new run; the script is already available
    pub fn begin_run(&self) {
        self.with_state(|s| {
            *s = PipelineState {
                current_step: Step::Script,
                start_time: Some(Utc::now()),
                ..PipelineState::default()
            };
            s.set_progress(Step::Script, 100);
        });
    }

    /// Make `step` the active step
    pub fn enter(&self, step: Step) {
        self.with_state(|s| {
            s.current_step = step;
            s.set_progress(step, 0);
        });
        self.emit(LogLevel::Info, format!("{step} started"), step, Some(0));
    }

    /// Record progress for `step`
    pub fn progress(&self, step: Step, percent: u8) {
        let stored = self.with_state(|s| s.set_progress(step, percent));
        self.emit(LogLevel::Info, format!("{step} {stored}%"), step, Some(stored));
    }

    /// Append a log record for the active step
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        let step = self.with_state(|s| {
            s.logs.push(LogEntry {
                timestamp: Utc::now(),
                level,
                message: message.clone(),
                step: s.current_step,
            });
            s.current_step
        });

        match level {
            LogLevel::Info | LogLevel::Success => tracing::info!(step = %step, "{message}"),
            LogLevel::Warning => tracing::warn!(step = %step, "{message}"),
            LogLevel::Error => tracing::error!(step = %step, "{message}"),
        }

        self.emit(level, message, step, None);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warning, message);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.log(LogLevel::Success, message);
    }

    /// Move to `Completed`
    pub fn complete(&self) {
        self.with_state(|s| s.current_step = Step::Completed);
        self.success("pipeline completed");
    }

    /// Record a terminal failure and move to `Error` (or `Cancelled`)
    pub fn fail(&self, err: &PipelineError) {
        let terminal = if matches!(err, PipelineError::Cancelled) {
            Step::Cancelled
        } else {
            Step::Error
        };
        let failed_step = self.current_step();
        self.log(LogLevel::Error, err.to_string());
        self.with_state(|s| {
            s.error = Some(ErrorInfo {
                code: err.reason_code(),
                detail: err.to_string(),
                step: failed_step,
            });
            s.current_step = terminal;
        });
    }

    fn emit(&self, level: LogLevel, message: String, step: Step, percent: Option<u8>) {
        if let Some(tx) = &self.events {
            // Full or closed channel: drop the event.
            let _ = tx.try_send(PipelineEvent {
                timestamp: Utc::now(),
                level,
                message,
                step,
                percent,
            });
        }
    }
}
