//! Exercise timer.
//!
//! Holds at most one open session. `Idle --start--> Running --stop--> Idle`; a start while
//! running either replaces the session or is refused, depending on [`TimerMode`].

use crate::error::AppError;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

pub const NOT_STARTED_MESSAGE: &str = "Timer not started";
pub const ALREADY_RUNNING_MESSAGE: &str = "Timer already running";

/// What `start` does when a session is already open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerMode {
    /// Last start wins; the previous session's start time is discarded.
    #[default]
    Overwrite,
    /// A second start fails until the open session is stopped.
    Reject,
}

impl FromStr for TimerMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "overwrite" => Ok(TimerMode::Overwrite),
            "reject" => Ok(TimerMode::Reject),
            other => Err(AppError::Config(format!("Unknown timer mode: {}", other))),
        }
    }
}

impl fmt::Display for TimerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerMode::Overwrite => write!(f, "overwrite"),
            TimerMode::Reject => write!(f, "reject"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerStatus {
    Started,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerStartResult {
    pub status: TimerStatus,
    pub exercise_id: String,
    /// Epoch milliseconds.
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerStopResult {
    pub status: TimerStatus,
    pub exercise_id: String,
    pub elapsed_seconds: f64,
    /// Epoch milliseconds.
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimerError {
    #[error("Timer not started")]
    NotStarted,
    #[error("Timer already running")]
    AlreadyRunning { exercise_id: String },
}

#[derive(Debug, Clone)]
struct TimerSession {
    exercise_id: String,
    start_timestamp: i64,
    started_at: Instant,
}

#[derive(Debug, Default)]
pub struct ExerciseTimer {
    mode: TimerMode,
    session: Option<TimerSession>,
}

impl ExerciseTimer {
    pub fn new(mode: TimerMode) -> Self {
        Self {
            mode,
            session: None,
        }
    }

    pub fn mode(&self) -> TimerMode {
        self.mode
    }

    pub fn start(&mut self, exercise_id: &str) -> Result<TimerStartResult, TimerError> {
        if let Some(open) = &self.session {
            match self.mode {
                TimerMode::Reject => {
                    return Err(TimerError::AlreadyRunning {
                        exercise_id: open.exercise_id.clone(),
                    })
                }
                TimerMode::Overwrite => warn!(
                    "Timer for '{}' replaced by '{}' before being stopped",
                    open.exercise_id, exercise_id
                ),
            }
        }

        let timestamp = Utc::now().timestamp_millis();
        self.session = Some(TimerSession {
            exercise_id: exercise_id.to_string(),
            start_timestamp: timestamp,
            started_at: Instant::now(),
        });
        debug!("Timer started for '{}'", exercise_id);

        Ok(TimerStartResult {
            status: TimerStatus::Started,
            exercise_id: exercise_id.to_string(),
            timestamp,
        })
    }

    /// Closes the open session. The session is gone afterwards whatever the caller does
    /// with the result.
    pub fn stop(&mut self) -> Result<TimerStopResult, TimerError> {
        let session = self.session.take().ok_or(TimerError::NotStarted)?;
        let elapsed_seconds = session.started_at.elapsed().as_secs_f64();
        debug!(
            "Timer stopped for '{}' after {:.3}s",
            session.exercise_id, elapsed_seconds
        );

        Ok(TimerStopResult {
            status: TimerStatus::Stopped,
            exercise_id: session.exercise_id,
            elapsed_seconds,
            timestamp: Utc::now().timestamp_millis(),
        })
    }

    /// Opens a session that was started elsewhere (e.g. by the native module) at
    /// `start_timestamp`, so that it can still be stopped locally.
    pub fn adopt(&mut self, exercise_id: &str, start_timestamp: i64) {
        let age_ms = Utc::now()
            .timestamp_millis()
            .saturating_sub(start_timestamp)
            .max(0);
        let started_at = Instant::now()
            .checked_sub(Duration::from_millis(age_ms as u64))
            .unwrap_or_else(Instant::now);
        self.session = Some(TimerSession {
            exercise_id: exercise_id.to_string(),
            start_timestamp,
            started_at,
        });
    }

    /// Drops the open session without producing a result.
    pub fn clear(&mut self) {
        self.session = None;
    }

    pub fn current(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.exercise_id.as_str())
    }

    pub fn started_at_millis(&self) -> Option<i64> {
        self.session.as_ref().map(|s| s.start_timestamp)
    }

    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }
}
