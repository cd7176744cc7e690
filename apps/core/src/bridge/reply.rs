//! Public reply envelope and native reply validation.

use super::native::NativeError;
use crate::engine::patterns::DETECTION_THRESHOLD;
use crate::engine::timer::{
    TimerError, TimerStartResult, TimerStatus, TimerStopResult, ALREADY_RUNNING_MESSAGE,
    NOT_STARTED_MESSAGE,
};
use crate::engine::{
    AnalysisResult, Category, DetectionResult, LexiconFingerprint, PerformanceSummary,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Structured error returned in place of a result: `{"error": true, "message": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub error: bool,
    pub message: String,
}

impl ErrorPayload {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: true,
            message: message.into(),
        }
    }

    pub fn not_started() -> Self {
        Self::new(NOT_STARTED_MESSAGE)
    }

    pub fn is_not_started(&self) -> bool {
        self.message == NOT_STARTED_MESSAGE
    }

    pub fn is_already_running(&self) -> bool {
        self.message == ALREADY_RUNNING_MESSAGE
    }
}

impl From<TimerError> for ErrorPayload {
    fn from(err: TimerError) -> Self {
        Self::new(err.to_string())
    }
}

/// Either the operation's result or an [`ErrorPayload`]; serializes as whichever is held.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reply<T> {
    Ok(T),
    Error(ErrorPayload),
}

impl<T> Reply<T> {
    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    pub fn ok(self) -> Option<T> {
        match self {
            Reply::Ok(value) => Some(value),
            Reply::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&ErrorPayload> {
        match self {
            Reply::Ok(_) => None,
            Reply::Error(payload) => Some(payload),
        }
    }

    pub fn into_result(self) -> Result<T, ErrorPayload> {
        match self {
            Reply::Ok(value) => Ok(value),
            Reply::Error(payload) => Err(payload),
        }
    }
}

impl<T, E: Into<ErrorPayload>> From<Result<T, E>> for Reply<T> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Reply::Ok(value),
            Err(err) => Reply::Error(err.into()),
        }
    }
}

/// Range and shape checks applied to values decoded from the native module.
pub(crate) trait WellFormed {
    fn check(&self) -> Result<(), String>;
}

fn unit(name: &str, value: f64) -> Result<(), String> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(format!("{} out of [0, 1]: {}", name, value))
    }
}

fn signed_unit(name: &str, value: f64) -> Result<(), String> {
    if (-1.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(format!("{} out of [-1, 1]: {}", name, value))
    }
}

fn finite(name: &str, value: f64) -> Result<(), String> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(format!("{} is not finite", name))
    }
}

impl WellFormed for AnalysisResult {
    fn check(&self) -> Result<(), String> {
        let m = &self.metrics;
        for category in Category::ALL {
            let count = m.count(category);
            if count > self.word_count {
                return Err(format!(
                    "{} {} words out of {}",
                    count, category, self.word_count
                ));
            }
            let expected = if self.word_count == 0 {
                0.0
            } else {
                count as f64 / self.word_count as f64
            };
            if m.ratio(category) != expected {
                return Err(format!(
                    "{} ratio {} does not match {}/{}",
                    category,
                    m.ratio(category),
                    count,
                    self.word_count
                ));
            }
        }
        unit("positive_ratio", m.positive_ratio)?;
        unit("negative_ratio", m.negative_ratio)?;
        unit("power_ratio", m.power_ratio)?;
        unit("collaborative_ratio", m.collaborative_ratio)?;
        signed_unit("tone_score", m.tone_score)?;
        signed_unit("style_score", m.style_score)?;
        if self.word_count == 0
            && (m.positive_ratio != 0.0
                || m.negative_ratio != 0.0
                || m.power_ratio != 0.0
                || m.collaborative_ratio != 0.0
                || m.tone_score != 0.0
                || m.style_score != 0.0)
        {
            return Err("non-zero metrics for an empty text".to_string());
        }
        Ok(())
    }
}

impl WellFormed for DetectionResult {
    fn check(&self) -> Result<(), String> {
        for (id, score) in &self.all_scores {
            unit(id, *score)?;
        }
        let detected: BTreeSet<&str> = self
            .detected_patterns
            .iter()
            .map(|p| p.pattern_id.as_str())
            .collect();
        if detected.len() != self.detected_patterns.len() {
            return Err("a pattern is reported more than once".to_string());
        }
        let above: BTreeSet<&str> = self
            .all_scores
            .iter()
            .filter(|(_, score)| **score > DETECTION_THRESHOLD)
            .map(|(id, _)| id.as_str())
            .collect();
        if detected != above {
            return Err(format!(
                "detected {:?} but {:?} score above the threshold",
                detected, above
            ));
        }
        for pattern in &self.detected_patterns {
            match self.all_scores.get(&pattern.pattern_id) {
                Some(score) if *score == pattern.confidence => {}
                _ => {
                    return Err(format!(
                        "detected pattern '{}' disagrees with all_scores",
                        pattern.pattern_id
                    ))
                }
            }
        }
        if self
            .detected_patterns
            .windows(2)
            .any(|w| w[0].confidence < w[1].confidence)
        {
            return Err("detected patterns are not sorted".to_string());
        }
        Ok(())
    }
}

impl WellFormed for TimerStartResult {
    fn check(&self) -> Result<(), String> {
        if self.status != TimerStatus::Started {
            return Err("start reply without 'started' status".to_string());
        }
        Ok(())
    }
}

impl WellFormed for TimerStopResult {
    fn check(&self) -> Result<(), String> {
        if self.status != TimerStatus::Stopped {
            return Err("stop reply without 'stopped' status".to_string());
        }
        finite("elapsed_seconds", self.elapsed_seconds)?;
        if self.elapsed_seconds < 0.0 {
            return Err("negative elapsed_seconds".to_string());
        }
        Ok(())
    }
}

impl WellFormed for PerformanceSummary {
    fn check(&self) -> Result<(), String> {
        match self {
            PerformanceSummary::NoData => Ok(()),
            PerformanceSummary::Success { count, stats } => {
                if *count == 0 {
                    return Err("success summary with zero count".to_string());
                }
                finite("mean", stats.mean)?;
                finite("min", stats.min)?;
                finite("max", stats.max)?;
                finite("std_dev", stats.std_dev)?;
                finite("trend", stats.trend)
            }
        }
    }
}

impl WellFormed for LexiconFingerprint {
    fn check(&self) -> Result<(), String> {
        if self.patterns.is_empty() {
            return Err("lexicon without patterns".to_string());
        }
        Ok(())
    }
}

impl WellFormed for BTreeMap<String, PerformanceSummary> {
    fn check(&self) -> Result<(), String> {
        self.values().try_for_each(|summary| summary.check())
    }
}

/// Decodes a complete native reply into `T`. An `{"error": true}` object is reported as
/// [`NativeError::ErrorReply`]; anything that does not decode and check cleanly is
/// [`NativeError::Malformed`].
pub(crate) fn parse_native_reply<T>(raw: &str) -> Result<T, NativeError>
where
    T: DeserializeOwned + WellFormed,
{
    let value: serde_json::Value = serde_json::from_str(raw)?;
    if value.get("error").and_then(serde_json::Value::as_bool) == Some(true) {
        let message = value
            .get("message")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("unspecified native error")
            .to_string();
        return Err(NativeError::ErrorReply(message));
    }
    let parsed: T = serde_json::from_value(value)?;
    parsed.check().map_err(NativeError::Malformed)?;
    Ok(parsed)
}
