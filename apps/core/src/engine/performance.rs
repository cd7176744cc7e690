//! Performance aggregation over recorded exercise values (durations or scores).

use crate::error::AppError;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    pub exercise_id: String,
    pub value: f64,
    /// Epoch milliseconds.
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryStats {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    /// Population standard deviation.
    pub std_dev: f64,
    /// First value minus last value; positive means the latest attempt was lower
    /// (faster, for durations). Zero for single-point or constant series.
    pub trend: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PerformanceSummary {
    Success { count: usize, stats: SummaryStats },
    NoData,
}

/// Summary for one exercise, or for every known exercise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PerformanceReport {
    Exercise(PerformanceSummary),
    All(BTreeMap<String, PerformanceSummary>),
}

/// Largest magnitude a recorded value may have; keeps `first - last` finite.
pub const MAX_PERFORMANCE_MAGNITUDE: f64 = f64::MAX / 2.0;

/// Statistics over a supplied sequence, oldest value first.
///
/// Sums that would overflow are redone on values scaled down by a power of two, so mean and
/// std_dev stay finite for any finite input.
pub fn summarize(values: &[f64]) -> PerformanceSummary {
    let (first, last) = match (values.first(), values.last()) {
        (Some(first), Some(last)) => (*first, *last),
        _ => return PerformanceSummary::NoData,
    };

    let count = values.len();
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let (mut mean, mut std_dev) = moments(values, 1.0);
    if !(mean.is_finite() && std_dev.is_finite()) {
        let magnitude = min.abs().max(max.abs());
        let scale = 2f64.powi(magnitude.log2().floor() as i32);
        (mean, std_dev) = moments(values, scale);
    }

    PerformanceSummary::Success {
        count,
        stats: SummaryStats {
            mean,
            min,
            max,
            std_dev,
            trend: if count >= 2 { first - last } else { 0.0 },
        },
    }
}

/// Mean and population standard deviation of `values / scale`, scaled back up.
fn moments(values: &[f64], scale: f64) -> (f64, f64) {
    let count = values.len() as f64;
    let mean = values.iter().map(|v| v / scale).sum::<f64>() / count;
    let variance = values
        .iter()
        .map(|v| (v / scale - mean).powi(2))
        .sum::<f64>()
        / count;
    (mean * scale, variance.sqrt() * scale)
}

fn check_value(exercise_id: &str, value: f64) -> Result<(), AppError> {
    if !value.is_finite() {
        return Err(AppError::Validation(format!(
            "Non-finite performance value for '{}': {}",
            exercise_id, value
        )));
    }
    if value.abs() > MAX_PERFORMANCE_MAGNITUDE {
        return Err(AppError::Validation(format!(
            "Performance value for '{}' out of range: {}",
            exercise_id, value
        )));
    }
    Ok(())
}

/// Append-only history of recorded values, keyed by exercise.
#[derive(Debug, Clone, Default)]
pub struct PerformanceHistory {
    records: BTreeMap<String, Vec<PerformanceRecord>>,
}

impl PerformanceHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, exercise_id: &str, value: f64) -> Result<(), AppError> {
        check_value(exercise_id, value)?;
        self.records
            .entry(exercise_id.to_string())
            .or_default()
            .push(PerformanceRecord {
                exercise_id: exercise_id.to_string(),
                value,
                timestamp: Utc::now().timestamp_millis(),
            });
        Ok(())
    }

    /// Empties the exercise's history; the exercise stays known and reports `no_data`.
    pub fn clear(&mut self, exercise_id: &str) {
        if let Some(records) = self.records.get_mut(exercise_id) {
            records.clear();
        }
    }

    pub fn records(&self, exercise_id: &str) -> &[PerformanceRecord] {
        self.records
            .get(exercise_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn values(&self, exercise_id: &str) -> Vec<f64> {
        self.records(exercise_id).iter().map(|r| r.value).collect()
    }

    pub fn stats(&self, exercise_id: &str) -> PerformanceSummary {
        summarize(&self.values(exercise_id))
    }

    pub fn all_stats(&self) -> BTreeMap<String, PerformanceSummary> {
        self.records
            .keys()
            .map(|id| (id.clone(), self.stats(id)))
            .collect()
    }

    pub fn report(&self, exercise_id: Option<&str>) -> PerformanceReport {
        match exercise_id {
            Some(id) => PerformanceReport::Exercise(self.stats(id)),
            None => PerformanceReport::All(self.all_stats()),
        }
    }

    /// Writes `{exercise_id: [values...]}` as pretty JSON.
    pub fn save_to(&self, path: &Path) -> Result<(), AppError> {
        let data: BTreeMap<&str, Vec<f64>> = self
            .records
            .iter()
            .map(|(id, records)| (id.as_str(), records.iter().map(|r| r.value).collect()))
            .collect();
        fs::write(path, serde_json::to_string_pretty(&data)?)?;
        info!("Saved performance history for {} exercises to {:?}", data.len(), path);
        Ok(())
    }

    /// Replaces the history of every exercise present in the file. Loaded values are
    /// stamped with the load time; the file format does not carry timestamps.
    pub fn load_from(&mut self, path: &Path) -> Result<(), AppError> {
        let raw = fs::read_to_string(path)?;
        let data: BTreeMap<String, Vec<f64>> = serde_json::from_str(&raw)?;
        let now = Utc::now().timestamp_millis();

        for (exercise_id, values) in data {
            for value in &values {
                check_value(&exercise_id, *value)?;
            }
            let records = values
                .into_iter()
                .map(|value| PerformanceRecord {
                    exercise_id: exercise_id.clone(),
                    value,
                    timestamp: now,
                })
                .collect();
            self.records.insert(exercise_id, records);
        }
        info!("Loaded performance history from {:?}", path);
        Ok(())
    }
}
