//! The engine behind the native JSON contract.
//!
//! `JsonEngine` answers [`NativeCall`]s with the exact JSON the C ABI returns. The
//! `negotiation_processor` cdylib is a thin `extern "C"` shell around it, and since it
//! also implements [`NativeBackend`] it can stand in for the shared library in-process.

use super::native::{NativeBackend, NativeCall, NativeError};
use super::reply::{ErrorPayload, Reply};
use crate::engine::{
    ExerciseTimer, Lexicon, PatternDetector, PerformanceHistory, TextAnalyzer, TimerMode,
};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard};
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct TimingState {
    timer: ExerciseTimer,
    history: PerformanceHistory,
}

struct Tables {
    analyzer: TextAnalyzer,
    detector: PatternDetector,
}

impl Tables {
    fn new(lexicon: Arc<Lexicon>) -> Self {
        Self {
            analyzer: TextAnalyzer::new(Arc::clone(&lexicon)),
            detector: PatternDetector::new(lexicon),
        }
    }
}

/// The lexicon can be replaced at runtime with [`NativeCall::Configure`]; timing state
/// survives the swap.
pub struct JsonEngine {
    tables: RwLock<Tables>,
    timing: Mutex<TimingState>,
}

impl Default for JsonEngine {
    fn default() -> Self {
        Self::new(Lexicon::embedded())
    }
}

impl JsonEngine {
    pub fn new(lexicon: Arc<Lexicon>) -> Self {
        Self {
            tables: RwLock::new(Tables::new(lexicon)),
            // The native contract is always last-start-wins.
            timing: Mutex::new(TimingState {
                timer: ExerciseTimer::new(TimerMode::Overwrite),
                history: PerformanceHistory::new(),
            }),
        }
    }

    /// Installs the lexicon encoded in `json` and replies with its fingerprint, or with an
    /// error payload when the tables do not load.
    fn configure(&self, json: &str) -> Result<String, NativeError> {
        match Lexicon::from_json(json) {
            Ok(lexicon) => {
                let fingerprint = lexicon.fingerprint();
                *self.tables.write().unwrap_or_else(PoisonError::into_inner) =
                    Tables::new(Arc::new(lexicon));
                debug!(
                    "Lexicon v{} installed ({} patterns)",
                    fingerprint.version,
                    fingerprint.patterns.len()
                );
                Ok(serde_json::to_string(&fingerprint)?)
            }
            Err(e) => {
                debug!("Lexicon rejected: {}", e);
                Ok(serde_json::to_string(&ErrorPayload::new(e.to_string()))?)
            }
        }
    }

    fn tables(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl NativeBackend for JsonEngine {
    fn invoke(&self, call: NativeCall<'_>) -> Result<String, NativeError> {
        let json = match call {
            NativeCall::Configure(lexicon) => return self.configure(lexicon),
            NativeCall::Analyze(text) => {
                serde_json::to_string(&self.tables().analyzer.analyze(text))?
            }
            NativeCall::Detect(text) => {
                serde_json::to_string(&self.tables().detector.detect(text))?
            }
            NativeCall::StartTimer(exercise_id) => {
                let mut timing = self.timing.lock().unwrap_or_else(PoisonError::into_inner);
                serde_json::to_string(&Reply::from(timing.timer.start(exercise_id)))?
            }
            NativeCall::StopTimer => {
                let mut timing = self.timing.lock().unwrap_or_else(PoisonError::into_inner);
                let stopped = timing.timer.stop();
                if let Ok(result) = &stopped {
                    if let Err(e) = timing
                        .history
                        .record(&result.exercise_id, result.elapsed_seconds)
                    {
                        warn!("Elapsed time not recorded: {}", e);
                    }
                }
                serde_json::to_string(&Reply::from(stopped))?
            }
            NativeCall::PerformanceStats(Some(exercise_id)) => {
                let timing = self.timing.lock().unwrap_or_else(PoisonError::into_inner);
                serde_json::to_string(&timing.history.stats(exercise_id))?
            }
            NativeCall::PerformanceStats(None) => {
                let timing = self.timing.lock().unwrap_or_else(PoisonError::into_inner);
                serde_json::to_string(&timing.history.all_stats())?
            }
        };
        Ok(json)
    }

    fn describe(&self) -> String {
        "in-process json engine".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn call(engine: &JsonEngine, call: NativeCall<'_>) -> Value {
        serde_json::from_str(&engine.invoke(call).unwrap()).unwrap()
    }

    #[test]
    fn test_analyze_wire_fields() {
        let engine = JsonEngine::default();
        let json = call(&engine, NativeCall::Analyze("Juntos teremos sucesso"));
        assert_eq!(json["word_count"], 3);
        for field in [
            "positive_words",
            "negative_words",
            "power_words",
            "collaborative_words",
            "positive_ratio",
            "negative_ratio",
            "power_ratio",
            "collaborative_ratio",
            "tone_score",
            "style_score",
        ] {
            assert!(json["metrics"].get(field).is_some(), "missing {}", field);
        }
    }

    #[test]
    fn test_timer_round_trip_records_history() {
        let engine = JsonEngine::default();

        let stopped = call(&engine, NativeCall::StopTimer);
        assert_eq!(stopped["error"], true);
        assert_eq!(stopped["message"], "Timer not started");

        let started = call(&engine, NativeCall::StartTimer("batna"));
        assert_eq!(started["status"], "started");

        let stopped = call(&engine, NativeCall::StopTimer);
        assert_eq!(stopped["status"], "stopped");
        assert_eq!(stopped["exercise_id"], "batna");

        let stats = call(&engine, NativeCall::PerformanceStats(Some("batna")));
        assert_eq!(stats["status"], "success");
        assert_eq!(stats["count"], 1);

        let all = call(&engine, NativeCall::PerformanceStats(None));
        assert!(all.get("batna").is_some());

        let unknown = call(&engine, NativeCall::PerformanceStats(Some("zopa")));
        assert_eq!(unknown, serde_json::json!({"status": "no_data"}));
    }

    #[test]
    fn test_configure_swaps_lexicon_and_keeps_history() {
        let engine = JsonEngine::default();
        call(&engine, NativeCall::StartTimer("batna"));
        call(&engine, NativeCall::StopTimer);

        let custom = Lexicon::embedded()
            .with_pattern(crate::engine::PatternDefinition {
                pattern_id: "silence".to_string(),
                keywords: vec!["silêncio".to_string()],
                description: "Uso do silêncio".to_string(),
                responses: vec![],
            })
            .unwrap();
        let reply = call(&engine, NativeCall::Configure(&custom.to_json().unwrap()));
        assert_eq!(reply, serde_json::to_value(custom.fingerprint()).unwrap());

        let detection = call(&engine, NativeCall::Detect("o silêncio"));
        assert_eq!(detection["detected_patterns"][0]["pattern_id"], "silence");
        let stats = call(&engine, NativeCall::PerformanceStats(Some("batna")));
        assert_eq!(stats["count"], 1);
    }

    #[test]
    fn test_configure_rejects_invalid_lexicon() {
        let engine = JsonEngine::default();
        let reply = call(&engine, NativeCall::Configure("{\"version\": 99}"));
        assert_eq!(reply["error"], true);

        // The previous tables stay in place.
        let detection = call(&engine, NativeCall::Detect("oferta final"));
        assert!(detection["all_scores"].get("take_it_or_leave_it").is_some());
    }
}
