//! Native-first negotiation processor.
//!
//! Every operation tries the native module first and falls back to the in-process engine
//! when the module is absent or the call fails. Callers always get a well-formed result;
//! the backend that produced it is only visible through [`NegotiationBridge::diagnostics`].
//!
//! Timer sessions are tracked in-process even when the native module serves them, so a
//! native failure halfway through a session never loses it: the local copy can always be
//! stopped.
//!
//! The native module is handed the bridge's lexicon when it is attached and must echo its
//! fingerprint back, otherwise the bridge starts degraded. The module holds one lexicon per
//! process, so with several bridges in one process the last one attached wins.

use super::diagnostics::{Backend, BackendStatus, CallCounters, DiagnosticsSnapshot, Served};
use super::native::{LibraryBackend, NativeBackend, NativeCall, NativeError};
use super::reply::{parse_native_reply, ErrorPayload, Reply, WellFormed};
use crate::config::EngineConfig;
use crate::engine::{
    AnalysisResult, DetectionResult, ExerciseTimer, Lexicon, LexiconFingerprint, PatternDetector,
    PerformanceHistory, PerformanceReport, PerformanceSummary, ResponseSuggestions,
    TextAnalyzer, TimerError, TimerMode, TimerStartResult, TimerStopResult,
};
use crate::error::AppError;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use tracing::{debug, info, warn};

static GLOBAL: OnceLock<NegotiationBridge> = OnceLock::new();

/// Mutable per-bridge state. Guarded by one mutex that also serializes native calls.
#[derive(Debug, Default)]
struct SessionState {
    /// Local copy of the open session, whoever started it.
    timer: ExerciseTimer,
    /// Backend that started the open session.
    owner: Option<Backend>,
    /// In-process history; receives every successful stop.
    history: PerformanceHistory,
    /// Set once the native history can no longer be trusted to match the local one.
    history_diverged: bool,
}

pub struct NegotiationBridge {
    config: EngineConfig,
    lexicon: Arc<Lexicon>,
    analyzer: TextAnalyzer,
    detector: PatternDetector,
    native: Option<Box<dyn NativeBackend>>,
    status: BackendStatus,
    state: Mutex<SessionState>,
    counters: CallCounters,
}

impl NegotiationBridge {
    /// Builds a bridge from `config`, loading the lexicon and (if enabled) the native module.
    ///
    /// A native module that cannot be loaded is not an error: the bridge starts degraded.
    /// Errors are limited to an unusable lexicon override.
    pub fn new(config: EngineConfig) -> Result<Self, AppError> {
        let lexicon = Lexicon::load(&config)?;
        let (native, status) = Self::load_native(&config, &lexicon);
        Ok(Self::assemble(config, lexicon, native, status))
    }

    /// Builds a bridge around an explicit backend. `None` yields a degraded bridge.
    pub fn with_backend(
        config: EngineConfig,
        lexicon: Arc<Lexicon>,
        native: Option<Box<dyn NativeBackend>>,
    ) -> Self {
        let (native, status) = match native {
            Some(backend) => attach(backend, &lexicon),
            None => {
                let reason = "no native backend supplied".to_string();
                warn!("Negotiation processor degraded: {}", reason);
                (None, BackendStatus::Degraded { reason })
            }
        };
        Self::assemble(config, lexicon, native, status)
    }

    /// The process-wide bridge, configured from the environment on first use.
    pub fn global() -> &'static NegotiationBridge {
        GLOBAL.get_or_init(|| {
            let config = EngineConfig::from_env().unwrap_or_else(|e| {
                warn!("Invalid negotiation configuration, using defaults: {}", e);
                EngineConfig::default()
            });
            let lexicon = Lexicon::load(&config).unwrap_or_else(|e| {
                warn!("Lexicon override rejected, using embedded lexicon: {}", e);
                Lexicon::embedded()
            });
            let (native, status) = Self::load_native(&config, &lexicon);
            Self::assemble(config, lexicon, native, status)
        })
    }

    fn load_native(
        config: &EngineConfig,
        lexicon: &Lexicon,
    ) -> (Option<Box<dyn NativeBackend>>, BackendStatus) {
        if !config.native_enabled {
            let reason = "native module disabled by configuration".to_string();
            warn!("Negotiation processor degraded: {}", reason);
            return (None, BackendStatus::Degraded { reason });
        }

        let path = config.native_library_path();
        match LibraryBackend::load(&path) {
            Ok(backend) => attach(Box::new(backend), lexicon),
            Err(e) => {
                let reason = format!("{} ({})", e, path.display());
                warn!("Negotiation processor degraded: {}", reason);
                (None, BackendStatus::Degraded { reason })
            }
        }
    }

    fn assemble(
        config: EngineConfig,
        lexicon: Arc<Lexicon>,
        native: Option<Box<dyn NativeBackend>>,
        status: BackendStatus,
    ) -> Self {
        let state = SessionState {
            timer: ExerciseTimer::new(config.timer_mode),
            ..SessionState::default()
        };
        Self {
            analyzer: TextAnalyzer::new(Arc::clone(&lexicon)),
            detector: PatternDetector::new(Arc::clone(&lexicon)),
            lexicon,
            config,
            native,
            status,
            state: Mutex::new(state),
            counters: CallCounters::default(),
        }
    }

    pub fn status(&self) -> &BackendStatus {
        &self.status
    }

    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.counters.snapshot(&self.status)
    }

    pub fn lexicon(&self) -> &Arc<Lexicon> {
        &self.lexicon
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_timer_running(&self) -> bool {
        self.lock_state().timer.is_running()
    }

    // --- Analysis ---

    pub fn analyze(&self, text: &str) -> AnalysisResult {
        let served = match &self.native {
            Some(native) => {
                let attempt = {
                    let _serial = self.lock_state();
                    call_native::<AnalysisResult>(native.as_ref(), NativeCall::Analyze(text))
                };
                self.absorb("analyze", attempt, || self.analyzer.analyze(text))
            }
            None => Served::Fallback(self.analyzer.analyze(text)),
        };
        self.finish("analyze", served)
    }

    pub fn detect(&self, text: &str) -> DetectionResult {
        let served = match &self.native {
            Some(native) => {
                let attempt = {
                    let _serial = self.lock_state();
                    call_native::<DetectionResult>(native.as_ref(), NativeCall::Detect(text))
                };
                self.absorb("detect", attempt, || self.detector.detect(text))
            }
            None => Served::Fallback(self.detector.detect(text)),
        };
        self.finish("detect", served)
    }

    /// Counter-tactics for a pattern; empty for unknown ids. Always served in-process.
    pub fn suggest_responses(&self, pattern_id: &str) -> ResponseSuggestions {
        self.detector.suggest_responses(pattern_id)
    }

    /// Description of a pattern, or "Padrão desconhecido".
    pub fn describe_pattern(&self, pattern_id: &str) -> &str {
        self.detector.describe(pattern_id)
    }

    // --- Timer ---

    pub fn start_timer(&self, exercise_id: &str) -> Reply<TimerStartResult> {
        if let Err(payload) = self.check_exercise_id(exercise_id) {
            return Reply::Error(payload);
        }

        let mut state = self.lock_state();
        if state.timer.mode() == TimerMode::Reject {
            if let Some(open) = state.timer.current() {
                debug!("start_timer('{}') refused: '{}' is running", exercise_id, open);
                let err = TimerError::AlreadyRunning {
                    exercise_id: open.to_string(),
                };
                return Reply::Error(err.into());
            }
        }

        let served = match &self.native {
            Some(native) => {
                let attempt = call_native::<TimerStartResult>(
                    native.as_ref(),
                    NativeCall::StartTimer(exercise_id),
                )
                .and_then(|result| expect_exercise(result, exercise_id, |r| &r.exercise_id));
                match attempt {
                    Ok(result) => {
                        state.timer.adopt(exercise_id, result.timestamp);
                        Served::Native(Ok(result))
                    }
                    Err(e) => {
                        self.native_failed("start_timer", &e);
                        Served::Fallback(state.timer.start(exercise_id))
                    }
                }
            }
            None => Served::Fallback(state.timer.start(exercise_id)),
        };

        if served_ok(&served) {
            state.owner = Some(served.backend());
        }
        drop(state);
        Reply::from(self.finish("start_timer", served))
    }

    /// Stops the open session and records its elapsed time in the performance history.
    pub fn stop_timer(&self) -> Reply<TimerStopResult> {
        let mut state = self.lock_state();
        let Some(expected) = state.timer.current().map(str::to_owned) else {
            return Reply::Error(ErrorPayload::not_started());
        };

        let native = match (state.owner, &self.native) {
            (Some(Backend::Native), Some(native)) => Some(native),
            _ => None,
        };
        let served = match native {
            Some(native) => {
                let attempt = call_native::<TimerStopResult>(native.as_ref(), NativeCall::StopTimer)
                    .and_then(|result| expect_exercise(result, &expected, |r| &r.exercise_id));
                match attempt {
                    Ok(result) => {
                        state.timer.clear();
                        Served::Native(Ok(result))
                    }
                    Err(e) => {
                        self.native_failed("stop_timer", &e);
                        Served::Fallback(state.timer.stop())
                    }
                }
            }
            None => Served::Fallback(state.timer.stop()),
        };
        state.owner = None;

        if let Served::Native(Ok(result)) | Served::Fallback(Ok(result)) = &served {
            if let Err(e) = state
                .history
                .record(&result.exercise_id, result.elapsed_seconds)
            {
                warn!("Elapsed time not recorded: {}", e);
            }
            if served.backend() == Backend::Fallback {
                state.history_diverged = true;
            }
        }
        drop(state);
        Reply::from(self.finish("stop_timer", served))
    }

    // --- Performance ---

    /// Summary for one exercise, or for every known exercise when `exercise_id` is `None`.
    /// A blank id is treated as `None`.
    pub fn performance_stats(&self, exercise_id: Option<&str>) -> PerformanceReport {
        let exercise_id = exercise_id.filter(|id| !id.trim().is_empty());
        let state = self.lock_state();
        let served = match &self.native {
            Some(native) if !state.history_diverged => {
                let attempt = match exercise_id {
                    Some(id) => call_native::<PerformanceSummary>(
                        native.as_ref(),
                        NativeCall::PerformanceStats(Some(id)),
                    )
                    .map(PerformanceReport::Exercise),
                    None => call_native::<BTreeMap<String, PerformanceSummary>>(
                        native.as_ref(),
                        NativeCall::PerformanceStats(None),
                    )
                    .map(PerformanceReport::All),
                };
                self.absorb("performance_stats", attempt, || {
                    state.history.report(exercise_id)
                })
            }
            _ => Served::Fallback(state.history.report(exercise_id)),
        };
        drop(state);
        self.finish("performance_stats", served)
    }

    /// Appends a value (e.g. a score) to an exercise's history and returns its new summary.
    pub fn record_performance(&self, exercise_id: &str, value: f64) -> Reply<PerformanceSummary> {
        if let Err(payload) = self.check_exercise_id(exercise_id) {
            return Reply::Error(payload);
        }
        let mut state = self.lock_state();
        if let Err(e) = state.history.record(exercise_id, value) {
            return Reply::Error(ErrorPayload::new(e.to_string()));
        }
        state.history_diverged = true;
        Reply::Ok(state.history.stats(exercise_id))
    }

    /// Empties an exercise's history; later stats report `no_data`.
    pub fn clear_performance(&self, exercise_id: &str) {
        let mut state = self.lock_state();
        state.history.clear(exercise_id);
        state.history_diverged = true;
    }

    pub fn save_history(&self, path: &Path) -> Result<(), AppError> {
        self.lock_state().history.save_to(path)
    }

    pub fn load_history(&self, path: &Path) -> Result<(), AppError> {
        let mut state = self.lock_state();
        state.history.load_from(path)?;
        state.history_diverged = true;
        Ok(())
    }

    // --- Internals ---

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn absorb<T>(
        &self,
        operation: &str,
        attempt: Result<T, NativeError>,
        fallback: impl FnOnce() -> T,
    ) -> Served<T> {
        match attempt {
            Ok(value) => Served::Native(value),
            Err(e) => {
                self.native_failed(operation, &e);
                Served::Fallback(fallback())
            }
        }
    }

    fn native_failed(&self, operation: &str, err: &NativeError) {
        self.counters.native_failed();
        debug!("Native {} failed, retrying in-process: {}", operation, err);
    }

    fn finish<T>(&self, operation: &str, served: Served<T>) -> T {
        let backend = served.backend();
        self.counters.served(backend);
        debug!("{} served by {:?}", operation, backend);
        served.into_inner()
    }

    fn check_exercise_id(&self, exercise_id: &str) -> Result<(), ErrorPayload> {
        if exercise_id.trim().is_empty() {
            return Err(ErrorPayload::new("Exercise id must not be empty"));
        }
        let len = exercise_id.chars().count();
        if len > self.config.max_exercise_id_len {
            return Err(ErrorPayload::new(format!(
                "Exercise id too long: {} characters (max {})",
                len, self.config.max_exercise_id_len
            )));
        }
        if exercise_id.chars().any(char::is_control) {
            return Err(ErrorPayload::new(
                "Exercise id must not contain control characters",
            ));
        }
        Ok(())
    }
}

/// One native call, decoded and checked. Panics unwinding out of the backend are
/// contained here.
fn call_native<T>(native: &dyn NativeBackend, call: NativeCall<'_>) -> Result<T, NativeError>
where
    T: DeserializeOwned + WellFormed,
{
    let raw = panic::catch_unwind(AssertUnwindSafe(|| native.invoke(call)))
        .map_err(|_| NativeError::Panicked)??;
    parse_native_reply(&raw)
}

/// Installs `lexicon` in the native module and checks the module now holds the same tables.
fn configure_native(native: &dyn NativeBackend, lexicon: &Lexicon) -> Result<(), NativeError> {
    let json = lexicon
        .to_json()
        .map_err(|e| NativeError::Encoding(e.to_string()))?;
    let installed: LexiconFingerprint = call_native(native, NativeCall::Configure(&json))?;
    let expected = lexicon.fingerprint();
    if installed != expected {
        return Err(NativeError::Malformed(format!(
            "native lexicon differs: v{} with {} patterns, expected v{} with {}",
            installed.version,
            installed.patterns.len(),
            expected.version,
            expected.patterns.len()
        )));
    }
    Ok(())
}

/// Emits the single initialization diagnostic for a native backend.
fn attach(
    native: Box<dyn NativeBackend>,
    lexicon: &Lexicon,
) -> (Option<Box<dyn NativeBackend>>, BackendStatus) {
    let source = native.describe();
    match configure_native(native.as_ref(), lexicon) {
        Ok(()) => {
            info!("Negotiation processor using native backend: {}", source);
            (Some(native), BackendStatus::Native { source })
        }
        Err(e) => {
            let reason = format!("native module rejected the lexicon: {} ({})", e, source);
            warn!("Negotiation processor degraded: {}", reason);
            (None, BackendStatus::Degraded { reason })
        }
    }
}

fn served_ok<T, E>(served: &Served<Result<T, E>>) -> bool {
    matches!(served, Served::Native(Ok(_)) | Served::Fallback(Ok(_)))
}

/// Rejects a native timer reply that names a different exercise than the one in play.
fn expect_exercise<T>(
    result: T,
    expected: &str,
    exercise_of: impl Fn(&T) -> &String,
) -> Result<T, NativeError> {
    if exercise_of(&result) == expected {
        Ok(result)
    } else {
        Err(NativeError::Malformed(format!(
            "reply for exercise '{}' while '{}' was expected",
            exercise_of(&result),
            expected
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn degraded() -> NegotiationBridge {
        NegotiationBridge::with_backend(EngineConfig::fallback_only(), Lexicon::embedded(), None)
    }

    #[test]
    fn test_exercise_id_validation() {
        let bridge = degraded();
        assert!(bridge.start_timer("").is_error());
        assert!(bridge.start_timer("   ").is_error());
        assert!(bridge.start_timer("a\nb").is_error());
        assert!(bridge.start_timer(&"x".repeat(129)).is_error());
        assert!(!bridge.start_timer(&"x".repeat(128)).is_error());
    }

    #[test]
    fn test_rejected_start_does_not_count_as_served() {
        let bridge = degraded();
        bridge.start_timer("");
        assert_eq!(bridge.diagnostics().fallback_calls, 0);
    }

    #[test]
    fn test_poisoned_lock_is_recovered() {
        let bridge = degraded();
        let _ = std::panic::catch_unwind(AssertUnwindSafe(|| {
            let _guard = bridge.state.lock().unwrap();
            panic!("poison");
        }));
        assert!(bridge.state.is_poisoned());
        assert!(!bridge.start_timer("batna").is_error());
        assert!(!bridge.stop_timer().is_error());
    }

    #[test]
    fn test_expect_exercise() {
        let ok = expect_exercise("a".to_string(), "a", |s| s);
        assert!(ok.is_ok());
        let err = expect_exercise("b".to_string(), "a", |s| s).unwrap_err();
        assert!(matches!(err, NativeError::Malformed(_)));
    }
}
