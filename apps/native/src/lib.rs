//! `negotiation_processor`: the negotiation engine behind a C ABI.
//!
//! Every reply is a NUL-terminated UTF-8 JSON string allocated here; callers hand it back
//! to [`negotiation_free_string`]. Failures are reported in-band as
//! `{"error": true, "message": ...}` and never unwind across the boundary.

use negotiation_core::bridge::{
    ErrorPayload, JsonEngine, NativeBackend, NativeCall, NativeError, NATIVE_ABI_VERSION,
};
use negotiation_core::engine::Lexicon;
use negotiation_core::EngineConfig;
use std::ffi::{c_char, CStr, CString};
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::OnceLock;
use tracing::warn;

static ENGINE: OnceLock<JsonEngine> = OnceLock::new();

fn engine() -> &'static JsonEngine {
    ENGINE.get_or_init(|| {
        let lexicon = EngineConfig::from_env()
            .and_then(|config| Lexicon::load(&config))
            .unwrap_or_else(|e| {
                warn!("Using embedded lexicon: {}", e);
                Lexicon::embedded()
            });
        JsonEngine::new(lexicon)
    })
}

fn error_json(message: &str) -> String {
    serde_json::to_string(&ErrorPayload::new(message))
        .unwrap_or_else(|_| r#"{"error":true,"message":"unserializable error"}"#.to_string())
}

fn respond(call: impl FnOnce() -> Result<String, NativeError>) -> *mut c_char {
    let json = match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(json)) => json,
        Ok(Err(e)) => error_json(&e.to_string()),
        Err(_) => error_json("native engine panicked"),
    };
    // serde_json escapes NUL, so this only fails on a broken serializer.
    CString::new(json)
        .map(CString::into_raw)
        .unwrap_or(ptr::null_mut())
}

/// # Safety
/// `arg` must be null or point to a NUL-terminated string valid for `'a`.
unsafe fn read_arg<'a>(arg: *const c_char) -> Result<&'a str, NativeError> {
    if arg.is_null() {
        return Err(NativeError::Encoding("null argument".to_string()));
    }
    Ok(CStr::from_ptr(arg).to_str()?)
}

#[no_mangle]
pub extern "C" fn negotiation_abi_version() -> u32 {
    NATIVE_ABI_VERSION
}

/// Replaces the process-wide lexicon and returns its fingerprint. An invalid lexicon leaves
/// the current tables in place and returns an error reply.
///
/// # Safety
/// `lexicon_json` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn negotiation_configure(lexicon_json: *const c_char) -> *mut c_char {
    respond(|| engine().invoke(NativeCall::Configure(read_arg(lexicon_json)?)))
}

/// # Safety
/// `text` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn analyze_negotiation_text(text: *const c_char) -> *mut c_char {
    respond(|| engine().invoke(NativeCall::Analyze(read_arg(text)?)))
}

/// # Safety
/// `text` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn detect_negotiation_patterns(text: *const c_char) -> *mut c_char {
    respond(|| engine().invoke(NativeCall::Detect(read_arg(text)?)))
}

/// # Safety
/// `exercise_id` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn start_exercise_timer(exercise_id: *const c_char) -> *mut c_char {
    respond(|| engine().invoke(NativeCall::StartTimer(read_arg(exercise_id)?)))
}

#[no_mangle]
pub extern "C" fn stop_exercise_timer() -> *mut c_char {
    respond(|| engine().invoke(NativeCall::StopTimer))
}

/// Null `exercise_id` returns the summaries of every known exercise.
///
/// # Safety
/// `exercise_id` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn get_performance_stats(exercise_id: *const c_char) -> *mut c_char {
    respond(|| {
        let exercise_id = if exercise_id.is_null() {
            None
        } else {
            Some(read_arg(exercise_id)?)
        };
        engine().invoke(NativeCall::PerformanceStats(exercise_id))
    })
}

/// # Safety
/// `s` must be null or a reply returned by this library, not yet freed.
#[no_mangle]
pub unsafe extern "C" fn negotiation_free_string(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn take(reply: *mut c_char) -> Value {
        assert!(!reply.is_null());
        let value = unsafe { serde_json::from_str(CStr::from_ptr(reply).to_str().unwrap()) };
        unsafe { negotiation_free_string(reply) };
        value.unwrap()
    }

    fn c(s: &str) -> CString {
        CString::new(s).unwrap()
    }

    #[test]
    fn test_abi_version() {
        assert_eq!(negotiation_abi_version(), NATIVE_ABI_VERSION);
    }

    #[test]
    fn test_analyze_and_detect() {
        let text = c("Esta é nossa oferta final, com prazo até amanhã.");

        let analysis = take(unsafe { analyze_negotiation_text(text.as_ptr()) });
        assert_eq!(analysis["word_count"], 9);

        let detection = take(unsafe { detect_negotiation_patterns(text.as_ptr()) });
        assert_eq!(detection["all_scores"].as_object().unwrap().len(), 10);
        assert_eq!(
            detection["detected_patterns"][0]["pattern_id"],
            "deadline_pressure"
        );
    }

    #[test]
    fn test_null_argument_is_an_error_reply() {
        let reply = take(unsafe { analyze_negotiation_text(ptr::null()) });
        assert_eq!(reply["error"], true);
    }

    #[test]
    fn test_invalid_utf8_is_an_error_reply() {
        let bytes = [0x66u8, 0xff, 0x00];
        let reply = take(unsafe { detect_negotiation_patterns(bytes.as_ptr().cast()) });
        assert_eq!(reply["error"], true);
    }

    #[test]
    fn test_timer_and_stats() {
        let id = c("ffi-exercise");

        let started = take(unsafe { start_exercise_timer(id.as_ptr()) });
        assert_eq!(started["status"], "started");
        assert_eq!(started["exercise_id"], "ffi-exercise");

        let stopped = take(stop_exercise_timer());
        assert_eq!(stopped["status"], "stopped");
        assert!(stopped["elapsed_seconds"].as_f64().unwrap() >= 0.0);

        let again = take(stop_exercise_timer());
        assert_eq!(again["message"], "Timer not started");

        let stats = take(unsafe { get_performance_stats(id.as_ptr()) });
        assert_eq!(stats["status"], "success");
        assert_eq!(stats["count"], 1);

        let all = take(unsafe { get_performance_stats(ptr::null()) });
        assert_eq!(all["ffi-exercise"]["count"], 1);
    }

    #[test]
    fn test_configure_echoes_fingerprint() {
        let lexicon = Lexicon::embedded();
        let json = c(&lexicon.to_json().unwrap());
        let reply = take(unsafe { negotiation_configure(json.as_ptr()) });
        assert_eq!(reply, serde_json::to_value(lexicon.fingerprint()).unwrap());

        let invalid = c("{\"version\": 1}");
        let reply = take(unsafe { negotiation_configure(invalid.as_ptr()) });
        assert_eq!(reply["error"], true);

        let reply = take(unsafe { negotiation_configure(ptr::null()) });
        assert_eq!(reply["error"], true);
    }

    #[test]
    fn test_free_null_is_a_no_op() {
        unsafe { negotiation_free_string(ptr::null_mut()) };
    }
}
