//! Native backend seam.
//!
//! [`NativeBackend`] is the contract the bridge calls through; [`LibraryBackend`] is the
//! production implementation that binds the C ABI exported by the `negotiation_processor`
//! shared library. Tests substitute their own backends.

use libloading::Library;
use std::ffi::{c_char, CStr, CString, NulError};
use std::path::{Path, PathBuf};
use std::ptr;
use std::str::Utf8Error;
use thiserror::Error;

/// ABI revision the bridge expects from `negotiation_abi_version()`.
pub const NATIVE_ABI_VERSION: u32 = 2;

pub mod symbols {
    pub const ABI_VERSION: &[u8] = b"negotiation_abi_version\0";
    pub const CONFIGURE: &[u8] = b"negotiation_configure\0";
    pub const ANALYZE: &[u8] = b"analyze_negotiation_text\0";
    pub const DETECT: &[u8] = b"detect_negotiation_patterns\0";
    pub const START_TIMER: &[u8] = b"start_exercise_timer\0";
    pub const STOP_TIMER: &[u8] = b"stop_exercise_timer\0";
    pub const PERFORMANCE_STATS: &[u8] = b"get_performance_stats\0";
    pub const FREE_STRING: &[u8] = b"negotiation_free_string\0";
}

/// Everything that can go wrong loading or calling the native module.
#[derive(Debug, Error)]
pub enum NativeError {
    #[error("failed to load native module: {0}")]
    Load(#[from] libloading::Error),

    #[error("native ABI version mismatch: expected {expected}, found {found}")]
    AbiMismatch { expected: u32, found: u32 },

    #[error("argument cannot cross the native boundary: {0}")]
    Encoding(String),

    #[error("native call returned a null reply")]
    NullReply,

    #[error("native reply is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] Utf8Error),

    #[error("malformed native reply: {0}")]
    Malformed(String),

    #[error("native module reported an error: {0}")]
    ErrorReply(String),

    #[error("native call panicked")]
    Panicked,
}

impl From<NulError> for NativeError {
    fn from(err: NulError) -> Self {
        NativeError::Encoding(format!("interior NUL byte at offset {}", err.nul_position()))
    }
}

impl From<serde_json::Error> for NativeError {
    fn from(err: serde_json::Error) -> Self {
        NativeError::Malformed(err.to_string())
    }
}

/// One operation of the native contract with its arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeCall<'a> {
    /// Replaces the module's lexicon with the given lexicon JSON.
    Configure(&'a str),
    Analyze(&'a str),
    Detect(&'a str),
    StartTimer(&'a str),
    StopTimer,
    PerformanceStats(Option<&'a str>),
}

impl NativeCall<'_> {
    /// Operation name used in logs and diagnostics.
    pub fn operation(&self) -> &'static str {
        match self {
            NativeCall::Configure(_) => "configure",
            NativeCall::Analyze(_) => "analyze",
            NativeCall::Detect(_) => "detect",
            NativeCall::StartTimer(_) => "start_timer",
            NativeCall::StopTimer => "stop_timer",
            NativeCall::PerformanceStats(_) => "performance_stats",
        }
    }
}

/// A backend that answers [`NativeCall`]s with raw JSON text.
pub trait NativeBackend: Send + Sync {
    fn invoke(&self, call: NativeCall<'_>) -> Result<String, NativeError>;

    /// Human-readable origin, e.g. the library path.
    fn describe(&self) -> String;
}

type VersionFn = unsafe extern "C" fn() -> u32;
type TextFn = unsafe extern "C" fn(*const c_char) -> *mut c_char;
type NoArgFn = unsafe extern "C" fn() -> *mut c_char;
type FreeFn = unsafe extern "C" fn(*mut c_char);

/// The native module loaded from a shared library.
pub struct LibraryBackend {
    path: PathBuf,
    configure: TextFn,
    analyze: TextFn,
    detect: TextFn,
    start_timer: TextFn,
    stop_timer: NoArgFn,
    performance_stats: TextFn,
    free_string: FreeFn,
    // Keeps the code behind the function pointers mapped.
    _library: Library,
}

impl LibraryBackend {
    /// Opens the library, checks its ABI version and resolves every entry point.
    pub fn load(path: &Path) -> Result<Self, NativeError> {
        // SAFETY: loading runs the module's initializers; the module is built from this
        // workspace and has none beyond Rust statics.
        let library = unsafe { Library::new(path)? };

        // SAFETY: the symbol types below match the exported `extern "C"` signatures of
        // ABI version 2; the version check runs before any other symbol is used.
        unsafe {
            let version = *library.get::<VersionFn>(symbols::ABI_VERSION)?;
            let found = version();
            if found != NATIVE_ABI_VERSION {
                return Err(NativeError::AbiMismatch {
                    expected: NATIVE_ABI_VERSION,
                    found,
                });
            }

            let configure = *library.get::<TextFn>(symbols::CONFIGURE)?;
            let analyze = *library.get::<TextFn>(symbols::ANALYZE)?;
            let detect = *library.get::<TextFn>(symbols::DETECT)?;
            let start_timer = *library.get::<TextFn>(symbols::START_TIMER)?;
            let stop_timer = *library.get::<NoArgFn>(symbols::STOP_TIMER)?;
            let performance_stats = *library.get::<TextFn>(symbols::PERFORMANCE_STATS)?;
            let free_string = *library.get::<FreeFn>(symbols::FREE_STRING)?;

            Ok(Self {
                path: path.to_path_buf(),
                configure,
                analyze,
                detect,
                start_timer,
                stop_timer,
                performance_stats,
                free_string,
                _library: library,
            })
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn call_with_text(&self, f: TextFn, arg: &str) -> Result<String, NativeError> {
        let arg = CString::new(arg)?;
        // SAFETY: `arg` is a valid NUL-terminated string that outlives the call.
        let reply = unsafe { f(arg.as_ptr()) };
        self.take_reply(reply)
    }

    fn take_reply(&self, reply: *mut c_char) -> Result<String, NativeError> {
        if reply.is_null() {
            return Err(NativeError::NullReply);
        }
        // SAFETY: non-null replies are NUL-terminated buffers owned by the module until
        // handed back to `negotiation_free_string`, which happens exactly once below.
        let decoded = unsafe { CStr::from_ptr(reply) }
            .to_str()
            .map(str::to_owned);
        unsafe { (self.free_string)(reply) };
        Ok(decoded?)
    }
}

impl NativeBackend for LibraryBackend {
    fn invoke(&self, call: NativeCall<'_>) -> Result<String, NativeError> {
        match call {
            NativeCall::Configure(lexicon) => self.call_with_text(self.configure, lexicon),
            NativeCall::Analyze(text) => self.call_with_text(self.analyze, text),
            NativeCall::Detect(text) => self.call_with_text(self.detect, text),
            NativeCall::StartTimer(exercise_id) => {
                self.call_with_text(self.start_timer, exercise_id)
            }
            NativeCall::StopTimer => {
                // SAFETY: takes no arguments.
                let reply = unsafe { (self.stop_timer)() };
                self.take_reply(reply)
            }
            NativeCall::PerformanceStats(Some(exercise_id)) => {
                self.call_with_text(self.performance_stats, exercise_id)
            }
            NativeCall::PerformanceStats(None) => {
                // SAFETY: a null argument means "all exercises" in the ABI.
                let reply = unsafe { (self.performance_stats)(ptr::null()) };
                self.take_reply(reply)
            }
        }
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}
