//! Engine configuration.
//!
//! Values come from the process environment (a `.env` file is honored when present).
//! Every field has a working default, so an empty environment yields a usable config.

use crate::engine::timer::TimerMode;
use crate::error::AppError;
use dotenv::dotenv;
use std::env;
use std::path::PathBuf;
use tracing::warn;
use validator::Validate;

/// Base name of the native module; the platform prefix and suffix are added at load time.
pub const NATIVE_LIBRARY_NAME: &str = "negotiation_processor";

/// Runtime configuration for a [`crate::NegotiationBridge`].
#[derive(Debug, Clone, Validate)]
pub struct EngineConfig {
    /// Explicit location of the native module. `None` means the default location.
    pub native_library: Option<PathBuf>,
    /// When false the bridge starts degraded without touching the filesystem.
    pub native_enabled: bool,
    /// Lexicon override; the embedded lexicon is used when `None`.
    pub lexicon_path: Option<PathBuf>,
    /// Behavior of `start_timer` while a session is already open.
    pub timer_mode: TimerMode,
    /// Upper bound on exercise identifier length, in characters.
    #[validate(range(min = 1, max = 1024))]
    pub max_exercise_id_len: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            native_library: None,
            native_enabled: true,
            lexicon_path: None,
            timer_mode: TimerMode::Overwrite,
            max_exercise_id_len: 128,
        }
    }
}

impl EngineConfig {
    /// Builds the configuration from `NEGOTIATION_*` environment variables.
    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();

        let mut config = Self::default();

        if let Some(path) = non_empty_var("NEGOTIATION_NATIVE_LIB") {
            config.native_library = Some(PathBuf::from(path));
        }
        if let Some(flag) = non_empty_var("NEGOTIATION_DISABLE_NATIVE") {
            config.native_enabled = !parse_flag(&flag)?;
        }
        if let Some(path) = non_empty_var("NEGOTIATION_LEXICON_PATH") {
            config.lexicon_path = Some(PathBuf::from(path));
        }
        if let Some(mode) = non_empty_var("NEGOTIATION_TIMER_MODE") {
            config.timer_mode = mode.parse()?;
        }
        if let Some(len) = non_empty_var("NEGOTIATION_MAX_EXERCISE_ID_LEN") {
            config.max_exercise_id_len = len.trim().parse()?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Config that never attempts to load the native module.
    pub fn fallback_only() -> Self {
        Self {
            native_enabled: false,
            ..Self::default()
        }
    }

    /// Where the native module is expected to live.
    pub fn native_library_path(&self) -> PathBuf {
        self.native_library
            .clone()
            .unwrap_or_else(default_native_library_path)
    }
}

/// `<executable dir>/lib/<platform library file name>`.
pub fn default_native_library_path() -> PathBuf {
    let base = match env::current_exe() {
        Ok(mut path) => {
            path.pop();
            path
        }
        Err(e) => {
            warn!(
                "Failed to get current exe path: {}. Falling back to current_dir.",
                e
            );
            env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
        }
    };
    base.join("lib")
        .join(libloading::library_filename(NATIVE_LIBRARY_NAME))
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_flag(value: &str) -> Result<bool, AppError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(AppError::Config(format!("Invalid boolean flag: {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEYS: [&str; 5] = [
        "NEGOTIATION_NATIVE_LIB",
        "NEGOTIATION_DISABLE_NATIVE",
        "NEGOTIATION_LEXICON_PATH",
        "NEGOTIATION_TIMER_MODE",
        "NEGOTIATION_MAX_EXERCISE_ID_LEN",
    ];

    #[test]
    fn test_defaults_from_empty_env() {
        temp_env::with_vars_unset(KEYS, || {
            let config = EngineConfig::from_env().unwrap();
            assert!(config.native_enabled);
            assert!(config.native_library.is_none());
            assert_eq!(config.timer_mode, TimerMode::Overwrite);
            assert_eq!(config.max_exercise_id_len, 128);
        });
    }

    #[test]
    fn test_env_overrides() {
        temp_env::with_vars(
            [
                ("NEGOTIATION_NATIVE_LIB", Some("/opt/neg/libnegotiation_processor.so")),
                ("NEGOTIATION_DISABLE_NATIVE", Some("yes")),
                ("NEGOTIATION_LEXICON_PATH", None),
                ("NEGOTIATION_TIMER_MODE", Some("reject")),
                ("NEGOTIATION_MAX_EXERCISE_ID_LEN", Some("64")),
            ],
            || {
                let config = EngineConfig::from_env().unwrap();
                assert!(!config.native_enabled);
                assert_eq!(
                    config.native_library_path(),
                    PathBuf::from("/opt/neg/libnegotiation_processor.so")
                );
                assert_eq!(config.timer_mode, TimerMode::Reject);
                assert_eq!(config.max_exercise_id_len, 64);
            },
        );
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        temp_env::with_vars(
            [
                ("NEGOTIATION_DISABLE_NATIVE", Some("maybe")),
                ("NEGOTIATION_TIMER_MODE", None),
                ("NEGOTIATION_MAX_EXERCISE_ID_LEN", None),
            ],
            || assert!(matches!(EngineConfig::from_env(), Err(AppError::Config(_)))),
        );

        temp_env::with_vars(
            [
                ("NEGOTIATION_DISABLE_NATIVE", None),
                ("NEGOTIATION_MAX_EXERCISE_ID_LEN", Some("0")),
            ],
            || {
                assert!(matches!(
                    EngineConfig::from_env(),
                    Err(AppError::Validation(_))
                ))
            },
        );
    }

    #[test]
    fn test_default_library_path_uses_platform_name() {
        let path = default_native_library_path();
        let file_name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(file_name.contains(NATIVE_LIBRARY_NAME));
        assert!(file_name.ends_with(std::env::consts::DLL_SUFFIX));
    }
}
