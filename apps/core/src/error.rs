use std::io;
use thiserror::Error;

/// Crate-wide error type for everything outside the bridge's per-call path.
///
/// Bridge operations never surface these to callers; they are used while building
/// configuration and lexicons, and by the history persistence helpers.
#[derive(Debug, Error)]
pub enum AppError {
    /// Represents standard input/output errors.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Represents data validation errors (e.g., invalid input format).
    #[error("Validation error: {0}")]
    Validation(String),

    /// Represents configuration-related errors (e.g., malformed environment variables).
    #[error("Configuration error: {0}")]
    Config(String),

    /// A lexicon file was readable but its content is unusable.
    #[error("Lexicon error: {0}")]
    Lexicon(String),

    /// Represents unexpected internal errors that indicate a bug.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Clone for AppError {
    fn clone(&self) -> Self {
        match self {
            AppError::Io(e) => AppError::Io(io::Error::new(e.kind(), e.to_string())),
            AppError::Validation(s) => AppError::Validation(s.clone()),
            AppError::Config(s) => AppError::Config(s.clone()),
            AppError::Lexicon(s) => AppError::Lexicon(s.clone()),
            AppError::Internal(s) => AppError::Internal(s.clone()),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Validation(format!("JSON error: {}", err))
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(format!("Validation errors: {}", err))
    }
}

impl From<std::num::ParseIntError> for AppError {
    fn from(err: std::num::ParseIntError) -> Self {
        AppError::Config(format!("Integer parse error: {}", err))
    }
}
