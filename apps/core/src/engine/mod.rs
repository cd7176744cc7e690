//! # Analysis Engine
//!
//! In-process implementation of the negotiation analysis contract. The bridge uses it as
//! the fallback backend and the native module wraps it behind a C ABI.
//!
//! ## Components
//! - `lexicon`: marker tables and the tactical pattern catalogue
//! - `metrics`: tone/style text metrics
//! - `patterns`: tactical pattern detection and counter-tactic suggestions
//! - `timer`: single-session exercise timer
//! - `performance`: summary statistics over recorded values

pub mod lexicon;
pub mod metrics;
pub mod patterns;
pub mod performance;
pub mod timer;

pub use lexicon::{Category, Lexicon, LexiconFingerprint, PatternDefinition};
pub use metrics::{AnalysisResult, TextAnalyzer, TextMetrics};
pub use patterns::{DetectedPattern, DetectionResult, PatternDetector, ResponseSuggestions};
pub use performance::{
    summarize, PerformanceHistory, PerformanceRecord, PerformanceReport, PerformanceSummary,
    SummaryStats,
};
pub use timer::{ExerciseTimer, TimerError, TimerMode, TimerStartResult, TimerStatus, TimerStopResult};
