//! Negotiation text analysis: tone and style metrics, tactical pattern detection, exercise
//! timing and performance summaries, served by a native module when one is available.

pub mod bridge;
pub mod config;
pub mod engine;
pub mod error;

pub use bridge::{
    Backend, BackendStatus, DiagnosticsSnapshot, ErrorPayload, NegotiationBridge, Reply,
};
pub use config::EngineConfig;
pub use engine::{
    AnalysisResult, DetectionResult, PerformanceReport, PerformanceSummary, TimerMode,
    TimerStartResult, TimerStopResult,
};
pub use error::AppError;

#[cfg(test)]
mod tests;
