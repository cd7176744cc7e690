//! # Dual-Execution Bridge
//!
//! Public face of the crate. [`NegotiationBridge`] prefers the native
//! `negotiation_processor` module and answers from the in-process engine whenever the
//! module is missing or a call fails.
//!
//! ## Components
//! - `processor`: the bridge itself and its per-call fallback policy
//! - `native`: the backend trait and the shared-library loader
//! - `json_engine`: the JSON contract served by the native module
//! - `reply`: reply envelope, error payload and native reply validation
//! - `diagnostics`: backend status and call counters

pub mod diagnostics;
pub mod json_engine;
pub mod native;
pub mod processor;
pub mod reply;

pub use diagnostics::{Backend, BackendStatus, DiagnosticsSnapshot};
pub use json_engine::JsonEngine;
pub use native::{LibraryBackend, NativeBackend, NativeCall, NativeError, NATIVE_ABI_VERSION};
pub use processor::NegotiationBridge;
pub use reply::{ErrorPayload, Reply};
