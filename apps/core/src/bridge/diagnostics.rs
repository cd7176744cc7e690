//! Backend selection bookkeeping.
//!
//! Callers get plain results; which backend produced them is only visible here and in
//! `debug!` events.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    Native,
    Fallback,
}

/// Outcome of the bridge's initialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum BackendStatus {
    /// Native module available; `source` identifies where it came from.
    Native { source: String },
    /// Every call is served in-process.
    Degraded { reason: String },
}

impl BackendStatus {
    pub fn is_degraded(&self) -> bool {
        matches!(self, BackendStatus::Degraded { .. })
    }
}

/// A value tagged with the backend that produced it.
#[derive(Debug)]
pub(crate) enum Served<T> {
    Native(T),
    Fallback(T),
}

impl<T> Served<T> {
    pub(crate) fn backend(&self) -> Backend {
        match self {
            Served::Native(_) => Backend::Native,
            Served::Fallback(_) => Backend::Fallback,
        }
    }

    pub(crate) fn into_inner(self) -> T {
        match self {
            Served::Native(value) | Served::Fallback(value) => value,
        }
    }
}

const LAST_NATIVE: u8 = 1;
const LAST_FALLBACK: u8 = 2;

#[derive(Debug, Default)]
pub(crate) struct CallCounters {
    native_calls: AtomicU64,
    fallback_calls: AtomicU64,
    native_failures: AtomicU64,
    last_backend: AtomicU8,
}

impl CallCounters {
    pub(crate) fn served(&self, backend: Backend) {
        let (counter, tag) = match backend {
            Backend::Native => (&self.native_calls, LAST_NATIVE),
            Backend::Fallback => (&self.fallback_calls, LAST_FALLBACK),
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.last_backend.store(tag, Ordering::Relaxed);
    }

    pub(crate) fn native_failed(&self) {
        self.native_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, status: &BackendStatus) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            status: status.clone(),
            native_calls: self.native_calls.load(Ordering::Relaxed),
            fallback_calls: self.fallback_calls.load(Ordering::Relaxed),
            native_failures: self.native_failures.load(Ordering::Relaxed),
            last_backend: match self.last_backend.load(Ordering::Relaxed) {
                LAST_NATIVE => Some(Backend::Native),
                LAST_FALLBACK => Some(Backend::Fallback),
                _ => None,
            },
        }
    }
}

/// Point-in-time view of a bridge's backend usage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticsSnapshot {
    pub status: BackendStatus,
    /// Operations answered by the native module.
    pub native_calls: u64,
    /// Operations answered in-process, including retries after a native failure.
    pub fallback_calls: u64,
    /// Native attempts that failed and were retried in-process.
    pub native_failures: u64,
    pub last_backend: Option<Backend>,
}
