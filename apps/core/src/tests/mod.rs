//! Test Module
//!
//! Scenario suites for the negotiation engine and its dual-execution bridge.
//!
//! ## Test Categories
//! - `engine_tests`: end-to-end analysis scenarios on the in-process engine
//! - `bridge_tests`: backend selection, fallback on every native failure kind, timer
//!   ownership and performance history
//! - `chaos_test`: concurrent callers against healthy and flaky native backends
