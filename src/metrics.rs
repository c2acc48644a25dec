// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for ledger-sync.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host application is responsible for choosing the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `ledger_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `reason`: why an incoming message was skipped
//! - `kind`: clock error kind
//! - `outcome`: sync round result

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record locally created changes
pub fn record_changes_created(count: usize) {
    counter!("ledger_sync_changes_created_total").increment(count as u64);
}

/// Record remote messages applied to local state
pub fn record_messages_applied(count: usize) {
    counter!("ledger_sync_messages_applied_total").increment(count as u64);
}

/// Record a remote message that was already in the log
pub fn record_message_duplicate() {
    counter!("ledger_sync_messages_duplicate_total").increment(1);
}

/// Record a remote message that could not be applied
pub fn record_message_skipped(reason: &str) {
    counter!(
        "ledger_sync_messages_skipped_total",
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Record a clock send/recv rejection
pub fn record_clock_error(kind: &str) {
    counter!(
        "ledger_sync_clock_errors_total",
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// Set pending queue length
pub fn set_pending_messages(count: usize) {
    gauge!("ledger_sync_pending_messages").set(count as f64);
}

/// Set local trie node count
pub fn set_trie_nodes(count: usize) {
    gauge!("ledger_sync_trie_nodes").set(count as f64);
}

/// Record one request/response round
pub fn record_sync_round(outcome: &str, duration: Duration) {
    counter!(
        "ledger_sync_rounds_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
    histogram!(
        "ledger_sync_round_seconds",
        "outcome" => outcome.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record outgoing request size
pub fn record_request_messages(count: usize) {
    histogram!("ledger_sync_request_messages").record(count as f64);
}

/// A timing guard that records a sync round on drop.
///
/// The outcome defaults to `"error"` until [`RoundTimer::succeed`] is called,
/// so early returns via `?` are counted as failures.
pub struct RoundTimer {
    outcome: &'static str,
    start: Instant,
}

impl RoundTimer {
    /// Start a new round timer
    #[must_use]
    pub fn start() -> Self {
        Self {
            outcome: "error",
            start: Instant::now(),
        }
    }

    /// Mark the round as successful
    pub fn succeed(&mut self) {
        self.outcome = "success";
    }
}

impl Drop for RoundTimer {
    fn drop(&mut self) {
        record_sync_round(self.outcome, self.start.elapsed());
    }
}
