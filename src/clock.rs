// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Hybrid logical clock.
//!
//! Produces monotonic, globally unique [`Timestamp`]s even when replicas'
//! wall clocks disagree:
//!
//! - [`Clock::send`] stamps a local mutation.
//! - [`Clock::recv`] folds in a remote timestamp so that everything stamped
//!   afterwards sorts after it.
//!
//! The clock refuses to run more than `max_drift_ms` ahead of physical time,
//! and refuses remote timestamps that claim to be that far in the future.
//! Both are reported as [`ClockError::Drift`] and must reach the caller.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use ledger_sync::clock::{Clock, ManualTime};
//!
//! let time = Arc::new(ManualTime::new(1_700_000_000_000));
//! let mut clock = Clock::new("0123456789abcdef", time.clone());
//!
//! let a = clock.send().unwrap();
//! let b = clock.send().unwrap(); // same millisecond: counter bumps
//! assert!(a < b);
//! assert_eq!(b.counter(), 1);
//! ```

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::timestamp::{normalize_node, Timestamp, MAX_COUNTER, NODE_LEN};

/// Default bound on how far logical time may run ahead of physical time (5 minutes).
pub const DEFAULT_MAX_DRIFT_MS: i64 = 5 * 60 * 1000;

/// Clock integrity failures. Both abort the operation that hit them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClockError {
    #[error("clock drift detected: {drift_ms}ms ahead of physical time (max {max_drift_ms}ms)")]
    Drift { drift_ms: i64, max_drift_ms: i64 },

    #[error("timestamp counter overflow: {counter} exceeds {max}", max = MAX_COUNTER)]
    CounterOverflow { counter: u32 },
}

impl ClockError {
    /// Short label for metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Drift { .. } => "drift",
            Self::CounterOverflow { .. } => "counter_overflow",
        }
    }
}

/// Source of physical time in epoch milliseconds.
pub trait TimeSource: Send + Sync {
    fn now_millis(&self) -> i64;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTime;

impl TimeSource for SystemTime {
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Manually driven time, for simulations and tests.
#[derive(Debug, Default)]
pub struct ManualTime {
    millis: AtomicI64,
}

impl ManualTime {
    #[must_use]
    pub fn new(millis: i64) -> Self {
        Self {
            millis: AtomicI64::new(millis),
        }
    }

    pub fn set(&self, millis: i64) {
        self.millis.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: i64) {
        self.millis.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl TimeSource for ManualTime {
    fn now_millis(&self) -> i64 {
        self.millis.load(Ordering::SeqCst)
    }
}

/// Persistable clock state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockState {
    pub millis: i64,
    pub counter: u16,
    pub node: String,
}

impl ClockState {
    /// A state is usable only with a well-formed node id.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.millis >= 0
            && self.node.len() == NODE_LEN
            && self.node.bytes().all(|b| b.is_ascii_hexdigit())
    }
}

/// Mint a fresh 16-hex-char node id from a random UUID.
#[must_use]
pub fn make_node_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id[id.len() - NODE_LEN..].to_string()
}

fn checked_node(node: &str) -> String {
    let node = normalize_node(node);
    if !node.bytes().all(|b| b.is_ascii_hexdigit()) {
        warn!(%node, "Node id is not hex; persisted clock state will not reload");
    }
    node
}

/// A replica's hybrid logical clock.
pub struct Clock {
    millis: i64,
    counter: u16,
    node: String,
    max_drift_ms: i64,
    time: Arc<dyn TimeSource>,
}

impl fmt::Debug for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Clock")
            .field("millis", &self.millis)
            .field("counter", &self.counter)
            .field("node", &self.node)
            .field("max_drift_ms", &self.max_drift_ms)
            .finish_non_exhaustive()
    }
}

impl Clock {
    /// Fresh clock at `(0, 0)`.
    ///
    /// The node id is padded or truncated to 16 characters, the same way
    /// [`Timestamp::new`] does, so the persisted state matches the stamps.
    pub fn new(node: impl AsRef<str>, time: Arc<dyn TimeSource>) -> Self {
        Self {
            millis: 0,
            counter: 0,
            node: checked_node(node.as_ref()),
            max_drift_ms: DEFAULT_MAX_DRIFT_MS,
            time,
        }
    }

    /// Clock resumed from persisted state.
    pub fn with_state(state: ClockState, time: Arc<dyn TimeSource>) -> Self {
        Self {
            millis: state.millis,
            counter: state.counter,
            node: checked_node(&state.node),
            max_drift_ms: DEFAULT_MAX_DRIFT_MS,
            time,
        }
    }

    #[must_use]
    pub fn with_max_drift(mut self, max_drift_ms: i64) -> Self {
        self.max_drift_ms = max_drift_ms;
        self
    }

    #[must_use]
    pub fn node(&self) -> &str {
        &self.node
    }

    #[must_use]
    pub fn state(&self) -> ClockState {
        ClockState {
            millis: self.millis,
            counter: self.counter,
            node: self.node.clone(),
        }
    }

    /// The last timestamp this clock handed out (or was restored to).
    #[must_use]
    pub fn current(&self) -> Timestamp {
        Timestamp::new(self.millis, self.counter, &self.node)
    }

    /// Stamp a local event.
    pub fn send(&mut self) -> Result<Timestamp, ClockError> {
        let phys = self.time.now_millis();

        let l_new = self.millis.max(phys);
        let counter = if l_new == self.millis {
            u32::from(self.counter) + 1
        } else {
            0
        };

        self.commit(l_new, counter, phys)
    }

    /// Merge a remote timestamp into this clock.
    pub fn recv(&mut self, remote: &Timestamp) -> Result<Timestamp, ClockError> {
        let phys = self.time.now_millis();

        let remote_drift = remote.millis().saturating_sub(phys);
        if remote_drift > self.max_drift_ms {
            warn!(
                remote = %remote,
                drift_ms = remote_drift,
                max_drift_ms = self.max_drift_ms,
                "Rejecting remote timestamp from the future"
            );
            return Err(ClockError::Drift {
                drift_ms: remote_drift,
                max_drift_ms: self.max_drift_ms,
            });
        }

        let l_old = self.millis;
        let l_remote = remote.millis();
        let l_new = l_old.max(phys).max(l_remote);

        let counter = if l_new == l_old && l_new == l_remote {
            u32::from(self.counter.max(remote.counter())) + 1
        } else if l_new == l_old {
            u32::from(self.counter) + 1
        } else if l_new == l_remote {
            u32::from(remote.counter()) + 1
        } else {
            0
        };

        self.commit(l_new, counter, phys)
    }

    fn commit(&mut self, l_new: i64, counter: u32, phys: i64) -> Result<Timestamp, ClockError> {
        let drift = l_new.saturating_sub(phys);
        if drift > self.max_drift_ms {
            warn!(drift_ms = drift, max_drift_ms = self.max_drift_ms, "Clock drift exceeded");
            return Err(ClockError::Drift {
                drift_ms: drift,
                max_drift_ms: self.max_drift_ms,
            });
        }

        let Ok(counter) = u16::try_from(counter) else {
            warn!(counter, millis = l_new, "Timestamp counter overflow");
            return Err(ClockError::CounterOverflow { counter });
        };

        self.millis = l_new;
        self.counter = counter;
        Ok(Timestamp::new(l_new, counter, &self.node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000_000;
    const NODE: &str = "0123456789abcdef";

    fn clock_at(millis: i64) -> (Clock, Arc<ManualTime>) {
        let time = Arc::new(ManualTime::new(millis));
        (Clock::new(NODE, time.clone()), time)
    }

    #[test]
    fn test_send_is_strictly_monotonic() {
        let (mut clock, time) = clock_at(NOW);

        let mut prev = clock.send().unwrap();
        for i in 0..100 {
            if i % 10 == 0 {
                time.advance(1);
            }
            let next = clock.send().unwrap();
            assert!(prev < next, "{prev} should sort before {next}");
            prev = next;
        }
    }

    #[test]
    fn test_send_resets_counter_when_time_advances() {
        let (mut clock, time) = clock_at(NOW);

        clock.send().unwrap();
        let second = clock.send().unwrap();
        assert_eq!(second.counter(), 1);

        time.advance(5);
        let third = clock.send().unwrap();
        assert_eq!(third.millis(), NOW + 5);
        assert_eq!(third.counter(), 0);
    }

    #[test]
    fn test_send_when_physical_time_goes_backwards() {
        let (mut clock, time) = clock_at(NOW);

        let first = clock.send().unwrap();
        time.set(NOW - 1000);
        let second = clock.send().unwrap();

        assert_eq!(second.millis(), first.millis());
        assert_eq!(second.counter(), first.counter() + 1);
    }

    #[test]
    fn test_send_counter_overflow() {
        let time = Arc::new(ManualTime::new(NOW));
        let state = ClockState {
            millis: NOW,
            counter: u16::MAX,
            node: NODE.to_string(),
        };
        let mut clock = Clock::with_state(state.clone(), time);

        let err = clock.send().unwrap_err();
        assert_eq!(err, ClockError::CounterOverflow { counter: 0x1_0000 });
        // A failed send must not mutate the clock
        assert_eq!(clock.state(), state);
    }

    #[test]
    fn test_send_drift() {
        let time = Arc::new(ManualTime::new(NOW));
        let state = ClockState {
            millis: NOW + DEFAULT_MAX_DRIFT_MS + 1,
            counter: 0,
            node: NODE.to_string(),
        };
        let mut clock = Clock::with_state(state, time);

        let err = clock.send().unwrap_err();
        assert!(matches!(err, ClockError::Drift { .. }));
        assert_eq!(err.kind(), "drift");
    }

    #[test]
    fn test_recv_remote_ahead() {
        let (mut clock, _time) = clock_at(NOW);
        clock.send().unwrap();

        let remote = Timestamp::new(NOW + 100, 7, "ffffffffffffffff");
        let merged = clock.recv(&remote).unwrap();

        assert_eq!(merged.millis(), NOW + 100);
        assert_eq!(merged.counter(), 8);
        assert_eq!(merged.node(), NODE);
        assert!(merged > remote);
    }

    #[test]
    fn test_recv_ties_both() {
        let (mut clock, time) = clock_at(NOW);
        clock.send().unwrap();
        clock.send().unwrap(); // local counter = 1
        time.set(NOW - 10);

        let remote = Timestamp::new(NOW, 5, "ffffffffffffffff");
        let merged = clock.recv(&remote).unwrap();

        assert_eq!(merged.millis(), NOW);
        assert_eq!(merged.counter(), 6);
    }

    #[test]
    fn test_recv_ties_local_only() {
        let (mut clock, time) = clock_at(NOW);
        clock.send().unwrap();
        clock.send().unwrap(); // local counter = 1
        time.set(NOW - 10);

        let remote = Timestamp::new(NOW - 50, 9, "ffffffffffffffff");
        let merged = clock.recv(&remote).unwrap();

        assert_eq!(merged.millis(), NOW);
        assert_eq!(merged.counter(), 2);
    }

    #[test]
    fn test_recv_physical_time_wins() {
        let (mut clock, time) = clock_at(NOW);
        clock.send().unwrap();
        time.set(NOW + 1000);

        let remote = Timestamp::new(NOW + 10, 3, "ffffffffffffffff");
        let merged = clock.recv(&remote).unwrap();

        assert_eq!(merged.millis(), NOW + 1000);
        assert_eq!(merged.counter(), 0);
    }

    #[test]
    fn test_recv_rejects_future_remote() {
        let (mut clock, _time) = clock_at(NOW);
        let before = clock.state();

        let remote = Timestamp::new(NOW + DEFAULT_MAX_DRIFT_MS + 1, 0, "ffffffffffffffff");
        let err = clock.recv(&remote).unwrap_err();

        assert!(matches!(err, ClockError::Drift { drift_ms, .. } if drift_ms == DEFAULT_MAX_DRIFT_MS + 1));
        assert_eq!(clock.state(), before);
    }

    #[test]
    fn test_recv_within_drift_is_accepted() {
        let (mut clock, _time) = clock_at(NOW);
        let remote = Timestamp::new(NOW + DEFAULT_MAX_DRIFT_MS, 0, "ffffffffffffffff");
        assert!(clock.recv(&remote).is_ok());
    }

    #[test]
    fn test_custom_drift_bound() {
        let time = Arc::new(ManualTime::new(NOW));
        let mut clock = Clock::new(NODE, time).with_max_drift(10);

        let remote = Timestamp::new(NOW + 11, 0, "ffffffffffffffff");
        assert!(clock.recv(&remote).is_err());
    }

    #[test]
    fn test_make_node_id() {
        let a = make_node_id();
        let b = make_node_id();

        assert_eq!(a.len(), NODE_LEN);
        assert!(a.bytes().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_clock_state_validation() {
        let good = ClockState { millis: 0, counter: 0, node: make_node_id() };
        assert!(good.is_valid());

        let bad = ClockState { millis: 0, counter: 0, node: "nope".to_string() };
        assert!(!bad.is_valid());
    }

    #[test]
    fn test_short_node_is_padded_and_survives_restore() {
        let time = Arc::new(ManualTime::new(1_700_000_000_000));
        let mut clock = Clock::new("abc", time.clone());
        assert_eq!(clock.node(), "0000000000000abc");

        let ts = clock.send().unwrap();
        assert_eq!(ts.node(), clock.node());

        let state = clock.state();
        assert!(state.is_valid());
        let restored = Clock::with_state(state.clone(), time);
        assert_eq!(restored.state(), state);
    }

    #[test]
    fn test_long_node_keeps_last_sixteen() {
        let time = Arc::new(ManualTime::new(0));
        let clock = Clock::new("ffff0123456789abcdef", time);
        assert_eq!(clock.node(), "0123456789abcdef");
        assert_eq!(clock.current().node(), clock.node());
    }
}
