// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the sync engine.
//!
//! # Example
//!
//! ```
//! use ledger_sync::SyncConfig;
//!
//! // Minimal config (uses defaults)
//! let config = SyncConfig::default();
//! assert_eq!(config.max_clock_drift_ms, 5 * 60 * 1000);
//!
//! // Keep more trie history, never give up after a few rounds
//! let config = SyncConfig {
//!     prune_keep: 3,
//!     max_sync_rounds: 50,
//!     ..Default::default()
//! };
//! assert!(config.prune_after_sync);
//! ```

use serde::Deserialize;

use crate::clock::DEFAULT_MAX_DRIFT_MS;
use crate::merkle::DEFAULT_PRUNE_KEEP;

/// Configuration for the sync engine.
///
/// All fields have defaults, so an empty JSON object is a valid config.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SyncConfig {
    /// Largest accepted lead of a logical timestamp over physical time.
    #[serde(default = "default_max_clock_drift_ms")]
    pub max_clock_drift_ms: i64,

    /// Children kept per trie level when pruning.
    #[serde(default = "default_prune_keep")]
    pub prune_keep: usize,

    /// Prune the local trie after every processed response.
    #[serde(default = "default_prune_after_sync")]
    pub prune_after_sync: bool,

    /// Upper bound on request/response rounds in one `sync()` call.
    #[serde(default = "default_max_sync_rounds")]
    pub max_sync_rounds: usize,

    /// Encryption key id forwarded in sync requests.
    #[serde(default)]
    pub key_id: Option<String>,
}

fn default_max_clock_drift_ms() -> i64 { DEFAULT_MAX_DRIFT_MS }
fn default_prune_keep() -> usize { DEFAULT_PRUNE_KEEP }
fn default_prune_after_sync() -> bool { true }
fn default_max_sync_rounds() -> usize { 10 }

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_clock_drift_ms: default_max_clock_drift_ms(),
            prune_keep: default_prune_keep(),
            prune_after_sync: default_prune_after_sync(),
            max_sync_rounds: default_max_sync_rounds(),
            key_id: None,
        }
    }
}
