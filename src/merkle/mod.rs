// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Time-bucketed Merkle trie for divergence detection.
//!
//! # Design
//!
//! Every timestamp lands in a one-minute bucket. The bucket number
//! (`millis / 60000`) written in base 3 is the timestamp's path:
//!
//! ```text
//! minute 28333333  →  "1221022020212121"
//!
//! root ──────────────── hash = h(ts1) ^ h(ts2) ^ h(ts3)
//! └── 1 ────────────── hash = h(ts1) ^ h(ts2) ^ h(ts3)
//!     └── 2 ────────── ...
//!         ├── 0 ────── hash = h(ts1)
//!         └── 2 ────── hash = h(ts2) ^ h(ts3)
//! ```
//!
//! A node's hash is the XOR of the hashes of every timestamp inserted under
//! it, so inserts are order-independent and never need to re-read history.
//!
//! # Sync Protocol
//!
//! 1. Client compares its root hash with the server's last-known trie
//! 2. If different, walk both tries digit by digit, always taking the
//!    earliest child whose hashes disagree
//! 3. The path where the walk stops is the earliest diverging minute
//! 4. Ask the server to resend everything from that minute on
//!
//! This is O(depth) instead of O(history): a cheap watermark, not a
//! record-level diff.
//!
//! # Pruning
//!
//! [`MerkleTrie::prune`] keeps only the newest branches at every level.
//! Retained hashes are not recomputed, so the root hash still summarizes
//! the full history while old detail is dropped from storage.

mod trie;

pub use trie::{key_for_millis, millis_for_key, MerkleTrie, DEFAULT_PRUNE_KEEP, KEY_DIGITS};
