// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Hybrid logical clock timestamps.
//!
//! A [`Timestamp`] is `(millis, counter, node)`, totally ordered in that
//! order. Its canonical string form is fixed-width:
//!
//! ```text
//! 2024-03-01T12:00:00.000Z-002A-0123456789ABCDEF
//! └──── ISO-8601 millis ──┘ └ctr┘ └──── node ────┘
//! ```
//!
//! Because every component is fixed-width, canonical strings sort
//! lexicographically in the same order as the timestamps themselves.
//! Message logs key records by this string and rely on that property.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::hash::hash_str;

/// Width of the node component in the canonical string.
pub const NODE_LEN: usize = 16;

/// Node id used by watermark timestamps.
pub const ZERO_NODE: &str = "0000000000000000";

/// Largest counter value a timestamp can carry.
pub const MAX_COUNTER: u32 = 0xFFFF;

/// An immutable hybrid logical clock timestamp.
///
/// # Example
///
/// ```
/// use ledger_sync::Timestamp;
///
/// let ts = Timestamp::new(1_709_294_400_000, 42, "0123456789abcdef");
/// assert_eq!(ts.to_string(), "2024-03-01T12:00:00.000Z-002A-0123456789abcdef");
/// assert_eq!(Timestamp::parse(&ts.to_string()), Some(ts));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp {
    millis: i64,
    counter: u16,
    node: String,
}

impl Timestamp {
    /// Build a timestamp. The node is left-padded with `0` or truncated to
    /// its last 16 characters so that ordering matches the string form.
    pub fn new(millis: i64, counter: u16, node: impl AsRef<str>) -> Self {
        Self {
            millis,
            counter,
            node: normalize_node(node.as_ref()),
        }
    }

    /// The zero watermark: `1970-01-01T00:00:00.000Z-0000-0000000000000000`.
    #[must_use]
    pub fn epoch() -> Self {
        Self::since_millis(0)
    }

    /// A zero-counter, zero-node watermark at `millis`.
    #[must_use]
    pub fn since_millis(millis: i64) -> Self {
        Self {
            millis,
            counter: 0,
            node: ZERO_NODE.to_string(),
        }
    }

    #[inline]
    #[must_use]
    pub fn millis(&self) -> i64 {
        self.millis
    }

    #[inline]
    #[must_use]
    pub fn counter(&self) -> u16 {
        self.counter
    }

    #[inline]
    #[must_use]
    pub fn node(&self) -> &str {
        &self.node
    }

    /// Fingerprint used by the Merkle trie: murmur3 of the canonical string.
    #[must_use]
    pub fn hash(&self) -> u32 {
        hash_str(&self.to_string())
    }

    /// Parse a canonical timestamp string.
    ///
    /// Returns `None` for anything malformed. Timestamp strings arrive from
    /// persisted logs and remote peers, so a bad one is data, not a bug.
    ///
    /// Only the exact canonical spelling is accepted: logs key records by the
    /// raw string while the trie hashes the canonical one, so two spellings of
    /// one timestamp must never both parse.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let parts: Vec<&str> = s.split('-').collect();
        let [year, month, rest, counter, node] = parts.as_slice() else {
            return None;
        };

        let iso = format!("{year}-{month}-{rest}");
        let millis = DateTime::parse_from_rfc3339(&iso).ok()?.timestamp_millis();

        if counter.is_empty()
            || counter.len() > 4
            || !counter.bytes().all(|b| b.is_ascii_hexdigit())
        {
            return None;
        }
        let counter = u16::from_str_radix(counter, 16).ok()?;

        if node.len() != NODE_LEN || !node.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return None;
        }

        let ts = Self {
            millis,
            counter,
            node: (*node).to_string(),
        };
        (ts.to_string() == s).then_some(ts)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match DateTime::<Utc>::from_timestamp_millis(self.millis) {
            Some(dt) => write!(
                f,
                "{}-{:04X}-{}",
                dt.to_rfc3339_opts(SecondsFormat::Millis, true),
                self.counter,
                self.node
            ),
            // Outside chrono's range; never produced by a clock
            None => write!(f, "{}-{:04X}-{}", self.millis, self.counter, self.node),
        }
    }
}

/// Left-pad with `0` or keep the last 16 characters.
pub(crate) fn normalize_node(node: &str) -> String {
    let count = node.chars().count();
    if count >= NODE_LEN {
        node.chars().skip(count - NODE_LEN).collect()
    } else {
        let mut padded = "0".repeat(NODE_LEN - count);
        padded.push_str(node);
        padded
    }
}
