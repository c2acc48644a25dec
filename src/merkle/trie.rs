// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Base-3 Merkle trie over minute buckets.
//!
//! Serialized as a JSON object so the blob can be persisted locally and
//! exchanged with the server unchanged:
//!
//! ```text
//! {"hash": -1530219162, "1": {"hash": ..., "2": {...}}}
//! ```
//!
//! Hashes are written as signed 32-bit integers (the form produced by
//! JavaScript bitwise XOR on the server side); both signed and unsigned
//! values are accepted on read.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::de::{self, IgnoredAny, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::{instrument, warn};

use crate::timestamp::Timestamp;

/// Bucket width in milliseconds.
const BUCKET_MS: i64 = 60_000;

/// Keys shorter than this are right-padded with `0` when converted back to time.
pub const KEY_DIGITS: usize = 16;

/// Branches kept per level by default when pruning.
pub const DEFAULT_PRUNE_KEEP: usize = 2;

/// A node of the trie. The root node represents a replica's whole history.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MerkleTrie {
    hash: u32,
    children: BTreeMap<u8, MerkleTrie>,
}

/// Base-3 digits (most significant first) of the minute bucket for `millis`.
///
/// `key_for_millis(0) == [0]`.
#[must_use]
pub fn key_for_millis(millis: i64) -> Vec<u8> {
    let mut minutes = millis.max(0) / BUCKET_MS;
    if minutes == 0 {
        return vec![0];
    }

    let mut digits = Vec::with_capacity(KEY_DIGITS);
    while minutes > 0 {
        digits.push((minutes % 3) as u8);
        minutes /= 3;
    }
    digits.reverse();
    digits
}

/// Start of the minute bucket a (possibly partial) key points at.
///
/// Partial keys are right-padded with `0` to [`KEY_DIGITS`] digits, so a
/// short key maps to the earliest minute beneath it. The empty key maps to
/// the epoch.
#[must_use]
pub fn millis_for_key(key: &[u8]) -> i64 {
    let padding = KEY_DIGITS.saturating_sub(key.len());
    let minutes = key
        .iter()
        .copied()
        .chain(std::iter::repeat(0).take(if key.is_empty() { 0 } else { padding }))
        .fold(0_i64, |acc, digit| {
            acc.saturating_mul(3).saturating_add(i64::from(digit))
        });
    minutes.saturating_mul(BUCKET_MS)
}

impl MerkleTrie {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a trie from a set of timestamps.
    pub fn from_timestamps<'a>(timestamps: impl IntoIterator<Item = &'a Timestamp>) -> Self {
        let mut trie = Self::new();
        for ts in timestamps {
            trie.insert(ts);
        }
        trie
    }

    #[inline]
    #[must_use]
    pub fn hash(&self) -> u32 {
        self.hash
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hash == 0 && self.children.is_empty()
    }

    #[must_use]
    pub fn child(&self, digit: u8) -> Option<&MerkleTrie> {
        self.children.get(&digit)
    }

    /// Children in ascending digit order.
    pub fn children(&self) -> impl Iterator<Item = (u8, &MerkleTrie)> {
        self.children.iter().map(|(digit, child)| (*digit, child))
    }

    /// Total number of nodes, root included.
    #[must_use]
    pub fn node_count(&self) -> usize {
        1 + self.children.values().map(Self::node_count).sum::<usize>()
    }

    /// XOR the timestamp's hash into every node on its minute-bucket path.
    pub fn insert(&mut self, ts: &Timestamp) {
        let key = key_for_millis(ts.millis());
        self.insert_key(&key, ts.hash());
    }

    fn insert_key(&mut self, key: &[u8], hash: u32) {
        self.hash ^= hash;
        if let Some((digit, rest)) = key.split_first() {
            self.children.entry(*digit).or_default().insert_key(rest, hash);
        }
    }

    /// Earliest minute (in epoch millis) at which `self` and `other` diverge.
    ///
    /// Returns `None` when the root hashes match.
    #[must_use]
    pub fn diff(&self, other: &MerkleTrie) -> Option<i64> {
        if self.hash == other.hash {
            return None;
        }

        let mut left = Some(self);
        let mut right = Some(other);
        let mut key = Vec::with_capacity(KEY_DIGITS);

        loop {
            let digits: BTreeSet<u8> = left
                .into_iter()
                .chain(right)
                .flat_map(|node| node.children.keys().copied())
                .collect();

            let diverging = digits.into_iter().find(|digit| {
                let l = left.and_then(|node| node.child(*digit));
                let r = right.and_then(|node| node.child(*digit));
                match (l, r) {
                    (Some(l), Some(r)) => l.hash != r.hash,
                    // Missing on one side
                    _ => true,
                }
            });

            let Some(digit) = diverging else {
                return Some(millis_for_key(&key));
            };

            key.push(digit);
            left = left.and_then(|node| node.child(digit));
            right = right.and_then(|node| node.child(digit));
        }
    }

    /// Keep only the last `keep` children (newest buckets) at every level.
    ///
    /// Node hashes are carried over untouched, so `prune(n).hash() == hash()`.
    #[must_use]
    pub fn prune(&self, keep: usize) -> MerkleTrie {
        let skip = self.children.len().saturating_sub(keep);
        MerkleTrie {
            hash: self.hash,
            children: self
                .children
                .iter()
                .skip(skip)
                .map(|(digit, child)| (*digit, child.prune(keep)))
                .collect(),
        }
    }

    /// JSON text form for persistence and the wire.
    #[must_use]
    pub fn serialize(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Parse the JSON text form.
    pub fn deserialize(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Parse the JSON text form, degrading to an empty trie on failure.
    ///
    /// An empty trie diverges from everything, so a corrupt blob costs a
    /// full resync instead of blocking sync.
    #[instrument(skip(text), fields(len = text.len()))]
    pub fn deserialize_or_empty(text: &str) -> Self {
        match Self::deserialize(text) {
            Ok(trie) => trie,
            Err(e) => {
                warn!(error = %e, "Discarding unreadable merkle trie");
                Self::new()
            }
        }
    }
}

impl Serialize for MerkleTrie {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.children.len() + 1))?;
        for (digit, child) in &self.children {
            map.serialize_entry(&digit.to_string(), child)?;
        }
        map.serialize_entry("hash", &(self.hash as i32))?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for MerkleTrie {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(TrieVisitor)
    }
}

/// Accept a hash written either as signed i32 or unsigned u32.
fn hash_from_wire(raw: i64) -> Option<u32> {
    if raw < 0 {
        i32::try_from(raw).ok().map(|h| h as u32)
    } else {
        u32::try_from(raw).ok()
    }
}

struct TrieVisitor;

impl<'de> Visitor<'de> for TrieVisitor {
    type Value = MerkleTrie;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a merkle trie object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<MerkleTrie, A::Error> {
        let mut trie = MerkleTrie::default();

        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "hash" => {
                    let raw: i64 = map.next_value()?;
                    trie.hash = hash_from_wire(raw).ok_or_else(|| {
                        <A::Error as de::Error>::custom(format!("hash out of range: {raw}"))
                    })?;
                }
                "0" | "1" | "2" => {
                    let digit = key.as_bytes()[0] - b'0';
                    let child: MerkleTrie = map.next_value()?;
                    trie.children.insert(digit, child);
                }
                _ => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }

        Ok(trie)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NODE: &str = "0123456789abcdef";
    const T0: i64 = 1_700_000_000_000;

    fn ts(millis: i64, counter: u16) -> Timestamp {
        Timestamp::new(millis, counter, NODE)
    }

    /// Check the XOR invariant at every node: hash == xor of the leaf hashes below.
    fn assert_xor_invariant(node: &MerkleTrie) {
        if node.children.is_empty() {
            return;
        }
        let folded = node.children.values().fold(0, |acc, child| acc ^ child.hash);
        assert_eq!(node.hash, folded, "node hash must equal xor of children");
        for child in node.children.values() {
            assert_xor_invariant(child);
        }
    }

    #[test]
    fn test_key_for_millis() {
        assert_eq!(key_for_millis(0), vec![0]);
        assert_eq!(key_for_millis(59_999), vec![0]);
        assert_eq!(key_for_millis(60_000), vec![1]);
        assert_eq!(key_for_millis(3 * 60_000), vec![1, 0]);
        assert_eq!(key_for_millis(5 * 60_000), vec![1, 2]);
        assert_eq!(key_for_millis(T0).len(), KEY_DIGITS);
    }

    #[test]
    fn test_millis_for_key_roundtrip() {
        let bucket_start = T0 - T0 % 60_000;
        assert_eq!(millis_for_key(&key_for_millis(T0)), bucket_start);
        assert_eq!(millis_for_key(&[]), 0);
    }

    #[test]
    fn test_millis_for_partial_key_pads_right() {
        // "1" padded to 16 digits is 3^15 minutes
        assert_eq!(millis_for_key(&[1]), 14_348_907 * 60_000);
    }

    #[test]
    fn test_insert_maintains_xor_invariant() {
        let mut trie = MerkleTrie::new();
        let stamps = [ts(T0, 0), ts(T0, 1), ts(T0 + 60_000, 0), ts(T0 + 3_600_000, 4)];
        for stamp in &stamps {
            trie.insert(stamp);
        }

        let expected = stamps.iter().fold(0, |acc, s| acc ^ s.hash());
        assert_eq!(trie.hash(), expected);
        assert_xor_invariant(&trie);
    }

    #[test]
    fn test_insert_is_order_independent() {
        let a = ts(T0, 0);
        let b = ts(T0 + 120_000, 3);

        let ab = MerkleTrie::from_timestamps([&a, &b]);
        let ba = MerkleTrie::from_timestamps([&b, &a]);
        assert_eq!(ab, ba);
    }

    #[test]
    fn test_diff_identical() {
        let a = MerkleTrie::from_timestamps([&ts(T0, 0)]);
        let b = MerkleTrie::from_timestamps([&ts(T0, 0)]);
        assert_eq!(a.diff(&b), None);
        assert_eq!(MerkleTrie::new().diff(&MerkleTrie::new()), None);
    }

    #[test]
    fn test_diff_different_minutes() {
        let first = ts(T0, 0);
        let second = ts(T0 + 10 * 60_000, 0);

        let a = MerkleTrie::from_timestamps([&first]);
        let b = MerkleTrie::from_timestamps([&second]);

        let at = a.diff(&b).unwrap();
        assert_eq!(at, T0 - T0 % 60_000);
    }

    #[test]
    fn test_diff_same_minute() {
        let a = MerkleTrie::from_timestamps([&ts(T0, 0)]);
        let b = MerkleTrie::from_timestamps([&ts(T0 + 5, 0)]);

        assert_eq!(a.diff(&b), Some(T0 - T0 % 60_000));
    }

    #[test]
    fn test_diff_finds_earliest_divergence() {
        let shared = [ts(T0, 0), ts(T0 + 60_000, 0)];
        let late = ts(T0 + 30 * 60_000, 0);
        let early = ts(T0 + 2 * 60_000, 0);

        let mut a = MerkleTrie::from_timestamps(&shared);
        let mut b = a.clone();
        a.insert(&late);
        b.insert(&early);

        let expected = early.millis() - early.millis() % 60_000;
        assert_eq!(a.diff(&b), Some(expected));
        assert_eq!(b.diff(&a), Some(expected));
    }

    #[test]
    fn test_diff_against_empty() {
        let stamp = ts(T0, 0);
        let a = MerkleTrie::from_timestamps([&stamp]);

        assert_eq!(a.diff(&MerkleTrie::new()), Some(T0 - T0 % 60_000));
        assert_eq!(MerkleTrie::new().diff(&a), Some(T0 - T0 % 60_000));
    }

    #[test]
    fn test_prune_keeps_hash_and_newest_branches() {
        let stamps: Vec<Timestamp> = (0..20).map(|i| ts(T0 + i * 60_000 * 7, 0)).collect();
        let trie = MerkleTrie::from_timestamps(&stamps);

        let pruned = trie.prune(2);
        assert_eq!(pruned.hash(), trie.hash());
        assert!(pruned.node_count() <= trie.node_count());

        fn max_children(node: &MerkleTrie) -> usize {
            node.children
                .values()
                .map(max_children)
                .max()
                .unwrap_or(0)
                .max(node.children.len())
        }
        assert!(max_children(&pruned) <= 2);

        // The newest timestamp's path survives
        let newest = key_for_millis(stamps.last().unwrap().millis());
        let mut node = &pruned;
        for digit in newest {
            node = node.child(digit).expect("newest branch kept");
        }
    }

    #[test]
    fn test_prune_zero_keeps_only_root() {
        let trie = MerkleTrie::from_timestamps([&ts(T0, 0)]);
        let pruned = trie.prune(0);
        assert_eq!(pruned.hash(), trie.hash());
        assert_eq!(pruned.node_count(), 1);
    }

    #[test]
    fn test_serialize_roundtrip() {
        let trie = MerkleTrie::from_timestamps([&ts(T0, 0), &ts(T0 + 90_000, 2), &ts(T0, 9)]);
        let text = trie.serialize();
        let back = MerkleTrie::deserialize(&text).unwrap();
        assert_eq!(back, trie);
    }

    #[test]
    fn test_serialize_writes_signed_hash() {
        let trie = MerkleTrie {
            hash: 0xFFFF_FFFF,
            children: BTreeMap::new(),
        };
        assert_eq!(trie.serialize(), r#"{"hash":-1}"#);
    }

    #[test]
    fn test_deserialize_accepts_signed_and_unsigned() {
        let signed = MerkleTrie::deserialize(r#"{"hash":-1}"#).unwrap();
        let unsigned = MerkleTrie::deserialize(r#"{"hash":4294967295}"#).unwrap();
        assert_eq!(signed.hash(), u32::MAX);
        assert_eq!(unsigned.hash(), u32::MAX);
    }

    #[test]
    fn test_deserialize_missing_hash_is_zero() {
        let trie = MerkleTrie::deserialize("{}").unwrap();
        assert!(trie.is_empty());
    }

    #[test]
    fn test_deserialize_ignores_unknown_keys() {
        let trie = MerkleTrie::deserialize(r#"{"hash":5,"extra":[1,2],"1":{"hash":5}}"#).unwrap();
        assert_eq!(trie.hash(), 5);
        assert_eq!(trie.child(1).map(MerkleTrie::hash), Some(5));
    }

    #[test]
    fn test_deserialize_or_empty_on_corruption() {
        assert!(MerkleTrie::deserialize_or_empty("{not json").is_empty());
        assert!(MerkleTrie::deserialize_or_empty("[1,2,3]").is_empty());
        assert!(MerkleTrie::deserialize_or_empty(r#"{"hash":99999999999}"#).is_empty());
        assert!(MerkleTrie::deserialize_or_empty("").is_empty());
    }
}
