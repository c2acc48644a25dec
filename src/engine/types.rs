// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types and metadata keys for the sync engine.

use crate::clock::Clock;
use crate::codec::MessageEnvelope;
use crate::merkle::MerkleTrie;
use crate::value::Value;

/// Meta store key for the clock's logical millis.
pub const CLOCK_MILLIS_KEY: &str = "clock.millis";
/// Meta store key for the clock's counter.
pub const CLOCK_COUNTER_KEY: &str = "clock.counter";
/// Meta store key for the replica's node id.
pub const CLOCK_NODE_KEY: &str = "clock.node";
/// Meta store key for the serialized local trie.
pub const MERKLE_KEY: &str = "merkle";
/// Meta store key for the last trie received from the server.
pub const SERVER_MERKLE_KEY: &str = "server_merkle";

/// A local field update waiting to be stamped.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    pub dataset: String,
    pub row: String,
    pub column: String,
    pub value: Value,
}

impl Mutation {
    pub fn new(
        dataset: impl Into<String>,
        row: impl Into<String>,
        column: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        Self {
            dataset: dataset.into(),
            row: row.into(),
            column: column.into(),
            value: value.into(),
        }
    }
}

/// Result of a completed [`super::SyncEngine::sync`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncSummary {
    /// Request/response rounds performed.
    pub rounds: usize,
    /// Remote messages newly applied across all rounds.
    pub applied: usize,
}

/// Mutable replica state, guarded by the engine's mutex.
#[derive(Debug)]
pub(crate) struct ReplicaState {
    pub(crate) clock: Clock,
    pub(crate) local_trie: MerkleTrie,
    pub(crate) server_trie: Option<MerkleTrie>,
    pub(crate) pending: Vec<MessageEnvelope>,
    /// Number of leading `pending` entries carried by the last built request.
    pub(crate) in_flight: usize,
}

impl ReplicaState {
    pub(crate) fn new(clock: Clock) -> Self {
        Self {
            clock,
            local_trie: MerkleTrie::new(),
            server_trie: None,
            pending: Vec::new(),
            in_flight: 0,
        }
    }

    /// Remove the entries the last request delivered. Entries queued after
    /// the request was built stay pending.
    pub(crate) fn drain_in_flight(&mut self) -> usize {
        let delivered = self.in_flight.min(self.pending.len());
        self.pending.drain(..delivered);
        self.in_flight = 0;
        delivered
    }
}
