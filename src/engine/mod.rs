// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replica sync engine.
//!
//! The [`SyncEngine`] ties together one replica's moving parts:
//! - a hybrid logical [`Clock`] stamping every local change
//! - the local [`MerkleTrie`] summarizing everything applied
//! - the last trie the server reported
//! - the pending queue of local changes not yet acknowledged
//!
//! Durable state lives behind the injected [`MessageLog`], [`EntityStore`]
//! and [`MetaStore`].
//!
//! # Sync round
//!
//! ```text
//! build_*_sync_request ──► SyncTransport::exchange ──► process_sync_response
//!        │                                                   │
//!   pending queue                               clock.recv, log, entities,
//!   + watermark                                 trie, server trie, drain
//! ```
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use ledger_sync::clock::{Clock, SystemTime};
//! use ledger_sync::storage::{InMemoryEntityStore, InMemoryLog, InMemoryMetaStore};
//! use ledger_sync::{SyncConfig, SyncEngine};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let clock = Clock::new("0123456789abcdef", Arc::new(SystemTime));
//! let engine = SyncEngine::new(
//!     clock,
//!     Arc::new(InMemoryLog::new()),
//!     Arc::new(InMemoryEntityStore::new()),
//!     Arc::new(InMemoryMetaStore::new()),
//!     SyncConfig::default(),
//! );
//! engine.initialize().await.unwrap();
//!
//! engine.create_change("accounts", "a1", "name", "Checking").await.unwrap();
//! assert_eq!(engine.pending_len().await, 1);
//!
//! let request = engine.build_sync_request("file", "group", true).await.unwrap();
//! assert_eq!(request.messages.len(), 1);
//! # }
//! ```

mod api;
mod lifecycle;
mod request;
mod response;
mod session;
mod types;

pub use lifecycle::load_clock;
pub use types::{
    Mutation, SyncSummary, CLOCK_COUNTER_KEY, CLOCK_MILLIS_KEY, CLOCK_NODE_KEY, MERKLE_KEY,
    SERVER_MERKLE_KEY,
};

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::clock::{Clock, ClockState};
use crate::codec::MessageEnvelope;
use crate::config::SyncConfig;
use crate::merkle::MerkleTrie;
use crate::storage::{EntityStore, MessageLog, MetaStore};

use types::ReplicaState;

/// One replica's sync engine.
///
/// # Thread Safety
///
/// The engine is `Send + Sync`. Clock, tries and the pending queue sit behind
/// a single async mutex held for each whole read-modify-write, so local
/// changes may interleave with response processing. Network I/O in
/// [`sync`](Self::sync) happens outside the lock.
pub struct SyncEngine {
    pub(super) config: SyncConfig,
    pub(super) log: Arc<dyn MessageLog>,
    pub(super) entities: Arc<dyn EntityStore>,
    pub(super) meta: Arc<dyn MetaStore>,
    pub(super) state: Mutex<ReplicaState>,
}

impl SyncEngine {
    /// Create an engine around an existing clock.
    ///
    /// The clock's drift bound is taken from `config`. Call
    /// [`initialize`](Self::initialize) before use.
    pub fn new(
        clock: Clock,
        log: Arc<dyn MessageLog>,
        entities: Arc<dyn EntityStore>,
        meta: Arc<dyn MetaStore>,
        config: SyncConfig,
    ) -> Self {
        let clock = clock.with_max_drift(config.max_clock_drift_ms);
        Self {
            config,
            log,
            entities,
            meta,
            state: Mutex::new(ReplicaState::new(clock)),
        }
    }

    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Number of local changes not yet acknowledged by the server.
    pub async fn pending_len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    /// Snapshot of the pending queue, oldest first.
    pub async fn pending(&self) -> Vec<MessageEnvelope> {
        self.state.lock().await.pending.clone()
    }

    /// Root hash of the local trie.
    pub async fn trie_hash(&self) -> u32 {
        self.state.lock().await.local_trie.hash()
    }

    pub async fn local_trie(&self) -> MerkleTrie {
        self.state.lock().await.local_trie.clone()
    }

    /// Last trie received from the server, if any.
    pub async fn server_trie(&self) -> Option<MerkleTrie> {
        self.state.lock().await.server_trie.clone()
    }

    pub async fn clock_state(&self) -> ClockState {
        self.state.lock().await.clock.state()
    }

    /// This replica's node id.
    pub async fn node(&self) -> String {
        self.state.lock().await.clock.node().to_string()
    }

    /// Whether a server trie is known and agrees with the local trie.
    pub async fn is_in_sync(&self) -> bool {
        let state = self.state.lock().await;
        state
            .server_trie
            .as_ref()
            .is_some_and(|server| state.local_trie.diff(server).is_none())
    }

    /// Write the local trie and clock state to the meta store.
    pub(super) async fn persist_replica(
        &self,
        state: &ReplicaState,
    ) -> Result<(), crate::storage::StorageError> {
        self.meta.put(MERKLE_KEY, &state.local_trie.serialize()).await?;
        lifecycle::persist_clock(self.meta.as_ref(), &state.clock.state()).await
    }
}
