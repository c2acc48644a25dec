// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Engine startup: clock restore and trie/log reconciliation.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::clock::{make_node_id, Clock, ClockState, TimeSource};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::merkle::MerkleTrie;
use crate::storage::{EntityStore, MessageLog, MetaStore, StorageError};
use crate::timestamp::Timestamp;

use super::types::{CLOCK_COUNTER_KEY, CLOCK_MILLIS_KEY, CLOCK_NODE_KEY, MERKLE_KEY, SERVER_MERKLE_KEY};
use super::SyncEngine;

/// Restore the persisted clock, or mint a fresh node.
///
/// A missing or unreadable state never fails startup: a new node id is
/// generated and persisted, so no timestamp can be issued twice under the
/// same node id.
#[instrument(skip_all)]
pub async fn load_clock(
    meta: &dyn MetaStore,
    time: Arc<dyn TimeSource>,
    config: &SyncConfig,
) -> Result<Clock, SyncError> {
    let millis = meta.get(CLOCK_MILLIS_KEY).await?;
    let counter = meta.get(CLOCK_COUNTER_KEY).await?;
    let node = meta.get(CLOCK_NODE_KEY).await?;

    let restored = match (&millis, &counter, &node) {
        (Some(millis), Some(counter), Some(node)) => {
            let state = millis
                .parse::<i64>()
                .ok()
                .zip(counter.parse::<u16>().ok())
                .map(|(millis, counter)| ClockState {
                    millis,
                    counter,
                    node: node.clone(),
                });
            match state {
                Some(state) if state.is_valid() => Some(state),
                _ => {
                    warn!(%millis, %counter, %node, "Persisted clock state is corrupt, minting a new node");
                    None
                }
            }
        }
        (None, None, None) => None,
        _ => {
            warn!("Persisted clock state is incomplete, minting a new node");
            None
        }
    };

    let clock = match restored {
        Some(state) => {
            debug!(node = %state.node, millis = state.millis, counter = state.counter, "Clock restored");
            Clock::with_state(state, time)
        }
        None => {
            let node = make_node_id();
            info!(%node, "Starting with a fresh clock");
            let clock = Clock::new(node, time);
            persist_clock(meta, &clock.state()).await?;
            clock
        }
    };

    Ok(clock.with_max_drift(config.max_clock_drift_ms))
}

pub(crate) async fn persist_clock(meta: &dyn MetaStore, state: &ClockState) -> Result<(), StorageError> {
    meta.put(CLOCK_MILLIS_KEY, &state.millis.to_string()).await?;
    meta.put(CLOCK_COUNTER_KEY, &state.counter.to_string()).await?;
    meta.put(CLOCK_NODE_KEY, &state.node).await
}

impl SyncEngine {
    /// Restore the clock from `meta`, build the engine and initialize it.
    pub async fn open(
        log: Arc<dyn MessageLog>,
        entities: Arc<dyn EntityStore>,
        meta: Arc<dyn MetaStore>,
        time: Arc<dyn TimeSource>,
        config: SyncConfig,
    ) -> Result<Self, SyncError> {
        let clock = load_clock(meta.as_ref(), time, &config).await?;
        let engine = Self::new(clock, log, entities, meta, config);
        engine.initialize().await?;
        Ok(engine)
    }

    /// Reconcile the local trie with the message log.
    ///
    /// The trie is always rebuilt by replaying the whole log, which repairs
    /// any skew left by a crash between a log append and a trie persist.
    /// Safe to run on every startup.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> Result<(), SyncError> {
        let mut state = self.state.lock().await;

        let persisted = self
            .meta
            .get(MERKLE_KEY)
            .await?
            .map(|blob| MerkleTrie::deserialize_or_empty(&blob));

        let records = self.log.since(&Timestamp::epoch().to_string()).await?;
        let mut rebuilt = MerkleTrie::new();
        let mut unreadable = 0usize;
        for record in &records {
            match Timestamp::parse(&record.timestamp) {
                Some(ts) => rebuilt.insert(&ts),
                None => {
                    unreadable += 1;
                    warn!(timestamp = %record.timestamp, "Skipping log record with invalid timestamp");
                }
            }
        }

        if let Some(persisted) = &persisted {
            if persisted.hash() != rebuilt.hash() {
                warn!(
                    persisted_hash = persisted.hash(),
                    rebuilt_hash = rebuilt.hash(),
                    "Persisted trie disagreed with the message log, using the rebuilt trie"
                );
            }
        }

        state.server_trie = self
            .meta
            .get(SERVER_MERKLE_KEY)
            .await?
            .map(|blob| MerkleTrie::deserialize_or_empty(&blob));

        state.local_trie = rebuilt;
        self.meta.put(MERKLE_KEY, &state.local_trie.serialize()).await?;

        crate::metrics::set_trie_nodes(state.local_trie.node_count());
        crate::metrics::set_pending_messages(state.pending.len());
        info!(
            records = records.len(),
            unreadable,
            trie_hash = state.local_trie.hash(),
            has_server_trie = state.server_trie.is_some(),
            "Sync engine initialized"
        );
        Ok(())
    }
}
