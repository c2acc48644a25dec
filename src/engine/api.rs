// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Local mutations: stamping, logging and queueing changes.

use tracing::{debug, instrument};

use crate::codec::{ChangeMessage, MessageEnvelope};
use crate::error::SyncError;
use crate::storage::Change;
use crate::value::Value;

use super::lifecycle::persist_clock;
use super::types::{Mutation, ReplicaState};
use super::SyncEngine;

impl SyncEngine {
    /// Record one local field update.
    ///
    /// The change is stamped, appended to the log, folded into the local
    /// trie, queued for the next request and applied to the entity store.
    /// Clock errors abort before anything is written. Once the log append
    /// succeeds the change is queued even if the entity store then fails;
    /// the error is still returned and the clock is persisted either way.
    #[instrument(skip(self, value))]
    pub async fn create_change(
        &self,
        dataset: &str,
        row: &str,
        column: &str,
        value: impl Into<Value> + Send,
    ) -> Result<MessageEnvelope, SyncError> {
        let mutation = Mutation::new(dataset, row, column, value);
        let mut state = self.state.lock().await;
        let result = self.apply_local(&mut state, mutation).await;
        let persisted = persist_clock(self.meta.as_ref(), &state.clock.state()).await;
        let envelope = result?;
        persisted?;

        crate::metrics::record_changes_created(1);
        crate::metrics::set_pending_messages(state.pending.len());
        Ok(envelope)
    }

    /// Record a batch of local updates under one lock acquisition.
    ///
    /// Changes are applied in order. On error, the changes before the
    /// failing one stay applied and queued.
    #[instrument(skip(self, mutations), fields(count = mutations.len()))]
    pub async fn create_changes(&self, mutations: Vec<Mutation>) -> Result<Vec<MessageEnvelope>, SyncError> {
        let mut state = self.state.lock().await;
        let mut envelopes = Vec::with_capacity(mutations.len());
        let mut result = Ok(());
        for mutation in mutations {
            match self.apply_local(&mut state, mutation).await {
                Ok(envelope) => envelopes.push(envelope),
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }

        let persisted = if envelopes.is_empty() && result.is_ok() {
            Ok(())
        } else {
            persist_clock(self.meta.as_ref(), &state.clock.state()).await
        };
        crate::metrics::record_changes_created(envelopes.len());
        crate::metrics::set_pending_messages(state.pending.len());
        result?;
        persisted?;
        Ok(envelopes)
    }

    async fn apply_local(&self, state: &mut ReplicaState, mutation: Mutation) -> Result<MessageEnvelope, SyncError> {
        let ts = state.clock.send().inspect_err(|e| {
            crate::metrics::record_clock_error(e.kind());
        })?;

        let message = ChangeMessage::new(&mutation.dataset, &mutation.row, &mutation.column, &mutation.value);
        let envelope = MessageEnvelope::plain(&ts, &message);
        let change = Change {
            timestamp: envelope.timestamp.clone(),
            dataset: mutation.dataset,
            row: mutation.row,
            column: mutation.column,
            value: mutation.value,
        };

        self.log.append(change.to_record()).await?;
        state.local_trie.insert(&ts);
        state.pending.push(envelope.clone());
        self.entities.apply(&change).await?;

        debug!(timestamp = %envelope.timestamp, dataset = %change.dataset, row = %change.row, "Change created");
        Ok(envelope)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use crate::clock::{Clock, ClockError, ManualTime};
    use crate::config::SyncConfig;
    use crate::engine::SyncEngine;
    use crate::storage::{Change, EntityStore, InMemoryLog, InMemoryMetaStore, MetaStore, StorageError};
    use crate::codec::WireMessage;
    use crate::engine::test_support::*;
    use crate::engine::Mutation;
    use crate::error::SyncError;
    use crate::merkle::MerkleTrie;
    use crate::storage::MessageLog;
    use crate::timestamp::Timestamp;
    use crate::value::Value;

    #[tokio::test]
    async fn test_create_change_flows_everywhere() {
        let h = harness("0123456789abcdef").await;
        let env = h.engine.create_change("accounts", "a1", "name", "Foo").await.unwrap();

        let ts = env.parsed_timestamp().unwrap();
        assert_eq!(ts.millis(), T0);
        assert_eq!(ts.node(), "0123456789abcdef");
        assert!(!env.is_encrypted);

        let msg = env.message().unwrap();
        assert_eq!((msg.dataset.as_str(), msg.row.as_str(), msg.column.as_str()), ("accounts", "a1", "name"));
        assert_eq!(msg.value, "S:Foo");

        assert!(h.log.contains(&env.timestamp).await.unwrap());
        assert_eq!(h.entities.get("accounts", "a1", "name"), Some(Value::from("Foo")));
        assert_eq!(h.engine.pending().await, vec![env]);
        assert_eq!(h.engine.local_trie().await, MerkleTrie::from_timestamps([&ts]));
    }

    #[tokio::test]
    async fn test_changes_in_same_millisecond_get_increasing_counters() {
        let h = harness("0123456789abcdef").await;
        let a = h.engine.create_change("accounts", "a1", "name", "Foo").await.unwrap();
        let b = h.engine.create_change("accounts", "a1", "name", "Bar").await.unwrap();

        assert!(a.timestamp < b.timestamp);
        assert_eq!(b.parsed_timestamp().unwrap().counter(), 1);
        assert_eq!(h.entities.get("accounts", "a1", "name"), Some(Value::from("Bar")));
    }

    #[tokio::test]
    async fn test_create_change_persists_clock() {
        let h = harness("0123456789abcdef").await;
        h.engine.create_change("accounts", "a1", "balance", 100_i64).await.unwrap();

        let millis = h.meta.get(crate::engine::CLOCK_MILLIS_KEY).await.unwrap();
        assert_eq!(millis, Some(T0.to_string()));
    }

    #[tokio::test]
    async fn test_create_changes_batch() {
        let h = harness("0123456789abcdef").await;
        let envelopes = h
            .engine
            .create_changes(vec![
                Mutation::new("accounts", "a1", "name", "Checking"),
                Mutation::new("accounts", "a1", "balance", 1250_i64),
                Mutation::new("accounts", "a1", "closed", Value::Null),
            ])
            .await
            .unwrap();

        assert_eq!(envelopes.len(), 3);
        assert!(envelopes.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        assert_eq!(h.engine.pending_len().await, 3);
        assert_eq!(h.log.len().await.unwrap(), 3);
        assert_eq!(h.entities.get("accounts", "a1", "balance"), Some(Value::from(1250_i64)));
        assert_eq!(h.entities.get("accounts", "a1", "closed"), Some(Value::Null));
    }

    #[tokio::test]
    async fn test_create_changes_empty_batch() {
        let h = harness("0123456789abcdef").await;
        assert!(h.engine.create_changes(Vec::new()).await.unwrap().is_empty());
        assert_eq!(h.engine.pending_len().await, 0);
    }

    #[tokio::test]
    async fn test_drift_error_propagates_and_writes_nothing() {
        let h = harness("0123456789abcdef").await;
        // Pull the clock far into the future, then rewind physical time
        h.time.set(T0 + 10 * 60 * 1000);
        h.engine.create_change("accounts", "a1", "name", "Foo").await.unwrap();
        h.time.set(T0);

        let err = h.engine.create_change("accounts", "a1", "name", "Bar").await.unwrap_err();
        assert!(matches!(err, SyncError::Clock(ClockError::Drift { .. })));
        assert_eq!(h.engine.pending_len().await, 1);
        assert_eq!(h.log.len().await.unwrap(), 1);
    }

    struct BrokenEntities;

    #[async_trait]
    impl EntityStore for BrokenEntities {
        async fn apply(&self, _change: &Change) -> Result<(), StorageError> {
            Err(StorageError::Backend("entity table locked".into()))
        }
    }

    #[tokio::test]
    async fn test_entity_store_failure_still_queues_logged_change() {
        let time = Arc::new(ManualTime::new(T0));
        let log = Arc::new(InMemoryLog::new());
        let meta = Arc::new(InMemoryMetaStore::new());
        let engine = SyncEngine::new(
            Clock::new("0123456789abcdef", time),
            log.clone(),
            Arc::new(BrokenEntities),
            meta.clone(),
            SyncConfig::default(),
        );

        let err = engine.create_change("accounts", "a1", "name", "Foo").await.unwrap_err();
        assert!(matches!(err, SyncError::Storage(StorageError::Backend(_))));

        // Logged, folded into the trie and queued for the next request
        let records = log.records();
        assert_eq!(records.len(), 1);
        let ts = Timestamp::parse(&records[0].timestamp).unwrap();
        assert_eq!(engine.local_trie().await, MerkleTrie::from_timestamps([&ts]));
        let pending = engine.pending().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].timestamp, records[0].timestamp);

        // The advanced clock is persisted
        let millis = meta.get(crate::engine::CLOCK_MILLIS_KEY).await.unwrap();
        assert_eq!(millis, Some(T0.to_string()));

        let req = engine.build_sync_request("file", "group", true).await.unwrap();
        assert_eq!(req.messages, pending);
    }

    #[tokio::test]
    async fn test_envelope_encodes_and_decodes() {
        let h = harness("0123456789abcdef").await;
        let env = h.engine.create_change("accounts", "a1", "rate", 0.25).await.unwrap();
        let back = crate::codec::MessageEnvelope::decode(&env.encode()).unwrap();
        assert_eq!(back.message().unwrap().typed_value().unwrap(), Value::from(0.25));
        assert_eq!(
            Timestamp::parse(&back.timestamp).unwrap(),
            env.parsed_timestamp().unwrap()
        );
    }
}
