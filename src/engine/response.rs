// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Applying incoming sync responses.

use tracing::{debug, info, instrument, warn};

use crate::codec::{MessageEnvelope, SyncResponse};
use crate::error::SyncError;
use crate::storage::Change;
use crate::timestamp::Timestamp;

use super::types::{ReplicaState, SERVER_MERKLE_KEY};
use super::SyncEngine;

/// What happened to one incoming envelope.
enum Disposition {
    Applied,
    Duplicate,
    Skipped(&'static str),
}

impl SyncEngine {
    /// Apply every new message in `response` and adopt its trie.
    ///
    /// Each envelope is handled on its own: encrypted or malformed envelopes
    /// are skipped with a warning, envelopes already in the log are not
    /// reapplied. Clock and storage errors abort the call; in that case the
    /// pending queue is left intact.
    ///
    /// Returns the number of messages newly applied.
    #[instrument(skip(self, response), fields(messages = response.messages.len()))]
    pub async fn process_sync_response(&self, response: &SyncResponse) -> Result<usize, SyncError> {
        let mut state = self.state.lock().await;

        let mut applied = 0usize;
        let mut duplicates = 0usize;
        let mut skipped = 0usize;
        for envelope in &response.messages {
            match self.apply_remote(&mut state, envelope).await? {
                Disposition::Applied => applied += 1,
                Disposition::Duplicate => {
                    duplicates += 1;
                    crate::metrics::record_message_duplicate();
                }
                Disposition::Skipped(reason) => {
                    skipped += 1;
                    crate::metrics::record_message_skipped(reason);
                }
            }
        }

        if let Some(server_trie) = response.merkle_trie() {
            self.meta.put(SERVER_MERKLE_KEY, &server_trie.serialize()).await?;
            state.server_trie = Some(server_trie);
        }

        if self.config.prune_after_sync {
            state.local_trie = state.local_trie.prune(self.config.prune_keep);
        }
        self.persist_replica(&state).await?;
        let delivered = state.drain_in_flight();

        crate::metrics::record_messages_applied(applied);
        crate::metrics::set_pending_messages(state.pending.len());
        crate::metrics::set_trie_nodes(state.local_trie.node_count());
        info!(applied, duplicates, skipped, delivered, "Processed sync response");
        Ok(applied)
    }

    async fn apply_remote(
        &self,
        state: &mut ReplicaState,
        envelope: &MessageEnvelope,
    ) -> Result<Disposition, SyncError> {
        if envelope.is_encrypted {
            warn!(timestamp = %envelope.timestamp, "Skipping encrypted message");
            return Ok(Disposition::Skipped("encrypted"));
        }
        let Some(ts) = Timestamp::parse(&envelope.timestamp) else {
            warn!(timestamp = %envelope.timestamp, "Skipping message with invalid timestamp");
            return Ok(Disposition::Skipped("timestamp"));
        };
        let message = match envelope.message() {
            Ok(message) => message,
            Err(e) => {
                warn!(timestamp = %envelope.timestamp, error = %e, "Skipping undecodable message");
                return Ok(Disposition::Skipped("decode"));
            }
        };
        let value = match message.typed_value() {
            Ok(value) => value,
            Err(e) => {
                warn!(timestamp = %envelope.timestamp, error = %e, "Skipping message with invalid value");
                return Ok(Disposition::Skipped("value"));
            }
        };

        // The trie already holds every logged timestamp; inserting again
        // would XOR it back out.
        if self.log.contains(&envelope.timestamp).await? {
            debug!(timestamp = %envelope.timestamp, "Message already applied");
            return Ok(Disposition::Duplicate);
        }

        state.clock.recv(&ts).inspect_err(|e| {
            crate::metrics::record_clock_error(e.kind());
        })?;

        let change = Change {
            timestamp: envelope.timestamp.clone(),
            dataset: message.dataset,
            row: message.row,
            column: message.column,
            value,
        };
        self.log.append(change.to_record()).await?;
        self.entities.apply(&change).await?;
        state.local_trie.insert(&ts);
        Ok(Disposition::Applied)
    }
}
