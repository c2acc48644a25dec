// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Building outgoing sync requests.

use std::collections::HashSet;

use tracing::{debug, instrument, warn};

use crate::codec::{ChangeMessage, MessageEnvelope, SyncRequest, WireMessage};
use crate::error::SyncError;
use crate::merkle::MerkleTrie;
use crate::storage::LogRecord;
use crate::timestamp::Timestamp;

use super::types::ReplicaState;
use super::SyncEngine;

impl SyncEngine {
    /// Bundle the pending queue into a request.
    ///
    /// `since` is the epoch for a full sync, otherwise the last timestamp in
    /// the log. Every pending entry is marked in flight.
    #[instrument(skip(self))]
    pub async fn build_sync_request(
        &self,
        file_id: &str,
        group_id: &str,
        full_sync: bool,
    ) -> Result<SyncRequest, SyncError> {
        let mut state = self.state.lock().await;
        let since = if full_sync {
            Timestamp::epoch().to_string()
        } else {
            self.last_applied().await?
        };
        let messages = state.pending.clone();
        Ok(self.finish_request(&mut state, messages, file_id, group_id, since))
    }

    /// Bundle the pending queue with a watermark derived from the tries.
    ///
    /// When the local trie diverges from `server_trie`, `since` is the start
    /// of the earliest diverging minute and the request also carries every
    /// logged change at or after it that is not already pending. Otherwise
    /// `since` is the last applied timestamp.
    #[instrument(skip(self, server_trie))]
    pub async fn build_incremental_sync_request(
        &self,
        file_id: &str,
        group_id: &str,
        server_trie: &MerkleTrie,
    ) -> Result<SyncRequest, SyncError> {
        let mut state = self.state.lock().await;

        let Some(diverged_at) = state.local_trie.diff(server_trie) else {
            let since = self.last_applied().await?;
            let messages = state.pending.clone();
            return Ok(self.finish_request(&mut state, messages, file_id, group_id, since));
        };

        let since = Timestamp::since_millis(diverged_at).to_string();
        let queued: HashSet<&str> = state.pending.iter().map(|e| e.timestamp.as_str()).collect();
        let mut messages = state.pending.clone();
        let mut resent = 0usize;
        for record in self.log.since(&since).await? {
            if queued.contains(record.timestamp.as_str()) {
                continue;
            }
            match envelope_from_record(&record) {
                Some(envelope) => {
                    messages.push(envelope);
                    resent += 1;
                }
                None => warn!(timestamp = %record.timestamp, "Not resending log record with invalid timestamp"),
            }
        }
        messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

        debug!(%since, resent, "Trie diverged from server");
        Ok(self.finish_request(&mut state, messages, file_id, group_id, since))
    }

    async fn last_applied(&self) -> Result<String, SyncError> {
        Ok(self
            .log
            .last_timestamp()
            .await?
            .unwrap_or_else(|| Timestamp::epoch().to_string()))
    }

    fn finish_request(
        &self,
        state: &mut ReplicaState,
        messages: Vec<MessageEnvelope>,
        file_id: &str,
        group_id: &str,
        since: String,
    ) -> SyncRequest {
        state.in_flight = state.pending.len();
        crate::metrics::record_request_messages(messages.len());
        debug!(messages = messages.len(), in_flight = state.in_flight, %since, "Built sync request");
        SyncRequest {
            messages,
            file_id: file_id.to_string(),
            group_id: group_id.to_string(),
            key_id: self.config.key_id.clone(),
            since,
        }
    }
}

fn envelope_from_record(record: &LogRecord) -> Option<MessageEnvelope> {
    Timestamp::parse(&record.timestamp)?;
    let message = ChangeMessage {
        dataset: record.dataset.clone(),
        row: record.row.clone(),
        column: record.column.clone(),
        value: record.value.clone(),
    };
    Some(MessageEnvelope {
        timestamp: record.timestamp.clone(),
        is_encrypted: false,
        content: message.encode(),
    })
}
