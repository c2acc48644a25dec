// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Driving full sync sessions over a transport.

use tracing::{debug, info, instrument, warn};

use crate::codec::{SyncRequest, SyncResponse, WireMessage};
use crate::error::SyncError;
use crate::metrics::RoundTimer;
use crate::transport::SyncTransport;

use super::types::SyncSummary;
use super::SyncEngine;

impl SyncEngine {
    /// Run request/response rounds until the local trie agrees with the
    /// server's.
    ///
    /// The first round is a full sync when no server trie is known, and
    /// incremental otherwise. If the tries still differ afterwards another
    /// round is sent with the new watermark, up to `max_sync_rounds`. A
    /// watermark that repeats between consecutive rounds means the server
    /// cannot close the gap and fails with [`SyncError::OutOfSync`].
    #[instrument(skip(self, transport))]
    pub async fn sync(
        &self,
        transport: &dyn SyncTransport,
        file_id: &str,
        group_id: &str,
    ) -> Result<SyncSummary, SyncError> {
        let max_rounds = self.config.max_sync_rounds.max(1);
        let mut summary = SyncSummary::default();
        let mut previous_since: Option<String> = None;

        for round in 1..=max_rounds {
            let request = self.next_request(file_id, group_id).await?;

            if previous_since.as_deref() == Some(request.since.as_str()) {
                warn!(round, since = %request.since, "Sync watermark did not advance");
                return Err(SyncError::OutOfSync {
                    rounds: summary.rounds,
                    since: request.since,
                });
            }

            let mut timer = RoundTimer::start();
            let response = self.exchange(transport, file_id, &request).await?;
            summary.applied += self.process_sync_response(&response).await?;
            summary.rounds = round;
            timer.succeed();

            if self.is_in_sync().await {
                info!(rounds = summary.rounds, applied = summary.applied, "Replica in sync");
                return Ok(summary);
            }
            debug!(round, since = %request.since, "Tries still differ after round");
            previous_since = Some(request.since);
        }

        let since = previous_since.unwrap_or_default();
        warn!(rounds = summary.rounds, %since, "Gave up before tries converged");
        Err(SyncError::OutOfSync {
            rounds: summary.rounds,
            since,
        })
    }

    async fn next_request(&self, file_id: &str, group_id: &str) -> Result<SyncRequest, SyncError> {
        match self.server_trie().await {
            Some(server_trie) => {
                self.build_incremental_sync_request(file_id, group_id, &server_trie)
                    .await
            }
            None => self.build_sync_request(file_id, group_id, true).await,
        }
    }

    async fn exchange(
        &self,
        transport: &dyn SyncTransport,
        file_id: &str,
        request: &SyncRequest,
    ) -> Result<SyncResponse, SyncError> {
        let body = request.encode();
        debug!(bytes = body.len(), messages = request.messages.len(), "Sending sync request");
        let bytes = transport.exchange(file_id, body).await.inspect_err(|e| {
            warn!(error = %e, retryable = e.is_retryable(), "Sync transport failed");
        })?;
        Ok(SyncResponse::decode(&bytes)?)
    }
}
