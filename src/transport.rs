// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Transport seam for sync exchanges.
//!
//! A transport delivers one encoded [`SyncRequest`](crate::codec::SyncRequest)
//! and returns the raw bytes of the server's
//! [`SyncResponse`](crate::codec::SyncResponse). Retries, timeouts and
//! authentication belong to the implementation; the engine makes exactly one
//! call per sync round.

use async_trait::async_trait;
use thiserror::Error;

/// Content type for request and response bodies.
pub const SYNC_CONTENT_TYPE: &str = "application/ledger-sync";

/// Header carrying the file id, for servers that route before decoding.
pub const FILE_ID_HEADER: &str = "X-Ledger-File-Id";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Request timed out after {0}ms")]
    Timeout(u64),
    #[error("Server returned status {status}: {message}")]
    Status { status: u16, message: String },
}

impl TransportError {
    /// Whether repeating the same exchange might succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
        }
    }
}

/// Sends one sync request body and returns the response body.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    async fn exchange(&self, file_id: &str, body: Vec<u8>) -> Result<Vec<u8>, TransportError>;
}
