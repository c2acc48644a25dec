// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Top-level error for engine operations.

use thiserror::Error;

use crate::clock::ClockError;
use crate::codec::DecodeError;
use crate::storage::StorageError;
use crate::transport::TransportError;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Clock(#[from] ClockError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("Failed to decode sync response: {0}")]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("Sync made no progress after {rounds} round(s); still diverging at {since}")]
    OutOfSync { rounds: usize, since: String },
}

impl SyncError {
    /// Whether the caller may retry the whole operation later.
    ///
    /// Backend failures and transient transport failures can clear up on
    /// their own. Clock errors are fatal to the call and need an operator to
    /// look at the clock or the peer; corrupt responses and a stuck
    /// watermark are not retryable either.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Clock(_) => false,
            Self::Storage(StorageError::Backend(_)) => true,
            Self::Storage(StorageError::NotFound) => false,
            Self::Decode(_) => false,
            Self::Transport(e) => e.is_retryable(),
            Self::OutOfSync { .. } => false,
        }
    }
}
