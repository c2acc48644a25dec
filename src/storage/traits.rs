// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Storage seams consumed by the sync engine.
//!
//! The engine owns no persistence of its own. Every durable effect goes
//! through one of three traits:
//!
//! - [`MessageLog`]: the append-only record of every change ever applied
//! - [`EntityStore`]: the materialized rows the application reads
//! - [`MetaStore`]: small string blobs (clock state, serialized tries)

use async_trait::async_trait;
use thiserror::Error;

use crate::value::Value;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Item not found")]
    NotFound,
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// One entry of the message log.
///
/// `timestamp` is the canonical timestamp string; `value` is the tagged
/// text form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub timestamp: String,
    pub dataset: String,
    pub row: String,
    pub column: String,
    pub value: String,
}

/// A decoded change handed to the entity store.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    /// Canonical timestamp string, used for last-writer-wins.
    pub timestamp: String,
    pub dataset: String,
    pub row: String,
    pub column: String,
    pub value: Value,
}

impl Change {
    /// Log form of this change.
    #[must_use]
    pub fn to_record(&self) -> LogRecord {
        LogRecord {
            timestamp: self.timestamp.clone(),
            dataset: self.dataset.clone(),
            row: self.row.clone(),
            column: self.column.clone(),
            value: self.value.encode(),
        }
    }
}

/// Append-only log of applied changes, keyed by canonical timestamp.
#[async_trait]
pub trait MessageLog: Send + Sync {
    /// Append a record. Appending a timestamp that is already present is a
    /// no-op.
    async fn append(&self, record: LogRecord) -> Result<(), StorageError>;

    async fn contains(&self, timestamp: &str) -> Result<bool, StorageError>;

    /// Records with `timestamp >= since`, ascending.
    async fn since(&self, since: &str) -> Result<Vec<LogRecord>, StorageError>;

    /// Highest timestamp in the log.
    async fn last_timestamp(&self) -> Result<Option<String>, StorageError>;

    async fn len(&self) -> Result<usize, StorageError>;

    async fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len().await? == 0)
    }
}

/// Materialized application state.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Apply a change. The store decides last-writer-wins per
    /// `(dataset, row, column)` using `change.timestamp`.
    async fn apply(&self, change: &Change) -> Result<(), StorageError>;
}

/// Key-value metadata.
#[async_trait]
pub trait MetaStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    async fn put(&self, key: &str, value: &str) -> Result<(), StorageError>;
}
