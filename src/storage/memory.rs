// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-memory implementations of the storage traits.
//!
//! Used by tests and by embedders that keep everything in process.

use std::collections::BTreeMap;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;

use super::traits::{Change, EntityStore, LogRecord, MessageLog, MetaStore, StorageError};
use crate::value::Value;

/// Message log ordered by canonical timestamp string.
#[derive(Debug, Default)]
pub struct InMemoryLog {
    records: RwLock<BTreeMap<String, LogRecord>>,
}

impl InMemoryLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every record, ascending.
    #[must_use]
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.read().values().cloned().collect()
    }
}

#[async_trait]
impl MessageLog for InMemoryLog {
    async fn append(&self, record: LogRecord) -> Result<(), StorageError> {
        self.records
            .write()
            .entry(record.timestamp.clone())
            .or_insert(record);
        Ok(())
    }

    async fn contains(&self, timestamp: &str) -> Result<bool, StorageError> {
        Ok(self.records.read().contains_key(timestamp))
    }

    async fn since(&self, since: &str) -> Result<Vec<LogRecord>, StorageError> {
        Ok(self
            .records
            .read()
            .range(since.to_string()..)
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn last_timestamp(&self) -> Result<Option<String>, StorageError> {
        Ok(self.records.read().keys().next_back().cloned())
    }

    async fn len(&self) -> Result<usize, StorageError> {
        Ok(self.records.read().len())
    }
}

type CellKey = (String, String, String);

#[derive(Debug, Clone)]
struct Cell {
    timestamp: String,
    value: Value,
}

/// Entity store resolving conflicts by last-writer-wins per
/// `(dataset, row, column)`.
#[derive(Debug, Default)]
pub struct InMemoryEntityStore {
    cells: DashMap<CellKey, Cell>,
}

impl InMemoryEntityStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of one cell.
    #[must_use]
    pub fn get(&self, dataset: &str, row: &str, column: &str) -> Option<Value> {
        self.cells
            .get(&(dataset.to_string(), row.to_string(), column.to_string()))
            .map(|c| c.value.clone())
    }

    /// All columns of one row.
    #[must_use]
    pub fn row(&self, dataset: &str, row: &str) -> BTreeMap<String, Value> {
        self.cells
            .iter()
            .filter(|e| e.key().0 == dataset && e.key().1 == row)
            .map(|e| (e.key().2.clone(), e.value().value.clone()))
            .collect()
    }

    /// Full contents, ordered. Handy for comparing replicas.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<CellKey, Value> {
        self.cells
            .iter()
            .map(|e| (e.key().clone(), e.value().value.clone()))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn apply(&self, change: &Change) -> Result<(), StorageError> {
        let key = (
            change.dataset.clone(),
            change.row.clone(),
            change.column.clone(),
        );
        let incoming = Cell {
            timestamp: change.timestamp.clone(),
            value: change.value.clone(),
        };
        self.cells
            .entry(key)
            .and_modify(|cell| {
                if incoming.timestamp > cell.timestamp {
                    *cell = incoming.clone();
                }
            })
            .or_insert_with(|| incoming.clone());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryMetaStore {
    data: DashMap<String, String>,
}

impl InMemoryMetaStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[async_trait]
impl MetaStore for InMemoryMetaStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.data.get(key).map(|r| r.value().clone()))
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.data.insert(key.to_string(), value.to_string());
        Ok(())
    }
}
