// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Storage traits and in-memory implementations.

pub mod memory;
pub mod traits;

pub use memory::{InMemoryEntityStore, InMemoryLog, InMemoryMetaStore};
pub use traits::{Change, EntityStore, LogRecord, MessageLog, MetaStore, StorageError};
