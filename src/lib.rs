// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Ledger Sync
//!
//! Client-side replication engine for a local-first ledger.
//!
//! Every replica keeps a full local copy of the data and exchanges field-level
//! change messages with a central sync server. Conflicts resolve
//! last-writer-wins by a hybrid logical timestamp, so replicas converge no
//! matter the order messages arrive in.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         SyncEngine                          │
//! │  • create_change(): stamp, log, apply, queue               │
//! │  • build_*_sync_request() / process_sync_response()        │
//! └─────────────────────────────────────────────────────────────┘
//!        │                 │                    │
//!        ▼                 ▼                    ▼
//! ┌─────────────┐  ┌───────────────┐  ┌───────────────────────┐
//! │    Clock    │  │  MerkleTrie   │  │      Wire Codec       │
//! │  HLC send / │  │  base-3 time  │  │  varint + length-     │
//! │  recv       │  │  buckets, XOR │  │  delimited messages   │
//! └─────────────┘  └───────────────┘  └───────────────────────┘
//!        │
//!        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │   MessageLog  •  EntityStore  •  MetaStore  •  Transport    │
//! │              (traits, injected by the host)                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ledger_sync::clock::SystemTime;
//! use ledger_sync::storage::{InMemoryEntityStore, InMemoryLog, InMemoryMetaStore};
//! use ledger_sync::transport::{SyncTransport, TransportError};
//! use ledger_sync::{SyncConfig, SyncEngine};
//!
//! struct Http;
//!
//! #[async_trait::async_trait]
//! impl SyncTransport for Http {
//!     async fn exchange(&self, _file_id: &str, _body: Vec<u8>) -> Result<Vec<u8>, TransportError> {
//!         Err(TransportError::Network("not wired up".into()))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let engine = SyncEngine::open(
//!         Arc::new(InMemoryLog::new()),
//!         Arc::new(InMemoryEntityStore::new()),
//!         Arc::new(InMemoryMetaStore::new()),
//!         Arc::new(SystemTime),
//!         SyncConfig::default(),
//!     )
//!     .await
//!     .expect("Failed to open");
//!
//!     engine.create_change("accounts", "a1", "balance", 1250_i64).await.expect("Failed to record");
//!
//!     match engine.sync(&Http, "budget-file", "group-1").await {
//!         Ok(summary) => println!("applied {} remote changes", summary.applied),
//!         Err(e) if e.is_retryable() => println!("try again later: {e}"),
//!         Err(e) => panic!("sync failed: {e}"),
//!     }
//! }
//! ```
//!
//! ## Modules
//!
//! - [`engine`]: The [`SyncEngine`] tying all components together
//! - [`clock`]: Hybrid logical clock
//! - [`timestamp`]: Timestamps and their canonical string form
//! - [`merkle`]: Time-bucketed Merkle trie for divergence detection
//! - [`codec`]: Binary wire format and protocol messages
//! - [`value`]: Typed field values
//! - [`storage`]: Storage traits and in-memory implementations
//! - [`transport`]: Transport seam for sync exchanges

pub mod clock;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod hash;
pub mod merkle;
pub mod metrics;
pub mod storage;
pub mod timestamp;
pub mod transport;
pub mod value;

pub use clock::{Clock, ClockError, ClockState, ManualTime, SystemTime, TimeSource};
pub use codec::{ChangeMessage, DecodeError, MessageEnvelope, SyncRequest, SyncResponse, WireMessage};
pub use config::SyncConfig;
pub use engine::{load_clock, Mutation, SyncEngine, SyncSummary};
pub use error::SyncError;
pub use merkle::MerkleTrie;
pub use storage::{
    Change, EntityStore, InMemoryEntityStore, InMemoryLog, InMemoryMetaStore, LogRecord, MessageLog, MetaStore,
    StorageError,
};
pub use timestamp::Timestamp;
pub use transport::{SyncTransport, TransportError};
pub use value::{Number, Value};
