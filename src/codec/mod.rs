// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Binary wire codec for sync traffic.
//!
//! The format is protobuf-compatible: a stream of `(tag, value)` pairs where
//! the tag is `(field_number << 3) | wire_type` as a varint.
//!
//! - [`wire`] holds the primitive [`Writer`] / [`Reader`]
//! - [`messages`] holds the four protocol schemas behind [`WireMessage`]
//!
//! Defaults are omitted on encode (empty strings, empty bytes, `false`), so
//! a message with every field at its default encodes to zero bytes.

pub mod messages;
pub mod wire;

pub use messages::{ChangeMessage, MessageEnvelope, SyncRequest, SyncResponse, WireMessage};
pub use wire::{DecodeError, Reader, WireType, Writer, MAX_VARINT_LEN};
