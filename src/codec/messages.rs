// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync protocol message schemas.
//!
//! ```text
//! ChangeMessage    { dataset = 1; row = 2; column = 3; value = 4; }        (strings)
//! MessageEnvelope  { timestamp = 1; is_encrypted = 2; content = 3; }
//! SyncRequest      { repeated MessageEnvelope messages = 1; file_id = 2;
//!                    group_id = 3; key_id = 5; since = 6; }
//! SyncResponse     { repeated MessageEnvelope messages = 1; merkle = 2; }
//! ```
//!
//! Every decoder skips field numbers it does not know.

use crate::merkle::MerkleTrie;
use crate::timestamp::Timestamp;
use crate::value::Value;

use super::wire::{DecodeError, Reader, WireType, Writer};

/// A message type with a wire encoding.
pub trait WireMessage: Sized {
    fn encode_to(&self, writer: &mut Writer);

    fn decode_from(reader: &mut Reader<'_>) -> Result<Self, DecodeError>;

    fn encode(&self) -> Vec<u8> {
        let mut writer = Writer::new();
        self.encode_to(&mut writer);
        writer.into_inner()
    }

    fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        Self::decode_from(&mut Reader::new(bytes))
    }
}

fn read_embedded<T: WireMessage>(
    reader: &mut Reader<'_>,
    field: u32,
    wire_type: WireType,
) -> Result<T, DecodeError> {
    if wire_type != WireType::LengthDelimited {
        return Err(DecodeError::WireTypeMismatch {
            field,
            expected: WireType::LengthDelimited,
            actual: wire_type,
        });
    }
    T::decode(reader.read_bytes()?)
}

/// One field update: `(dataset, row, column) = value`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeMessage {
    pub dataset: String,
    pub row: String,
    pub column: String,
    /// Tagged text encoding, see [`Value::encode`].
    pub value: String,
}

impl ChangeMessage {
    pub fn new(
        dataset: impl Into<String>,
        row: impl Into<String>,
        column: impl Into<String>,
        value: &Value,
    ) -> Self {
        Self {
            dataset: dataset.into(),
            row: row.into(),
            column: column.into(),
            value: value.encode(),
        }
    }

    /// Decode the tagged value.
    pub fn typed_value(&self) -> Result<Value, DecodeError> {
        Value::decode(&self.value)
    }
}

impl WireMessage for ChangeMessage {
    fn encode_to(&self, writer: &mut Writer) {
        writer.write_string_field(1, &self.dataset);
        writer.write_string_field(2, &self.row);
        writer.write_string_field(3, &self.column);
        writer.write_string_field(4, &self.value);
    }

    fn decode_from(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let mut msg = Self::default();
        while !reader.is_eof() {
            let (field, wire_type) = reader.read_tag()?;
            match field {
                1 => msg.dataset = reader.string_field(field, wire_type)?,
                2 => msg.row = reader.string_field(field, wire_type)?,
                3 => msg.column = reader.string_field(field, wire_type)?,
                4 => msg.value = reader.string_field(field, wire_type)?,
                _ => reader.skip_field(wire_type)?,
            }
        }
        Ok(msg)
    }
}

/// Outer wrapper around a change message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageEnvelope {
    /// Canonical timestamp string of the change.
    pub timestamp: String,
    pub is_encrypted: bool,
    /// Encoded [`ChangeMessage`], or an opaque ciphertext when encrypted.
    pub content: Vec<u8>,
}

impl MessageEnvelope {
    /// Wrap a plaintext change.
    #[must_use]
    pub fn plain(timestamp: &Timestamp, message: &ChangeMessage) -> Self {
        Self {
            timestamp: timestamp.to_string(),
            is_encrypted: false,
            content: message.encode(),
        }
    }

    /// Wrap an opaque encrypted blob. The content is never inspected.
    pub fn encrypted(timestamp: impl Into<String>, ciphertext: Vec<u8>) -> Self {
        Self {
            timestamp: timestamp.into(),
            is_encrypted: true,
            content: ciphertext,
        }
    }

    /// Parsed timestamp, if well-formed.
    #[must_use]
    pub fn parsed_timestamp(&self) -> Option<Timestamp> {
        Timestamp::parse(&self.timestamp)
    }

    /// Decode the carried change. Fails for encrypted envelopes.
    pub fn message(&self) -> Result<ChangeMessage, DecodeError> {
        if self.is_encrypted {
            return Err(DecodeError::Encrypted);
        }
        ChangeMessage::decode(&self.content)
    }
}

impl WireMessage for MessageEnvelope {
    fn encode_to(&self, writer: &mut Writer) {
        writer.write_string_field(1, &self.timestamp);
        writer.write_bool_field(2, self.is_encrypted);
        writer.write_bytes_field(3, &self.content);
    }

    fn decode_from(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let mut env = Self::default();
        while !reader.is_eof() {
            let (field, wire_type) = reader.read_tag()?;
            match field {
                1 => env.timestamp = reader.string_field(field, wire_type)?,
                2 => env.is_encrypted = reader.bool_field(field, wire_type)?,
                3 => env.content = reader.bytes_field(field, wire_type)?,
                _ => reader.skip_field(wire_type)?,
            }
        }
        Ok(env)
    }
}

/// Client → server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncRequest {
    pub messages: Vec<MessageEnvelope>,
    pub file_id: String,
    pub group_id: String,
    pub key_id: Option<String>,
    /// Watermark: resend everything at or after this timestamp.
    pub since: String,
}

impl WireMessage for SyncRequest {
    fn encode_to(&self, writer: &mut Writer) {
        for envelope in &self.messages {
            writer.write_message_field(1, &envelope.encode());
        }
        writer.write_string_field(2, &self.file_id);
        writer.write_string_field(3, &self.group_id);
        if let Some(key_id) = &self.key_id {
            writer.write_string_field(5, key_id);
        }
        writer.write_string_field(6, &self.since);
    }

    fn decode_from(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let mut req = Self::default();
        while !reader.is_eof() {
            let (field, wire_type) = reader.read_tag()?;
            match field {
                1 => req.messages.push(read_embedded(reader, field, wire_type)?),
                2 => req.file_id = reader.string_field(field, wire_type)?,
                3 => req.group_id = reader.string_field(field, wire_type)?,
                5 => {
                    let key_id = reader.string_field(field, wire_type)?;
                    req.key_id = (!key_id.is_empty()).then_some(key_id);
                }
                6 => req.since = reader.string_field(field, wire_type)?,
                _ => reader.skip_field(wire_type)?,
            }
        }
        Ok(req)
    }
}

/// Server → client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncResponse {
    pub messages: Vec<MessageEnvelope>,
    /// Serialized server trie; empty when the server sent none.
    pub merkle: String,
}

impl SyncResponse {
    /// The server's trie, if one was sent. A corrupt blob yields an empty trie.
    #[must_use]
    pub fn merkle_trie(&self) -> Option<MerkleTrie> {
        if self.merkle.is_empty() {
            None
        } else {
            Some(MerkleTrie::deserialize_or_empty(&self.merkle))
        }
    }
}

impl WireMessage for SyncResponse {
    fn encode_to(&self, writer: &mut Writer) {
        for envelope in &self.messages {
            writer.write_message_field(1, &envelope.encode());
        }
        writer.write_string_field(2, &self.merkle);
    }

    fn decode_from(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let mut resp = Self::default();
        while !reader.is_eof() {
            let (field, wire_type) = reader.read_tag()?;
            match field {
                1 => resp.messages.push(read_embedded(reader, field, wire_type)?),
                2 => resp.merkle = reader.string_field(field, wire_type)?,
                _ => reader.skip_field(wire_type)?,
            }
        }
        Ok(resp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_change() -> ChangeMessage {
        ChangeMessage::new("accounts", "a1", "name", &Value::from("Foo"))
    }

    fn sample_envelope(counter: u16) -> MessageEnvelope {
        let ts = Timestamp::new(1_700_000_000_000, counter, "0123456789abcdef");
        MessageEnvelope::plain(&ts, &sample_change())
    }

    #[test]
    fn test_change_message_roundtrip() {
        let msg = sample_change();
        assert_eq!(ChangeMessage::decode(&msg.encode()).unwrap(), msg);
        assert_eq!(msg.typed_value().unwrap(), Value::from("Foo"));
    }

    #[test]
    fn test_change_message_known_bytes() {
        let msg = ChangeMessage {
            dataset: "a".into(),
            row: "b".into(),
            column: String::new(),
            value: "0:".into(),
        };
        assert_eq!(
            msg.encode(),
            vec![0x0A, 0x01, b'a', 0x12, 0x01, b'b', 0x22, 0x02, b'0', b':']
        );
    }

    #[test]
    fn test_empty_change_message_decodes_to_defaults() {
        let msg = ChangeMessage::decode(&[]).unwrap();
        assert_eq!(msg, ChangeMessage::default());
    }

    #[test]
    fn test_envelope_roundtrip_plain() {
        let env = sample_envelope(1);
        let back = MessageEnvelope::decode(&env.encode()).unwrap();
        assert_eq!(back, env);
        assert_eq!(back.message().unwrap(), sample_change());
        assert_eq!(back.parsed_timestamp().unwrap().counter(), 1);
    }

    #[test]
    fn test_envelope_roundtrip_encrypted() {
        let env = MessageEnvelope::encrypted("2024-01-01T00:00:00.000Z-0000-0123456789abcdef", vec![9, 8, 7]);
        let back = MessageEnvelope::decode(&env.encode()).unwrap();
        assert_eq!(back, env);
        assert!(back.is_encrypted);
        assert_eq!(back.message(), Err(DecodeError::Encrypted));
    }

    #[test]
    fn test_sync_request_roundtrip_empty() {
        let req = SyncRequest {
            messages: Vec::new(),
            file_id: "file".into(),
            group_id: "group".into(),
            key_id: None,
            since: Timestamp::epoch().to_string(),
        };
        assert_eq!(SyncRequest::decode(&req.encode()).unwrap(), req);
    }

    #[test]
    fn test_sync_request_roundtrip_many() {
        let req = SyncRequest {
            messages: (0..50).map(sample_envelope).collect(),
            file_id: "file".into(),
            group_id: "group".into(),
            key_id: Some("key-1".into()),
            since: Timestamp::epoch().to_string(),
        };
        let back = SyncRequest::decode(&req.encode()).unwrap();
        assert_eq!(back.messages.len(), 50);
        assert_eq!(back, req);
    }

    #[test]
    fn test_sync_request_empty_key_id_is_none() {
        let req = SyncRequest {
            key_id: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(SyncRequest::decode(&req.encode()).unwrap().key_id, None);
    }

    #[test]
    fn test_sync_response_roundtrip() {
        let trie = MerkleTrie::from_timestamps([&Timestamp::new(1_700_000_000_000, 0, "0123456789abcdef")]);
        let resp = SyncResponse {
            messages: vec![sample_envelope(0), MessageEnvelope::encrypted("x", vec![1])],
            merkle: trie.serialize(),
        };
        let back = SyncResponse::decode(&resp.encode()).unwrap();
        assert_eq!(back, resp);
        assert_eq!(back.merkle_trie(), Some(trie));
    }

    #[test]
    fn test_sync_response_without_merkle() {
        let resp = SyncResponse::default();
        assert!(resp.encode().is_empty());
        assert_eq!(SyncResponse::decode(&[]).unwrap().merkle_trie(), None);
    }

    #[test]
    fn test_unknown_fields_are_skipped() {
        let mut writer = Writer::new();
        writer.write_string_field(1, "ts");
        writer.write_tag(15, WireType::Varint);
        writer.write_varint(12345);
        writer.write_string_field(99, "future field");
        writer.write_bool_field(2, true);

        let env = MessageEnvelope::decode(&writer.into_inner()).unwrap();
        assert_eq!(env.timestamp, "ts");
        assert!(env.is_encrypted);
        assert!(env.content.is_empty());
    }

    #[test]
    fn test_truncated_request_fails_cleanly() {
        let req = SyncRequest {
            messages: vec![sample_envelope(0)],
            file_id: "file".into(),
            ..Default::default()
        };
        let bytes = req.encode();
        for cut in 1..bytes.len() {
            // Must never panic; most prefixes are errors
            let _ = SyncRequest::decode(&bytes[..cut]);
        }
        assert!(SyncRequest::decode(&bytes[..bytes.len() - 1]).is_err());
    }
}
