//! Line codec for the control channel.
//!
//! This is the only place that knows records are JSON and that binary
//! chunks ride inside them as base64 text.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::ProtocolError;

/// A closed set of record kinds that can be framed on one line.
pub trait Record: Serialize + DeserializeOwned {
    /// Every `"type"` tag this union accepts.
    const KINDS: &'static [&'static str];

    /// The `"type"` tag of this value.
    fn kind(&self) -> &'static str;
}

/// Raw file bytes, carried as base64 on the wire.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Chunk(pub Vec<u8>);

impl Chunk {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for Chunk {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl std::fmt::Debug for Chunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Chunk({} bytes)", self.0.len())
    }
}

impl Serialize for Chunk {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&encode_chunk(&self.0))
    }
}

impl<'de> Deserialize<'de> for Chunk {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        decode_chunk(&text)
            .map(Chunk)
            .map_err(serde::de::Error::custom)
    }
}

pub fn encode_chunk(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn decode_chunk(text: &str) -> Result<Vec<u8>, ProtocolError> {
    Ok(STANDARD.decode(text)?)
}

/// Serialize a record as one newline-terminated line.
pub fn encode_line<R: Record>(record: &R) -> Result<String, ProtocolError> {
    let mut line =
        serde_json::to_string(record).map_err(|e| ProtocolError::Serialization(e.to_string()))?;
    line.push('\n');
    Ok(line)
}

/// Parse one line (with or without its trailing newline) into a record.
///
/// Unknown kinds and malformed records are reported separately so callers
/// can log them differently; neither is fatal to the connection.
pub fn decode_line<R: Record>(line: &str) -> Result<R, ProtocolError> {
    let value: Value = serde_json::from_str(line.trim_end_matches(['\r', '\n']))
        .map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    match value.get("type").and_then(Value::as_str) {
        None => return Err(ProtocolError::MissingKind),
        Some(kind) if !R::KINDS.contains(&kind) => {
            return Err(ProtocolError::UnknownKind(kind.to_string()))
        }
        Some(_) => {}
    }

    serde_json::from_value(value).map_err(|e| ProtocolError::Malformed(e.to_string()))
}
