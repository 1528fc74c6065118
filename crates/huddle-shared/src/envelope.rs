use serde::{Deserialize, Serialize};

use crate::constants::MAX_DATAGRAM_SIZE;
use crate::error::EnvelopeError;
use crate::types::MediaKind;

/// One media datagram. Relays forward these verbatim and never decode them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaEnvelope {
    /// Username of the sender
    pub sender: String,
    pub kind: MediaKind,
    /// Compressed frame or raw audio chunk
    pub payload: Option<Vec<u8>>,
}

impl MediaEnvelope {
    pub fn new(sender: impl Into<String>, kind: MediaKind, payload: Option<Vec<u8>>) -> Self {
        Self {
            sender: sender.into(),
            kind,
            payload,
        }
    }

    /// An envelope that only announces the sender and kind.
    pub fn empty(sender: impl Into<String>, kind: MediaKind) -> Self {
        Self::new(sender, kind, None)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, EnvelopeError> {
        Ok(bincode::deserialize(data)?)
    }

    /// Encode for a single datagram. If the payload would push the
    /// datagram past [`MAX_DATAGRAM_SIZE`], it is dropped and the kind is
    /// kept; the returned flag reports whether that happened.
    pub fn to_datagram(&self) -> Result<(Vec<u8>, bool), EnvelopeError> {
        let bytes = self.to_bytes()?;
        if bytes.len() <= MAX_DATAGRAM_SIZE {
            return Ok((bytes, false));
        }

        let stripped = Self::empty(self.sender.clone(), self.kind).to_bytes()?;
        if stripped.len() > MAX_DATAGRAM_SIZE {
            return Err(EnvelopeError::TooLarge {
                size: stripped.len(),
                max: MAX_DATAGRAM_SIZE,
            });
        }
        Ok((stripped, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_roundtrip() {
        let env = MediaEnvelope::new("alice", MediaKind::Screen, Some(vec![1, 2, 3]));
        let bytes = env.to_bytes().unwrap();
        assert_eq!(MediaEnvelope::from_bytes(&bytes).unwrap(), env);
    }

    #[test]
    fn test_oversize_payload_is_stripped() {
        let env = MediaEnvelope::new("alice", MediaKind::Webcam, Some(vec![0u8; 70_000]));
        let (bytes, stripped) = env.to_datagram().unwrap();
        assert!(stripped);
        assert!(bytes.len() <= MAX_DATAGRAM_SIZE);

        let decoded = MediaEnvelope::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.kind, MediaKind::Webcam);
        assert!(decoded.payload.is_none());
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(MediaEnvelope::from_bytes(&[0xFF; 3]).is_err());
    }
}
