use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed record: {0}")]
    Malformed(String),

    #[error("Record has no \"type\" field")]
    MissingKind,

    #[error("Unknown record kind: {0}")]
    UnknownKind(String),

    #[error("Invalid base64 chunk: {0}")]
    InvalidChunk(#[from] base64::DecodeError),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

#[derive(Error, Debug)]
pub enum EnvelopeError {
    #[error("Envelope decode failed: {0}")]
    Decode(#[from] bincode::Error),

    #[error("Envelope too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },
}
