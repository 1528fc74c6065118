//! # huddle-shared
//!
//! Wire-level vocabulary shared by the control server, the media relays and
//! the client: constants, the control record unions and their line codec,
//! and the media envelope.

pub mod codec;
pub mod constants;
pub mod envelope;
pub mod error;
pub mod protocol;
pub mod types;

pub use codec::{decode_line, encode_line, Chunk, Record};
pub use envelope::MediaEnvelope;
pub use error::{EnvelopeError, ProtocolError};
pub use protocol::{ClientMessage, ServerMessage};
pub use types::{FileRecord, MediaKind};
