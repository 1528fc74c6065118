use thiserror::Error;

use huddle_shared::ServerMessage;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Invalid filename: {0:?}")]
    InvalidFilename(String),

    #[error("Upload too large: {size} bytes (max {max})")]
    UploadTooLarge { size: u64, max: u64 },

    #[error("File storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// The `error` record sent to the affected client.
    ///
    /// Storage and I/O details stay in the server log.
    pub fn client_message(&self) -> ServerMessage {
        match self {
            ServerError::FileNotFound(name) => ServerMessage::file_not_found(name),
            ServerError::InvalidFilename(_) | ServerError::UploadTooLarge { .. } => {
                ServerMessage::error(self.to_string())
            }
            ServerError::Storage(_) | ServerError::Io(_) => {
                ServerMessage::error("Server failed to store file.")
            }
        }
    }
}
