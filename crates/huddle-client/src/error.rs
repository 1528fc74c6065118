use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Username rejected: {0}")]
    HandshakeRejected(String),

    #[error("Server closed the connection during the handshake")]
    HandshakeAborted,

    #[error("Could not connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not resolve {0}")]
    Resolve(String),

    #[error("Could not open media socket: {0}")]
    SocketBind(#[source] std::io::Error),

    #[error("Not connected")]
    Disconnected,

    #[error("Not a file: {0}")]
    NotAFile(String),

    #[error("{0} is still transferring")]
    TransferBusy(String),

    #[error("Handshake timed out")]
    HandshakeTimeout,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
