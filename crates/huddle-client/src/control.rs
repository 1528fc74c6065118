//! Client end of the control channel.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use huddle_shared::constants::{HANDSHAKE_ACCEPTED, MAX_LINE_LENGTH};
use huddle_shared::{decode_line, encode_line, ClientMessage, ServerMessage};

use crate::error::ClientError;
use crate::events::{emit_event, ClientEvent, EventSender};
use crate::presenter::PresenterTracker;
use crate::transfer::Downloads;

pub type LineReader = FramedRead<OwnedReadHalf, LinesCodec>;

/// Claim `username` on an open control connection, giving up after
/// `timeout`.
///
/// The reader returned keeps any bytes the server sent right after the
/// acceptance line.
pub async fn handshake(
    stream: TcpStream,
    username: &str,
    timeout: Duration,
) -> Result<(LineReader, OwnedWriteHalf), ClientError> {
    tokio::time::timeout(timeout, claim_username(stream, username))
        .await
        .map_err(|_| ClientError::HandshakeTimeout)?
}

async fn claim_username(
    stream: TcpStream,
    username: &str,
) -> Result<(LineReader, OwnedWriteHalf), ClientError> {
    let (read_half, mut writer) = stream.into_split();
    let mut lines = FramedRead::new(read_half, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));

    let prompt = next_handshake_line(&mut lines).await?;
    debug!(prompt = %prompt, "Server prompt");

    writer.write_all(format!("{username}\n").as_bytes()).await?;

    let verdict = next_handshake_line(&mut lines).await?;
    if verdict.trim() != HANDSHAKE_ACCEPTED {
        return Err(ClientError::HandshakeRejected(verdict.trim().to_string()));
    }

    info!(user = %username, "Username accepted");
    Ok((lines, writer))
}

async fn next_handshake_line(lines: &mut LineReader) -> Result<String, ClientError> {
    match lines.next().await {
        Some(Ok(line)) => Ok(line),
        Some(Err(LinesCodecError::Io(e))) => Err(ClientError::Io(e)),
        Some(Err(LinesCodecError::MaxLineLengthExceeded)) | None => {
            Err(ClientError::HandshakeAborted)
        }
    }
}

/// Serialize queued records onto the socket, one whole line at a time.
pub async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut queue: mpsc::Receiver<ClientMessage>,
    cancel: CancellationToken,
) {
    loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => break,
            msg = queue.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };

        let line = match encode_line(&msg) {
            Ok(line) => line,
            Err(e) => {
                error!(error = %e, "Failed to encode record");
                continue;
            }
        };
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            warn!(error = %e, "Control write failed");
            cancel.cancel();
            break;
        }
    }
    let _ = writer.shutdown().await;
    debug!("Control writer stopped");
}

/// Dispatches server records to events until the connection ends.
pub struct ControlReader {
    pub(crate) lines: LineReader,
    pub(crate) events: EventSender,
    pub(crate) downloads: Downloads,
    pub(crate) presenter: Arc<Mutex<PresenterTracker>>,
}

impl ControlReader {
    pub async fn run(mut self, cancel: CancellationToken) {
        let reason = loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break None,
                line = self.lines.next() => line,
            };

            let line = match next {
                Some(Ok(line)) => line,
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                    warn!("Discarding oversize control line");
                    continue;
                }
                Some(Err(LinesCodecError::Io(e))) => break Some(format!("Connection error: {e}")),
                None => break Some("Server closed the connection".to_string()),
            };

            match decode_line::<ServerMessage>(&line) {
                Ok(msg) => self.dispatch(msg).await,
                Err(e) => warn!(error = %e, "Ignoring bad record from server"),
            }
        };

        self.downloads.abandon().await;
        if let Some(reason) = reason {
            info!(reason = %reason, "Disconnected");
            emit_event(&self.events, ClientEvent::Disconnected { reason });
            // The whole session goes down with its control channel.
            cancel.cancel();
        }
    }

    async fn dispatch(&self, msg: ServerMessage) {
        match msg {
            ServerMessage::UserList { users } => {
                let changed = self
                    .presenter
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .retain_peers(&users);
                emit_event(&self.events, ClientEvent::UserList(users));
                if let Some(presenter) = changed {
                    emit_event(&self.events, ClientEvent::PresenterChanged(presenter));
                }
            }
            ServerMessage::ChatMessage { from, msg, private } => {
                emit_event(&self.events, ClientEvent::Chat { from, msg, private });
            }
            ServerMessage::NewFileAvailable(record) => {
                emit_event(&self.events, ClientEvent::FileOffer(record));
            }
            ServerMessage::FileListUpdate { files } => {
                emit_event(&self.events, ClientEvent::FileList(files));
            }
            ServerMessage::FileChunk { data } => {
                self.downloads.on_chunk(&data.0, &self.events).await;
            }
            ServerMessage::FileEnd { filename } => {
                self.downloads.on_end(&filename, &self.events).await;
            }
            error @ ServerMessage::Error { .. } => {
                self.downloads.on_error(&error).await;
                if let ServerMessage::Error { msg } = error {
                    emit_event(&self.events, ClientEvent::Error(msg));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_silent_server_times_out_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            // Accept and then never send the prompt.
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(stream);
        });

        let stream = TcpStream::connect(addr).await.unwrap();
        let result = handshake(stream, "alice", Duration::from_millis(200)).await;
        assert!(matches!(result, Err(ClientError::HandshakeTimeout)));
        server.abort();
    }

    #[tokio::test]
    async fn test_rejection_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(b"Enter username:\n").await.unwrap();
            let mut buf = [0u8; 64];
            let _ = tokio::io::AsyncReadExt::read(&mut stream, &mut buf).await;
            stream.write_all(b"Username is empty or already taken.\n").await.unwrap();
        });

        let stream = TcpStream::connect(addr).await.unwrap();
        let result = handshake(stream, "alice", Duration::from_secs(2)).await;
        assert!(matches!(
            result,
            Err(ClientError::HandshakeRejected(msg)) if msg == "Username is empty or already taken."
        ));
    }
}
