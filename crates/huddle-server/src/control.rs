//! TCP control server: handshake, chat dispatch and file transfer.
//!
//! Each accepted connection gets one reader (the handler below) and one
//! writer task. Everything bound for a client, whether a reply, a fan-out
//! from another handler, or a download chunk, is queued as a whole record
//! on that connection's [`Outbound`] channel, so lines never interleave.

use std::net::SocketAddr;
use std::time::Duration;

use futures::StreamExt;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use huddle_shared::constants::{
    BROADCAST_RECIPIENT, FILE_CHUNK_SIZE, HANDSHAKE_ACCEPTED, HANDSHAKE_PROMPT,
    HANDSHAKE_REJECTED, HANDSHAKE_TIMEOUT_SECS, MAX_LINE_LENGTH, SYSTEM_SENDER,
};
use huddle_shared::{decode_line, encode_line, Chunk, ClientMessage, ProtocolError, ServerMessage};

use crate::directory::{deliver, ClaimError, Outbound, UserDirectory};
use crate::error::ServerError;
use crate::file_store::{FileStore, UploadSink};

/// Records queued per connection. Fan-out from other handlers that finds
/// this full disconnects the connection.
const OUTBOUND_QUEUE: usize = 256;

type LineReader = FramedRead<tokio::net::tcp::OwnedReadHalf, LinesCodec>;

pub struct ControlServer {
    listener: TcpListener,
    directory: UserDirectory,
    store: FileStore,
    handshake_timeout: Duration,
}

impl ControlServer {
    pub async fn bind(
        addr: SocketAddr,
        directory: UserDirectory,
        store: FileStore,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "Control server listening");
        Ok(Self {
            listener,
            directory,
            store,
            handshake_timeout: Duration::from_secs(HANDSHAKE_TIMEOUT_SECS),
        })
    }

    /// Drop connections that have not sent a username within `timeout`.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn directory(&self) -> &UserDirectory {
        &self.directory
    }

    /// Accept connections until `cancel` fires, then wait for every
    /// connection handler to finish.
    pub async fn run(self, cancel: CancellationToken) {
        let tracker = TaskTracker::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Control server shutting down");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        debug!(addr = %addr, "Accepted control connection");
                        let directory = self.directory.clone();
                        let store = self.store.clone();
                        let cancel = cancel.child_token();
                        let conn_tracker = tracker.clone();
                        let handshake_timeout = self.handshake_timeout;
                        tracker.spawn(async move {
                            handle_connection(
                                stream,
                                addr,
                                directory,
                                store,
                                handshake_timeout,
                                cancel,
                                conn_tracker,
                            )
                            .await;
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to accept connection");
                    }
                }
            }
        }

        tracker.close();
        tracker.wait().await;
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    directory: UserDirectory,
    store: FileStore,
    handshake_timeout: Duration,
    cancel: CancellationToken,
    tracker: TaskTracker,
) {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = FramedRead::new(read_half, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));

    let (outbound, queue) = mpsc::channel(OUTBOUND_QUEUE);
    let greeting = Greeting {
        addr,
        directory: &directory,
        outbound: &outbound,
        timeout: handshake_timeout,
        cancel: &cancel,
    };
    let username = match greeting.run(&mut lines, &mut write_half).await {
        Some(name) => name,
        None => return,
    };

    tracker.spawn(write_loop(write_half, queue, username.clone(), cancel.clone()));

    directory
        .broadcast(
            &ServerMessage::chat(
                SYSTEM_SENDER,
                format!("--- {username} has joined the chat. ---"),
                false,
            ),
            None,
        )
        .await;
    directory.broadcast_user_list().await;

    let mut conn = Connection {
        username,
        directory,
        store,
        outbound,
        upload: None,
        cancel,
        tracker,
    };
    conn.read_loop(&mut lines).await;
    conn.close().await;
}

/// What the handshake needs besides the socket halves.
struct Greeting<'a> {
    addr: SocketAddr,
    directory: &'a UserDirectory,
    outbound: &'a Outbound,
    /// Limit on waiting for the username line.
    timeout: Duration,
    cancel: &'a CancellationToken,
}

impl Greeting<'_> {
    /// Prompt for a username and claim it. Returns the claimed name, or
    /// `None` after rejecting (or losing) the client.
    async fn run(self, lines: &mut LineReader, writer: &mut OwnedWriteHalf) -> Option<String> {
        let addr = self.addr;
        if let Err(e) = writer.write_all(format!("{HANDSHAKE_PROMPT}\n").as_bytes()).await {
            debug!(addr = %addr, error = %e, "Client left before handshake");
            return None;
        }

        let reply = tokio::select! {
            _ = self.cancel.cancelled() => return None,
            line = tokio::time::timeout(self.timeout, lines.next()) => match line {
                Ok(line) => line,
                Err(_) => {
                    info!(addr = %addr, "Handshake timed out");
                    return None;
                }
            },
        };
        let username = match reply {
            Some(Ok(line)) => line.trim().to_string(),
            Some(Err(e)) => {
                debug!(addr = %addr, error = %e, "Handshake read failed");
                return None;
            }
            None => return None,
        };

        let claimed = self
            .directory
            .claim(&username, addr, self.outbound.clone(), self.cancel.clone())
            .await;
        if let Err(e) = claimed {
            match e {
                ClaimError::Empty => info!(addr = %addr, "Rejected empty username"),
                ClaimError::Taken(_) => {
                    info!(addr = %addr, user = %username, "Rejected duplicate username")
                }
            }
            let _ = writer
                .write_all(format!("{HANDSHAKE_REJECTED}\n").as_bytes())
                .await;
            let _ = writer.shutdown().await;
            return None;
        }

        if let Err(e) = writer
            .write_all(format!("{HANDSHAKE_ACCEPTED}\n").as_bytes())
            .await
        {
            debug!(user = %username, error = %e, "Client left during handshake");
            self.directory.release(&username).await;
            return None;
        }

        info!(user = %username, addr = %addr, "User joined");
        Some(username)
    }
}

/// Drain one connection's queue onto the socket.
async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut queue: mpsc::Receiver<ServerMessage>,
    username: String,
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
                error!(user = %username, error = %e, "Failed to encode record");
                continue;
            }
        };
        let written = tokio::select! {
            _ = cancel.cancelled() => break,
            r = writer.write_all(line.as_bytes()) => r,
        };
        if let Err(e) = written {
            debug!(user = %username, error = %e, "Control write failed");
            cancel.cancel();
            break;
        }
    }
    let _ = writer.shutdown().await;
}

/// Per-connection handler state after a successful handshake.
struct Connection {
    username: String,
    directory: UserDirectory,
    store: FileStore,
    outbound: Outbound,
    upload: Option<UploadSink>,
    /// Cancelled when this connection goes away; stops its download tasks.
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl Connection {
    async fn read_loop(&mut self, lines: &mut LineReader) {
        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => break,
                line = lines.next() => line,
            };

            let line = match next {
                Some(Ok(line)) => line,
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                    warn!(user = %self.username, "Discarding oversize control line");
                    continue;
                }
                Some(Err(LinesCodecError::Io(e))) => {
                    debug!(user = %self.username, error = %e, "Control read failed");
                    break;
                }
                None => break,
            };

            if line.trim().is_empty() {
                continue;
            }

            match decode_line::<ClientMessage>(&line) {
                Ok(msg) => self.dispatch(msg).await,
                Err(ProtocolError::UnknownKind(kind)) => {
                    warn!(user = %self.username, kind = %kind, "Ignoring unknown record kind");
                }
                Err(e) => {
                    warn!(user = %self.username, error = %e, "Ignoring malformed record");
                }
            }
        }
    }

    async fn dispatch(&mut self, msg: ClientMessage) {
        match msg {
            ClientMessage::Chat { to, msg } => self.chat(to, msg).await,
            ClientMessage::ListUsers => {
                let users = self.directory.usernames().await;
                self.reply(ServerMessage::UserList { users }).await;
            }
            ClientMessage::UploadStart { filename, size } => {
                self.upload_start(&filename, size).await
            }
            ClientMessage::FileChunk { data } => self.upload_chunk(data).await,
            ClientMessage::FileEnd { filename } => self.upload_end(&filename).await,
            ClientMessage::DownloadRequest { filename } => self.download(&filename).await,
            ClientMessage::RequestFileList => {
                let files = self.store.list().await;
                self.reply(ServerMessage::FileListUpdate { files }).await;
            }
        }
    }

    async fn reply(&self, msg: ServerMessage) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = deliver(&self.username, &self.outbound, msg) => {}
        }
    }

    async fn chat(&self, to: String, body: String) {
        let from = self.username.as_str();

        if to == BROADCAST_RECIPIENT {
            info!(target: "huddle::chat", from = %from, "(Broadcast) {body}");
            self.directory
                .broadcast(&ServerMessage::chat(from, body, false), Some(from))
                .await;
            return;
        }

        info!(target: "huddle::chat", from = %from, to = %to, "(Private) {body}");
        let msg = ServerMessage::chat(from, body, true);
        if self.directory.send_to(&to, msg.clone()).await {
            if to != from {
                self.reply(msg).await;
            }
        } else {
            self.reply(ServerMessage::error(format!("User '{to}' not found.")))
                .await;
        }
    }

    async fn upload_start(&mut self, filename: &str, size: u64) {
        if let Some(previous) = self.upload.take() {
            debug!(user = %self.username, file = %previous.filename(), "Replacing unfinished upload");
            self.store.abort_upload(previous).await;
        }

        match self.store.begin_upload(filename, size).await {
            Ok(sink) => {
                info!(user = %self.username, file = %sink.filename(), size, "Upload started");
                self.upload = Some(sink);
            }
            Err(e) => self.fail_upload(e).await,
        }
    }

    async fn upload_chunk(&mut self, data: Chunk) {
        let Some(sink) = self.upload.as_mut() else {
            debug!(user = %self.username, "Chunk without an open upload");
            return;
        };

        if let Err(e) = self.store.write_chunk(sink, &data.0).await {
            if let Some(sink) = self.upload.take() {
                self.store.abort_upload(sink).await;
            }
            self.fail_upload(e).await;
        }
    }

    async fn upload_end(&mut self, filename: &str) {
        let Some(sink) = self.upload.take() else {
            debug!(user = %self.username, file = %filename, "file_end without an open upload");
            return;
        };
        if sink.filename() != filename {
            warn!(
                user = %self.username,
                announced = %sink.filename(),
                ended = %filename,
                "file_end name differs from upload_start; keeping announced name"
            );
        }

        match self.store.finish_upload(sink, &self.username).await {
            Ok(record) => {
                self.directory
                    .broadcast(&ServerMessage::NewFileAvailable(record), Some(&self.username))
                    .await;
            }
            Err(e) => self.fail_upload(e).await,
        }
    }

    async fn fail_upload(&self, e: ServerError) {
        warn!(user = %self.username, error = %e, "Upload failed");
        self.reply(e.client_message()).await;
    }

    async fn download(&self, filename: &str) {
        match self.store.open_download(filename).await {
            Ok((filename, file)) => {
                info!(user = %self.username, file = %filename, "Download started");
                self.tracker.spawn(send_file(
                    self.username.clone(),
                    filename,
                    file,
                    self.outbound.clone(),
                    self.cancel.clone(),
                ));
            }
            Err(e @ (ServerError::FileNotFound(_) | ServerError::InvalidFilename(_))) => {
                debug!(user = %self.username, error = %e, "Download refused");
                self.reply(ServerMessage::file_not_found(filename)).await;
            }
            Err(e) => {
                warn!(user = %self.username, file = %filename, error = %e, "Download failed to open");
                self.reply(ServerMessage::transfer_failed("server could not open the file")).await;
            }
        }
    }

    /// Release the username, drop any half-open upload and tell everyone.
    async fn close(mut self) {
        self.cancel.cancel();
        if let Some(sink) = self.upload.take() {
            self.store.abort_upload(sink).await;
        }

        if self.directory.release(&self.username).await {
            info!(user = %self.username, "User left");
            self.directory
                .broadcast(
                    &ServerMessage::chat(
                        SYSTEM_SENDER,
                        format!("--- {} has left the chat. ---", self.username),
                        false,
                    ),
                    None,
                )
                .await;
            self.directory.broadcast_user_list().await;
        }
    }
}

/// Stream one stored file to one connection as `file_chunk` records
/// followed by `file_end`.
async fn send_file(
    username: String,
    filename: String,
    mut file: File,
    outbound: Outbound,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; FILE_CHUNK_SIZE];
    let mut sent: u64 = 0;

    loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => return,
            r = fill_chunk(&mut file, &mut buf) => r,
        };

        match read {
            Ok(0) => break,
            Ok(n) => {
                let chunk = ServerMessage::FileChunk {
                    data: Chunk(buf[..n].to_vec()),
                };
                let delivered = tokio::select! {
                    _ = cancel.cancelled() => return,
                    ok = deliver(&username, &outbound, chunk) => ok,
                };
                if !delivered {
                    return;
                }
                sent += n as u64;
            }
            Err(e) => {
                warn!(user = %username, file = %filename, error = %e, "Download read failed");
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = deliver(&username, &outbound, ServerMessage::transfer_failed(e)) => {}
                }
                return;
            }
        }
    }

    let end = ServerMessage::FileEnd {
        filename: filename.clone(),
    };
    tokio::select! {
        _ = cancel.cancelled() => return,
        _ = deliver(&username, &outbound, end) => {}
    }
    info!(user = %username, file = %filename, bytes = sent, "Download finished");
}

/// Read until `buf` is full or the file ends.
async fn fill_chunk(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
