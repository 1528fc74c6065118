//! Client side of chunked file transfer.
//!
//! Chunks carry no filename and the server keeps one upload sink per
//! connection, so a session runs at most one upload and one download at a
//! time. A second request is refused with [`ClientError::TransferBusy`].

use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError};

use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use huddle_shared::constants::FILE_CHUNK_SIZE;
use huddle_shared::{Chunk, ClientMessage, FileRecord, ServerMessage};

use crate::error::ClientError;
use crate::events::{emit_event, ClientEvent, EventSender};

#[derive(Debug)]
struct Download {
    filename: String,
    path: PathBuf,
    file: File,
    received: u64,
    total: u64,
    /// Set after a local write error; the rest of the stream is discarded.
    failed: bool,
}

/// The single download slot fed by the control reader.
#[derive(Debug, Clone)]
pub struct Downloads {
    dir: PathBuf,
    active: Arc<Mutex<Option<Download>>>,
}

impl Downloads {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            active: Arc::new(Mutex::new(None)),
        }
    }

    /// Prepare to receive `record` into the download directory.
    ///
    /// Fails while another download is still streaming.
    pub async fn begin(&self, record: &FileRecord) -> Result<PathBuf, ClientError> {
        let name = local_name(&record.filename)?;

        let mut active = self.active.lock().await;
        if let Some(current) = active.as_ref() {
            return Err(ClientError::TransferBusy(current.filename.clone()));
        }

        fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(name);
        let file = File::create(&path).await?;
        *active = Some(Download {
            filename: record.filename.clone(),
            path: path.clone(),
            file,
            received: 0,
            total: record.size,
            failed: false,
        });
        Ok(path)
    }

    /// Whether a download is waiting for its `file_end`.
    pub async fn is_active(&self) -> bool {
        self.active.lock().await.is_some()
    }

    pub async fn on_chunk(&self, data: &[u8], events: &EventSender) {
        let mut active = self.active.lock().await;
        let Some(download) = active.as_mut() else {
            debug!(bytes = data.len(), "Chunk with no active download");
            return;
        };
        if download.failed {
            return;
        }

        if let Err(e) = download.file.write_all(data).await {
            warn!(file = %download.filename, error = %e, "Download write failed");
            emit_event(
                events,
                ClientEvent::Error(format!("Could not save {}: {e}", download.filename)),
            );
            // Hold the slot until the server's stream ends.
            download.failed = true;
            return;
        }

        download.received += data.len() as u64;
        emit_event(
            events,
            ClientEvent::DownloadProgress {
                filename: download.filename.clone(),
                received: download.received,
                total: download.total,
            },
        );
    }

    pub async fn on_end(&self, filename: &str, events: &EventSender) {
        let Some(mut download) = self.active.lock().await.take() else {
            debug!(file = %filename, "file_end with no active download");
            return;
        };
        if download.failed {
            debug!(file = %download.filename, "Discarded stream finished");
            return;
        }

        if let Err(e) = download.file.flush().await {
            warn!(file = %download.filename, error = %e, "Download flush failed");
            emit_event(
                events,
                ClientEvent::Error(format!("Could not save {}: {e}", download.filename)),
            );
            return;
        }

        info!(
            file = %download.filename,
            bytes = download.received,
            path = %download.path.display(),
            "Download complete"
        );
        emit_event(
            events,
            ClientEvent::DownloadComplete {
                filename: download.filename,
                path: download.path,
            },
        );
    }

    /// Free the slot if `msg` reports that the pending download will never
    /// get its `file_end`.
    pub async fn on_error(&self, msg: &ServerMessage) {
        let mut active = self.active.lock().await;
        let aborted = matches!(active.as_ref(), Some(d) if msg.aborts_download(&d.filename));
        if !aborted {
            return;
        }
        if let Some(download) = active.take() {
            info!(file = %download.filename, received = download.received, "Download failed on server");
            drop(download.file);
            if let Err(e) = fs::remove_file(&download.path).await {
                debug!(path = %download.path.display(), error = %e, "Could not remove partial download");
            }
        }
    }

    pub async fn abandon(&self) {
        if let Some(download) = self.active.lock().await.take() {
            debug!(file = %download.filename, received = download.received, "Download abandoned");
        }
    }
}

/// The session's single upload slot.
#[derive(Debug, Clone, Default)]
pub struct UploadSlot {
    active: Arc<std::sync::Mutex<Option<String>>>,
}

impl UploadSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the slot for `filename`. It frees itself when the returned
    /// guard drops.
    pub fn claim(&self, filename: &str) -> Result<UploadGuard, ClientError> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(current) = active.as_ref() {
            return Err(ClientError::TransferBusy(current.clone()));
        }
        *active = Some(filename.to_string());
        Ok(UploadGuard { slot: self.clone() })
    }

    pub fn current(&self) -> Option<String> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[derive(Debug)]
pub struct UploadGuard {
    slot: UploadSlot,
}

impl Drop for UploadGuard {
    fn drop(&mut self) {
        self.slot
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

/// Final path component of a server-supplied name.
fn local_name(filename: &str) -> Result<&str, ClientError> {
    match Path::new(filename).file_name().and_then(|n| n.to_str()) {
        Some(name) if name != ".." => Ok(name),
        _ => Err(ClientError::NotAFile(filename.to_string())),
    }
}

/// Open `path` for upload. Returns the file, its announced name and size.
pub async fn open_upload(path: &Path) -> Result<(File, String, u64), ClientError> {
    let meta = fs::metadata(path).await?;
    if !meta.is_file() {
        return Err(ClientError::NotAFile(path.display().to_string()));
    }
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| ClientError::NotAFile(path.display().to_string()))?
        .to_string();
    let file = File::open(path).await?;
    Ok((file, filename, meta.len()))
}

/// Stream an opened file to the server as `upload_start`, `file_chunk`s
/// and `file_end`.
pub async fn send_file(
    mut file: File,
    filename: String,
    total: u64,
    writer: mpsc::Sender<ClientMessage>,
    events: EventSender,
    cancel: CancellationToken,
) -> Result<(), ClientError> {
    let send = |msg| {
        let writer = writer.clone();
        async move { writer.send(msg).await.map_err(|_| ClientError::Disconnected) }
    };

    send(ClientMessage::UploadStart {
        filename: filename.clone(),
        size: total,
    })
    .await?;

    let mut buf = vec![0u8; FILE_CHUNK_SIZE];
    let mut sent: u64 = 0;
    loop {
        let n = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(file = %filename, sent, "Upload interrupted");
                return Ok(());
            }
            r = file.read(&mut buf) => r?,
        };
        if n == 0 {
            break;
        }

        send(ClientMessage::FileChunk {
            data: Chunk(buf[..n].to_vec()),
        })
        .await?;
        sent += n as u64;
        emit_event(
            &events,
            ClientEvent::UploadProgress {
                filename: filename.clone(),
                sent,
                total,
            },
        );
    }

    send(ClientMessage::FileEnd {
        filename: filename.clone(),
    })
    .await?;
    info!(file = %filename, bytes = sent, "Upload sent");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_download_writes_chunks_in_order() {
        let dir = TempDir::new().unwrap();
        let downloads = Downloads::new(dir.path().join("dl"));
        let (events, mut rx) = mpsc::unbounded_channel();

        let record = FileRecord::new("note.txt", 10, "alice");
        let path = downloads.begin(&record).await.unwrap();
        downloads.on_chunk(b"01234", &events).await;
        downloads.on_chunk(b"56789", &events).await;
        downloads.on_end("note.txt", &events).await;

        assert_eq!(std::fs::read(&path).unwrap(), b"0123456789");

        let mut last = None;
        while let Ok(event) = rx.try_recv() {
            last = Some(event);
        }
        assert!(matches!(
            last,
            Some(ClientEvent::DownloadComplete { filename, .. }) if filename == "note.txt"
        ));
    }

    #[tokio::test]
    async fn test_stray_chunk_is_ignored() {
        let dir = TempDir::new().unwrap();
        let downloads = Downloads::new(dir.path().to_path_buf());
        let (events, mut rx) = mpsc::unbounded_channel();

        downloads.on_chunk(b"junk", &events).await;
        downloads.on_end("x", &events).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_file_framing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("big.bin");
        std::fs::write(&path, vec![9u8; FILE_CHUNK_SIZE + 10]).unwrap();

        let (file, filename, total) = open_upload(&path).await.unwrap();
        let (writer, mut queue) = mpsc::channel(16);
        let (events, _rx) = mpsc::unbounded_channel();
        send_file(file, filename, total, writer, events, CancellationToken::new())
            .await
            .unwrap();

        let mut records = Vec::new();
        while let Ok(msg) = queue.try_recv() {
            records.push(msg);
        }
        assert_eq!(
            records.first(),
            Some(&ClientMessage::UploadStart {
                filename: "big.bin".into(),
                size: (FILE_CHUNK_SIZE + 10) as u64
            })
        );
        let chunk_bytes: usize = records
            .iter()
            .filter_map(|m| match m {
                ClientMessage::FileChunk { data } => Some(data.len()),
                _ => None,
            })
            .sum();
        assert_eq!(chunk_bytes, FILE_CHUNK_SIZE + 10);
        assert_eq!(
            records.last(),
            Some(&ClientMessage::FileEnd {
                filename: "big.bin".into()
            })
        );
    }

    #[tokio::test]
    async fn test_second_download_refused_until_end() {
        let dir = TempDir::new().unwrap();
        let downloads = Downloads::new(dir.path().to_path_buf());
        let (events, _rx) = mpsc::unbounded_channel();

        let big = downloads.begin(&FileRecord::new("big.bin", 6, "a")).await.unwrap();
        let refused = downloads.begin(&FileRecord::new("small.txt", 5, "a")).await;
        assert!(matches!(refused, Err(ClientError::TransferBusy(name)) if name == "big.bin"));

        downloads.on_chunk(b"XXXXXX", &events).await;
        downloads.on_end("big.bin", &events).await;
        assert_eq!(std::fs::read(&big).unwrap(), b"XXXXXX");

        let small = downloads.begin(&FileRecord::new("small.txt", 5, "a")).await.unwrap();
        downloads.on_chunk(b"hello", &events).await;
        downloads.on_end("small.txt", &events).await;
        assert_eq!(std::fs::read(&small).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_missing_file_frees_download_slot() {
        let dir = TempDir::new().unwrap();
        let downloads = Downloads::new(dir.path().to_path_buf());

        let path = downloads.begin(&FileRecord::new("gone.txt", 3, "a")).await.unwrap();
        downloads.on_error(&ServerMessage::error("User 'x' not found.")).await;
        assert!(downloads.is_active().await);

        downloads.on_error(&ServerMessage::file_not_found("gone.txt")).await;
        assert!(!downloads.is_active().await);
        assert!(!path.exists());
    }

    #[test]
    fn test_upload_slot_holds_one_upload() {
        let slot = UploadSlot::new();
        let guard = slot.claim("a.bin").unwrap();
        assert!(matches!(slot.claim("b.bin"), Err(ClientError::TransferBusy(name)) if name == "a.bin"));
        assert_eq!(slot.current().as_deref(), Some("a.bin"));

        drop(guard);
        assert!(slot.current().is_none());
        assert!(slot.claim("b.bin").is_ok());
    }

    #[test]
    fn test_local_name_strips_directories() {
        assert_eq!(local_name("a/b/c.txt").unwrap(), "c.txt");
        assert!(local_name("..").is_err());
        assert!(local_name("").is_err());
    }
}
