use std::path::PathBuf;

use tokio::sync::mpsc;

use huddle_media::VideoFrame;
use huddle_shared::{FileRecord, MediaKind};

/// Everything the session reports to the presentation layer.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Connected,
    Disconnected { reason: String },
    /// A recoverable problem the user should see
    Error(String),

    UserList(Vec<String>),
    Chat {
        from: String,
        msg: String,
        private: bool,
    },

    /// Someone else finished uploading a file
    FileOffer(FileRecord),
    FileList(Vec<FileRecord>),
    UploadProgress {
        filename: String,
        sent: u64,
        total: u64,
    },
    DownloadProgress {
        filename: String,
        received: u64,
        total: u64,
    },
    DownloadComplete {
        filename: String,
        path: PathBuf,
    },

    /// Self-preview: the raw frame just sent, or `None`
    LocalFrame(Option<VideoFrame>),
    RemoteFrame {
        sender: String,
        frame: Option<VideoFrame>,
        kind: MediaKind,
    },
    PresenterChanged(Option<String>),
}

pub type EventSender = mpsc::UnboundedSender<ClientEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<ClientEvent>;

pub fn emit_event(events: &EventSender, event: ClientEvent) {
    if events.send(event).is_err() {
        tracing::debug!("Dropping event, no listener");
    }
}
