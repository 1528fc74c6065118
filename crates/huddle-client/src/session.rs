//! A connected participant: control channel, media sockets and the
//! workers driving them.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use huddle_media::{
    AudioConfig, AudioSink, AudioSource, FrameCodec, FrameSource, RawCodec, UnavailableInput,
    UnavailableOutput, UnavailableSource, VideoConfig,
};
use huddle_shared::constants::{BROADCAST_RECIPIENT, HANDSHAKE_TIMEOUT_SECS};
use huddle_shared::{ClientMessage, FileRecord};

use crate::config::ClientConfig;
use crate::control::{handshake, write_loop, ControlReader};
use crate::error::ClientError;
use crate::events::{emit_event, ClientEvent, EventReceiver, EventSender};
use crate::presenter::PresenterTracker;
use crate::state::MediaControls;
use crate::transfer::{open_upload, send_file, Downloads, UploadSlot};
use crate::workers::{device, AudioReceiver, AudioSender, MediaLink, VideoReceiver, VideoSender};

/// Records queued for the control writer before senders wait.
const CONTROL_QUEUE: usize = 64;

/// Capture, playback and codec capabilities handed to the workers.
pub struct Devices {
    pub camera: Box<dyn FrameSource>,
    pub screen: Box<dyn FrameSource>,
    pub codec: Arc<dyn FrameCodec>,
    pub microphone: Box<dyn AudioSource>,
    pub speaker: Box<dyn AudioSink>,
}

impl Default for Devices {
    /// No hardware: every device reports itself unavailable.
    fn default() -> Self {
        Self {
            camera: Box::new(UnavailableSource),
            screen: Box::new(UnavailableSource),
            codec: Arc::new(RawCodec),
            microphone: Box::new(UnavailableInput),
            speaker: Box::new(UnavailableOutput),
        }
    }
}

pub struct Session {
    username: String,
    controls: MediaControls,
    writer: mpsc::Sender<ClientMessage>,
    downloads: Downloads,
    uploads: UploadSlot,
    events: EventSender,
    cancel: CancellationToken,
    transfers: TaskTracker,
    workers: Vec<(&'static str, JoinHandle<()>)>,
}

impl Session {
    /// Handshake with the server, open both media sockets and start every
    /// worker.
    pub async fn connect(
        config: &ClientConfig,
        devices: Devices,
    ) -> Result<(Self, EventReceiver), ClientError> {
        let control_addr = format!("{}:{}", config.server_host, config.control_port);
        let stream = TcpStream::connect(&control_addr)
            .await
            .map_err(|source| ClientError::Connect {
                addr: control_addr.clone(),
                source,
            })?;
        let (lines, write_half) = handshake(
            stream,
            &config.username,
            Duration::from_secs(HANDSHAKE_TIMEOUT_SECS),
        )
        .await?;

        let video_link = MediaLink::bind(resolve(&config.server_host, config.video_port).await?)
            .await
            .map_err(ClientError::SocketBind)?;
        let audio_link = MediaLink::bind(resolve(&config.server_host, config.audio_port).await?)
            .await
            .map_err(ClientError::SocketBind)?;

        let (events, event_rx) = mpsc::unbounded_channel();
        let (writer, queue) = mpsc::channel(CONTROL_QUEUE);
        let cancel = CancellationToken::new();
        let controls = MediaControls::new();
        let downloads = Downloads::new(config.download_dir.clone());
        let presenter = Arc::new(Mutex::new(PresenterTracker::new()));
        let username = config.username.clone();

        let mut workers = Vec::new();
        workers.push((
            "control-writer",
            tokio::spawn(write_loop(write_half, queue, cancel.clone())),
        ));
        workers.push((
            "control-reader",
            tokio::spawn(
                ControlReader {
                    lines,
                    events: events.clone(),
                    downloads: downloads.clone(),
                    presenter: presenter.clone(),
                }
                .run(cancel.clone()),
            ),
        ));
        workers.push((
            "video-sender",
            tokio::spawn(
                VideoSender {
                    username: username.clone(),
                    link: video_link.clone(),
                    camera: device(devices.camera),
                    screen: device(devices.screen),
                    codec: devices.codec.clone(),
                    controls: controls.clone(),
                    events: events.clone(),
                    config: VideoConfig::default(),
                }
                .run(cancel.clone()),
            ),
        ));
        workers.push((
            "video-receiver",
            tokio::spawn(
                VideoReceiver {
                    link: video_link,
                    codec: devices.codec,
                    presenter,
                    events: events.clone(),
                    recv_timeout: config.recv_timeout,
                }
                .run(cancel.clone()),
            ),
        ));
        workers.push((
            "audio-sender",
            tokio::spawn(
                AudioSender {
                    username: username.clone(),
                    link: audio_link.clone(),
                    microphone: device(devices.microphone),
                    controls: controls.clone(),
                    events: events.clone(),
                    config: AudioConfig::default(),
                }
                .run(cancel.clone()),
            ),
        ));
        workers.push((
            "audio-receiver",
            tokio::spawn(
                AudioReceiver {
                    link: audio_link,
                    speaker: device(devices.speaker),
                    events: events.clone(),
                    recv_timeout: config.recv_timeout,
                }
                .run(cancel.clone()),
            ),
        ));

        info!(user = %username, server = %control_addr, "Session started");
        emit_event(&events, ClientEvent::Connected);

        let session = Self {
            username,
            controls,
            writer,
            downloads,
            uploads: UploadSlot::new(),
            events,
            cancel,
            transfers: TaskTracker::new(),
            workers,
        };
        Ok((session, event_rx))
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn controls(&self) -> &MediaControls {
        &self.controls
    }

    /// False once the control channel has gone away or shutdown started.
    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    async fn send(&self, msg: ClientMessage) -> Result<(), ClientError> {
        if self.cancel.is_cancelled() {
            return Err(ClientError::Disconnected);
        }
        self.writer
            .send(msg)
            .await
            .map_err(|_| ClientError::Disconnected)
    }

    /// Chat to everyone (`to == None`) or privately to one user.
    pub async fn send_chat(&self, to: Option<&str>, msg: &str) -> Result<(), ClientError> {
        self.send(ClientMessage::Chat {
            to: to.unwrap_or(BROADCAST_RECIPIENT).to_string(),
            msg: msg.to_string(),
        })
        .await
    }

    pub async fn request_user_list(&self) -> Result<(), ClientError> {
        self.send(ClientMessage::ListUsers).await
    }

    pub async fn request_file_list(&self) -> Result<(), ClientError> {
        self.send(ClientMessage::RequestFileList).await
    }

    /// Start uploading `path` in the background. Progress arrives as
    /// [`ClientEvent::UploadProgress`].
    ///
    /// Only one upload runs at a time; while one is sending this returns
    /// [`ClientError::TransferBusy`].
    pub async fn upload_file(&self, path: &Path) -> Result<(), ClientError> {
        if self.cancel.is_cancelled() {
            return Err(ClientError::Disconnected);
        }
        let (file, filename, total) = open_upload(path).await?;
        let guard = self.uploads.claim(&filename)?;
        info!(file = %filename, bytes = total, "Starting upload");

        let writer = self.writer.clone();
        let events = self.events.clone();
        let cancel = self.cancel.clone();
        self.transfers.spawn(async move {
            let _guard = guard;
            if let Err(e) = send_file(file, filename.clone(), total, writer, events.clone(), cancel).await {
                warn!(file = %filename, error = %e, "Upload failed");
                emit_event(&events, ClientEvent::Error(format!("Upload of {filename} failed: {e}")));
            }
        });
        Ok(())
    }

    /// Name of the upload currently being sent, if any.
    pub fn active_upload(&self) -> Option<String> {
        self.uploads.current()
    }

    /// Ask the server for `record`. Returns where it will be saved.
    ///
    /// Fails with [`ClientError::TransferBusy`] until the previous download
    /// has ended.
    pub async fn download_file(&self, record: &FileRecord) -> Result<PathBuf, ClientError> {
        if self.cancel.is_cancelled() {
            return Err(ClientError::Disconnected);
        }
        let path = self.downloads.begin(record).await?;
        let request = ClientMessage::DownloadRequest {
            filename: record.filename.clone(),
        };
        if let Err(e) = self.send(request).await {
            self.downloads.abandon().await;
            return Err(e);
        }
        Ok(path)
    }

    pub fn set_video_enabled(&self, on: bool) {
        self.controls.set_video_enabled(on);
    }

    pub fn set_audio_enabled(&self, on: bool) {
        self.controls.set_audio_enabled(on);
    }

    pub fn set_screen_share(&self, on: bool) {
        self.controls.set_screen_share(on);
    }

    /// Stop every worker and wait for them to finish.
    pub async fn shutdown(self) {
        info!(user = %self.username, "Shutting down session");
        self.cancel.cancel();

        self.transfers.close();
        self.transfers.wait().await;

        let (names, handles): (Vec<_>, Vec<_>) = self.workers.into_iter().unzip();
        for (name, result) in names.into_iter().zip(join_all(handles).await) {
            if let Err(e) = result {
                warn!(worker = name, error = %e, "Worker ended abnormally");
            }
        }
        info!("Session closed");
    }
}

async fn resolve(host: &str, port: u16) -> Result<SocketAddr, ClientError> {
    tokio::net::lookup_host((host, port))
        .await
        .map_err(|_| ClientError::Resolve(format!("{host}:{port}")))?
        .next()
        .ok_or_else(|| ClientError::Resolve(format!("{host}:{port}")))
}
