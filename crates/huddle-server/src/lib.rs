//! # huddle-server
//!
//! LAN session server. One process hosts three independent roles:
//! - **Control server** (TCP): username handshake, chat dispatch, and
//!   chunked file upload / download against a storage directory
//! - **Video relay** (UDP): fans video envelopes out to every fresh peer
//! - **Audio relay** (UDP): same, with its own port and timeout
//!
//! The roles share nothing at runtime; they only share a cancellation
//! token so they stop together.

pub mod config;
pub mod control;
pub mod directory;
pub mod error;
pub mod file_store;
pub mod relay;

use std::net::SocketAddr;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

pub use config::ServerConfig;
pub use control::ControlServer;
pub use directory::UserDirectory;
pub use error::ServerError;
pub use file_store::FileStore;
pub use relay::{MediaRelay, MembershipTable};

/// All three roles, bound and ready to run.
pub struct Server {
    control: ControlServer,
    video: MediaRelay,
    audio: MediaRelay,
}

impl Server {
    /// Open storage and bind every socket described by `config`.
    pub async fn bind(config: &ServerConfig) -> Result<Self, ServerError> {
        let store = FileStore::open(config.storage_dir.clone(), config.max_upload_size).await?;
        let control = ControlServer::bind(config.control_addr(), UserDirectory::new(), store)
            .await?
            .with_handshake_timeout(config.handshake_timeout);
        let video = MediaRelay::bind("video", config.video_addr(), config.video_timeout).await?;
        let audio = MediaRelay::bind("audio", config.audio_addr(), config.audio_timeout).await?;

        Ok(Self {
            control,
            video,
            audio,
        })
    }

    pub fn control_addr(&self) -> std::io::Result<SocketAddr> {
        self.control.local_addr()
    }

    pub fn video_addr(&self) -> std::io::Result<SocketAddr> {
        self.video.local_addr()
    }

    pub fn audio_addr(&self) -> std::io::Result<SocketAddr> {
        self.audio.local_addr()
    }

    /// Spawn every role on `tracker`. They run until `cancel` fires.
    pub fn spawn(self, tracker: &TaskTracker, cancel: &CancellationToken) {
        tracker.spawn(self.control.run(cancel.clone()));
        tracker.spawn(self.video.run(cancel.clone()));
        tracker.spawn(self.audio.run(cancel.clone()));
    }
}
