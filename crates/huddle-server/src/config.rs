//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration on a LAN.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use huddle_shared::constants::{
    DEFAULT_AUDIO_PORT, DEFAULT_AUDIO_TIMEOUT_SECS, DEFAULT_CONTROL_PORT, DEFAULT_VIDEO_PORT,
    DEFAULT_VIDEO_TIMEOUT_SECS, HANDSHAKE_TIMEOUT_SECS, MAX_FILE_SIZE,
};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address every role binds to.
    /// Env: `HUDDLE_BIND_ADDR`
    /// Default: `0.0.0.0`
    pub bind_addr: IpAddr,

    /// TCP port of the control (chat / file) server.
    /// Env: `HUDDLE_CONTROL_PORT`
    /// Default: `8002`
    pub control_port: u16,

    /// UDP port of the video relay.
    /// Env: `HUDDLE_VIDEO_PORT`
    /// Default: `5052`
    pub video_port: u16,

    /// UDP port of the audio relay.
    /// Env: `HUDDLE_AUDIO_PORT`
    /// Default: video port + 1
    pub audio_port: u16,

    /// How long the video relay keeps a silent peer.
    /// Env: `HUDDLE_VIDEO_TIMEOUT_SECS`
    /// Default: `200`
    pub video_timeout: Duration,

    /// How long the audio relay keeps a silent peer.
    /// Env: `HUDDLE_AUDIO_TIMEOUT_SECS`
    /// Default: `200000`
    pub audio_timeout: Duration,

    /// Directory holding uploaded files.
    /// Env: `HUDDLE_STORAGE_DIR`
    /// Default: `./server_files`
    pub storage_dir: PathBuf,

    /// Largest accepted upload in bytes.
    /// Env: `HUDDLE_MAX_UPLOAD_SIZE`
    /// Default: 50 MiB
    pub max_upload_size: u64,

    /// How long a new connection may take to send its username.
    /// Env: `HUDDLE_HANDSHAKE_TIMEOUT_SECS`
    /// Default: `30`
    pub handshake_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::from([0, 0, 0, 0]),
            control_port: DEFAULT_CONTROL_PORT,
            video_port: DEFAULT_VIDEO_PORT,
            audio_port: DEFAULT_AUDIO_PORT,
            video_timeout: Duration::from_secs(DEFAULT_VIDEO_TIMEOUT_SECS),
            audio_timeout: Duration::from_secs(DEFAULT_AUDIO_TIMEOUT_SECS),
            storage_dir: PathBuf::from("server_files"),
            max_upload_size: MAX_FILE_SIZE,
            handshake_timeout: Duration::from_secs(HANDSHAKE_TIMEOUT_SECS),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ServerConfig::from_env`] but reads values through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = parse_var(&lookup, "HUDDLE_BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Some(port) = parse_var(&lookup, "HUDDLE_CONTROL_PORT") {
            config.control_port = port;
        }
        if let Some(port) = parse_var::<u16>(&lookup, "HUDDLE_VIDEO_PORT") {
            config.video_port = port;
            config.audio_port = port.wrapping_add(1);
        }
        // An explicit audio port wins over the video + 1 convention
        if let Some(port) = parse_var(&lookup, "HUDDLE_AUDIO_PORT") {
            config.audio_port = port;
        }
        if let Some(secs) = parse_var(&lookup, "HUDDLE_VIDEO_TIMEOUT_SECS") {
            config.video_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var(&lookup, "HUDDLE_AUDIO_TIMEOUT_SECS") {
            config.audio_timeout = Duration::from_secs(secs);
        }
        if let Some(path) = lookup("HUDDLE_STORAGE_DIR") {
            config.storage_dir = PathBuf::from(path);
        }
        if let Some(size) = parse_var(&lookup, "HUDDLE_MAX_UPLOAD_SIZE") {
            config.max_upload_size = size;
        }
        if let Some(secs) = parse_var(&lookup, "HUDDLE_HANDSHAKE_TIMEOUT_SECS") {
            config.handshake_timeout = Duration::from_secs(secs);
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }

    pub fn control_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.control_port)
    }

    pub fn video_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.video_port)
    }

    pub fn audio_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.audio_port)
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Invalid value, using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.control_addr(), ([0, 0, 0, 0], 8002).into());
        assert_eq!(config.video_port, 5052);
        assert_eq!(config.audio_port, 5053);
        assert!(config.audio_timeout > config.video_timeout);
        assert_eq!(config.handshake_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_audio_follows_video_port() {
        let config = ServerConfig::from_lookup(lookup_from(&[("HUDDLE_VIDEO_PORT", "6000")]));
        assert_eq!(config.video_port, 6000);
        assert_eq!(config.audio_port, 6001);
    }

    #[test]
    fn test_explicit_audio_port_wins() {
        let config = ServerConfig::from_lookup(lookup_from(&[
            ("HUDDLE_VIDEO_PORT", "6000"),
            ("HUDDLE_AUDIO_PORT", "7000"),
        ]));
        assert_eq!(config.audio_port, 7000);
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = ServerConfig::from_lookup(lookup_from(&[
            ("HUDDLE_CONTROL_PORT", "not-a-port"),
            ("HUDDLE_BIND_ADDR", "nowhere"),
            ("HUDDLE_VIDEO_TIMEOUT_SECS", "15"),
        ]));
        assert_eq!(config.control_port, 8002);
        assert_eq!(config.bind_addr, IpAddr::from([0, 0, 0, 0]));
        assert_eq!(config.video_timeout, Duration::from_secs(15));
    }
}
