//! Client configuration loaded from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use huddle_shared::constants::{DEFAULT_CONTROL_PORT, DEFAULT_VIDEO_PORT, RECV_TIMEOUT_SECS};

/// Log filter used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info,huddle_client=debug";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Host name or address of the server.
    /// Env: `HUDDLE_SERVER_HOST`
    /// Default: `127.0.0.1`
    pub server_host: String,

    /// Name claimed during the handshake.
    /// Env: `HUDDLE_USERNAME`
    pub username: String,

    /// Env: `HUDDLE_CONTROL_PORT`
    /// Default: `8002`
    pub control_port: u16,

    /// Env: `HUDDLE_VIDEO_PORT`
    /// Default: `5052`
    pub video_port: u16,

    /// Env: `HUDDLE_AUDIO_PORT`
    /// Default: video port + 1
    pub audio_port: u16,

    /// Where downloaded files are written.
    /// Env: `HUDDLE_DOWNLOAD_DIR`
    /// Default: `./Downloads`
    pub download_dir: PathBuf,

    /// Upper bound on a single media receive, and so on how long a
    /// receiver takes to notice shutdown.
    /// Env: `HUDDLE_RECV_TIMEOUT_SECS`
    /// Default: `5`
    pub recv_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_host: "127.0.0.1".to_string(),
            username: String::new(),
            control_port: DEFAULT_CONTROL_PORT,
            video_port: DEFAULT_VIDEO_PORT,
            audio_port: DEFAULT_VIDEO_PORT + 1,
            download_dir: PathBuf::from("Downloads"),
            recv_timeout: Duration::from_secs(RECV_TIMEOUT_SECS),
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(host) = lookup("HUDDLE_SERVER_HOST") {
            config.server_host = host.trim().to_string();
        }
        if let Some(name) = lookup("HUDDLE_USERNAME") {
            config.username = name.trim().to_string();
        }
        if let Some(port) = parse_var(&lookup, "HUDDLE_CONTROL_PORT") {
            config.control_port = port;
        }
        if let Some(port) = parse_var::<u16>(&lookup, "HUDDLE_VIDEO_PORT") {
            config.video_port = port;
            config.audio_port = port.wrapping_add(1);
        }
        if let Some(port) = parse_var(&lookup, "HUDDLE_AUDIO_PORT") {
            config.audio_port = port;
        }
        if let Some(dir) = lookup("HUDDLE_DOWNLOAD_DIR") {
            config.download_dir = PathBuf::from(dir);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "HUDDLE_RECV_TIMEOUT_SECS") {
            config.recv_timeout = Duration::from_secs(secs.max(1));
        }

        config
    }

    /// Apply `huddle-client [host] [username]` positional arguments.
    pub fn with_args(mut self, mut args: impl Iterator<Item = String>) -> Self {
        if let Some(host) = args.next() {
            self.server_host = host;
        }
        if let Some(name) = args.next() {
            self.username = name.trim().to_string();
        }
        self
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

    #[test]
    fn test_args_override_env() {
        let config = ClientConfig::from_lookup(|key| match key {
            "HUDDLE_SERVER_HOST" => Some("10.0.0.5".into()),
            "HUDDLE_USERNAME" => Some("env-name".into()),
            "HUDDLE_VIDEO_PORT" => Some("7000".into()),
            _ => None,
        })
        .with_args(vec!["192.168.1.20".to_string(), " alice ".to_string()].into_iter());

        assert_eq!(config.server_host, "192.168.1.20");
        assert_eq!(config.username, "alice");
        assert_eq!(config.video_port, 7000);
        assert_eq!(config.audio_port, 7001);
    }

    #[test]
    fn test_default_log_filter_parses() {
        assert!(tracing_subscriber::EnvFilter::try_new(DEFAULT_LOG_FILTER).is_ok());
        assert!(DEFAULT_LOG_FILTER.starts_with("info,"));
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::from_lookup(|_| None);
        assert_eq!(config.control_port, 8002);
        assert_eq!(config.audio_port, 5053);
        assert_eq!(config.download_dir, PathBuf::from("Downloads"));
        assert_eq!(config.recv_timeout, Duration::from_secs(5));
    }
}
