use serde::{Deserialize, Serialize};

use crate::constants::CACHED_ORIGIN;

/// What a media envelope carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    /// Camera frame
    Webcam,
    /// Screen capture; the sender is presenting
    Screen,
    /// Audio chunk
    Microphone,
    /// Nothing to show or play
    None,
}

impl MediaKind {
    pub fn is_screen(self) -> bool {
        self == MediaKind::Screen
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Webcam => "webcam",
            MediaKind::Screen => "screen",
            MediaKind::Microphone => "microphone",
            MediaKind::None => "none",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file the server can hand out. The filename is the registry key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub filename: String,
    pub size: u64,
    /// Uploader's username, or [`CACHED_ORIGIN`] for files found at startup.
    pub from: String,
}

impl FileRecord {
    pub fn new(filename: impl Into<String>, size: u64, from: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            size,
            from: from.into(),
        }
    }

    pub fn cached(filename: impl Into<String>, size: u64) -> Self {
        Self::new(filename, size, CACHED_ORIGIN)
    }

    pub fn is_cached(&self) -> bool {
        self.from == CACHED_ORIGIN
    }
}
