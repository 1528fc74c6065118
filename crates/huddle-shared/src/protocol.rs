//! Control channel records.
//!
//! Each record travels as one JSON object per line with a `"type"`
//! discriminator. The two directions are separate closed unions so that a
//! server never accepts a server-only kind from a client and vice versa.

use serde::{Deserialize, Serialize};

use crate::codec::{Chunk, Record};
use crate::types::FileRecord;

/// Records sent by a client to the control server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Chat to `"broadcast"` or to one username
    Chat { to: String, msg: String },

    /// Ask for the live user list
    ListUsers,

    /// Open an upload sink
    UploadStart { filename: String, size: u64 },

    /// Append bytes to the open upload sink
    FileChunk { data: Chunk },

    /// Close the upload sink and publish the file
    FileEnd { filename: String },

    /// Stream a stored file back to this connection
    DownloadRequest { filename: String },

    /// Ask for the full file registry
    RequestFileList,
}

/// Records sent by the control server to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    UserList { users: Vec<String> },

    ChatMessage {
        from: String,
        msg: String,
        private: bool,
    },

    NewFileAvailable(FileRecord),

    FileListUpdate { files: Vec<FileRecord> },

    FileChunk { data: Chunk },

    FileEnd { filename: String },

    Error { msg: String },
}

impl Record for ClientMessage {
    const KINDS: &'static [&'static str] = &[
        "chat",
        "list_users",
        "upload_start",
        "file_chunk",
        "file_end",
        "download_request",
        "request_file_list",
    ];

    fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Chat { .. } => "chat",
            ClientMessage::ListUsers => "list_users",
            ClientMessage::UploadStart { .. } => "upload_start",
            ClientMessage::FileChunk { .. } => "file_chunk",
            ClientMessage::FileEnd { .. } => "file_end",
            ClientMessage::DownloadRequest { .. } => "download_request",
            ClientMessage::RequestFileList => "request_file_list",
        }
    }
}

impl Record for ServerMessage {
    const KINDS: &'static [&'static str] = &[
        "user_list",
        "chat_message",
        "new_file_available",
        "file_list_update",
        "file_chunk",
        "file_end",
        "error",
    ];

    fn kind(&self) -> &'static str {
        match self {
            ServerMessage::UserList { .. } => "user_list",
            ServerMessage::ChatMessage { .. } => "chat_message",
            ServerMessage::NewFileAvailable(_) => "new_file_available",
            ServerMessage::FileListUpdate { .. } => "file_list_update",
            ServerMessage::FileChunk { .. } => "file_chunk",
            ServerMessage::FileEnd { .. } => "file_end",
            ServerMessage::Error { .. } => "error",
        }
    }
}

impl ServerMessage {
    pub fn error(msg: impl Into<String>) -> Self {
        ServerMessage::Error { msg: msg.into() }
    }

    pub fn chat(from: impl Into<String>, msg: impl Into<String>, private: bool) -> Self {
        ServerMessage::ChatMessage {
            from: from.into(),
            msg: msg.into(),
            private,
        }
    }

    /// Reply to a `download_request` for a file the server does not have.
    pub fn file_not_found(filename: &str) -> Self {
        Self::error(format!("File '{filename}' not found on server."))
    }

    /// Sent instead of `file_end` when a download stops part way.
    pub fn transfer_failed(reason: impl std::fmt::Display) -> Self {
        Self::error(format!("{TRANSFER_FAILED_PREFIX}: {reason}"))
    }

    /// Whether this record ends a pending download of `filename` without
    /// a `file_end`.
    pub fn aborts_download(&self, filename: &str) -> bool {
        match self {
            ServerMessage::Error { msg } => {
                msg.starts_with(TRANSFER_FAILED_PREFIX)
                    || *self == Self::file_not_found(filename)
            }
            _ => false,
        }
    }
}

const TRANSFER_FAILED_PREFIX: &str = "File transfer failed";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode_line, encode_line};
    use crate::error::ProtocolError;

    #[test]
    fn test_download_failures_are_recognised() {
        assert!(ServerMessage::file_not_found("a.txt").aborts_download("a.txt"));
        assert!(!ServerMessage::file_not_found("a.txt").aborts_download("b.txt"));
        assert!(ServerMessage::transfer_failed("disk gone").aborts_download("b.txt"));
        assert!(!ServerMessage::error("User 'x' not found.").aborts_download("x"));
        assert!(!ServerMessage::FileEnd { filename: "a.txt".into() }.aborts_download("a.txt"));
    }

    #[test]
    fn test_client_wire_names() {
        let line = encode_line(&ClientMessage::RequestFileList).unwrap();
        assert_eq!(line, "{\"type\":\"request_file_list\"}\n");

        let line = encode_line(&ClientMessage::Chat {
            to: "broadcast".into(),
            msg: "hi".into(),
        })
        .unwrap();
        assert_eq!(line, "{\"type\":\"chat\",\"to\":\"broadcast\",\"msg\":\"hi\"}\n");
    }

    #[test]
    fn test_new_file_available_is_flat() {
        let msg = ServerMessage::NewFileAvailable(FileRecord::new("a.txt", 10, "alice"));
        let value: serde_json::Value =
            serde_json::from_str(encode_line(&msg).unwrap().trim_end()).unwrap();
        assert_eq!(value["type"], "new_file_available");
        assert_eq!(value["filename"], "a.txt");
        assert_eq!(value["size"], 10);
        assert_eq!(value["from"], "alice");
    }

    #[test]
    fn test_kind_matches_serialized_tag() {
        let samples = vec![
            ServerMessage::UserList { users: vec![] },
            ServerMessage::chat("a", "b", true),
            ServerMessage::NewFileAvailable(FileRecord::cached("x", 1)),
            ServerMessage::FileListUpdate { files: vec![] },
            ServerMessage::FileChunk {
                data: Chunk(vec![1]),
            },
            ServerMessage::FileEnd {
                filename: "x".into(),
            },
            ServerMessage::error("boom"),
        ];
        for msg in samples {
            let value: serde_json::Value =
                serde_json::from_str(encode_line(&msg).unwrap().trim_end()).unwrap();
            assert_eq!(value["type"], msg.kind());
            assert!(ServerMessage::KINDS.contains(&msg.kind()));
        }
    }

    #[test]
    fn test_server_kind_rejected_from_client() {
        let err = decode_line::<ClientMessage>("{\"type\":\"user_list\",\"users\":[]}").unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownKind(kind) if kind == "user_list"));
    }

    #[test]
    fn test_missing_required_field_is_malformed() {
        let err = decode_line::<ClientMessage>("{\"type\":\"chat\",\"msg\":\"hi\"}").unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
    }
}
