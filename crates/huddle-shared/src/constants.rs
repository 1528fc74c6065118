/// Application name
pub const APP_NAME: &str = "Huddle";

/// Default TCP control (chat / file) port
pub const DEFAULT_CONTROL_PORT: u16 = 8002;

/// Default UDP video relay port. The audio relay conventionally listens on
/// the next port up.
pub const DEFAULT_VIDEO_PORT: u16 = 5052;

/// Default UDP audio relay port
pub const DEFAULT_AUDIO_PORT: u16 = DEFAULT_VIDEO_PORT + 1;

/// Seconds of silence before the video relay forgets a peer
pub const DEFAULT_VIDEO_TIMEOUT_SECS: u64 = 200;

/// Seconds of silence before the audio relay forgets a peer
pub const DEFAULT_AUDIO_TIMEOUT_SECS: u64 = 200_000;

/// Largest datagram we ever read off a UDP socket
pub const UDP_BUFFER_SIZE: usize = 65_536;

/// Practical ceiling for one encoded media envelope on a LAN
pub const MAX_DATAGRAM_SIZE: usize = 60_000;

/// Raw bytes carried by one `file_chunk` record
pub const FILE_CHUNK_SIZE: usize = 4096;

/// Maximum upload size in bytes (50 MiB)
pub const MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// Longest control line accepted before the connection is considered broken.
/// A base64 chunk of `FILE_CHUNK_SIZE` bytes plus framing fits comfortably.
pub const MAX_LINE_LENGTH: usize = 256 * 1024;

/// Reserved chat recipient meaning "everyone else"
pub const BROADCAST_RECIPIENT: &str = "broadcast";

/// Sender name used for join / leave notices
pub const SYSTEM_SENDER: &str = "System";

/// Origin attributed to files found in storage at startup
pub const CACHED_ORIGIN: &str = "Server (Cached)";

/// Handshake: server prompt
pub const HANDSHAKE_PROMPT: &str = "Enter username:";

/// Handshake: username accepted
pub const HANDSHAKE_ACCEPTED: &str = "Username accepted. Welcome!";

/// Handshake: username rejected (connection closes afterwards)
pub const HANDSHAKE_REJECTED: &str = "Username is empty or already taken.";

/// How long either side waits for the other's handshake line
pub const HANDSHAKE_TIMEOUT_SECS: u64 = 30;

/// Video geometry and pacing
pub const VIDEO_WIDTH: u32 = 640;
pub const VIDEO_HEIGHT: u32 = 360;
pub const VIDEO_FRAME_INTERVAL_MS: u64 = 33;
pub const IDLE_INTERVAL_MS: u64 = 100;

/// Audio format: 16-bit mono PCM
pub const AUDIO_SAMPLE_RATE: u32 = 44_100;
pub const AUDIO_CHANNELS: u16 = 1;
pub const AUDIO_CHUNK_SAMPLES: usize = 2048;

/// Bounded receive timeout used by every media receiver (seconds)
pub const RECV_TIMEOUT_SECS: u64 = 5;
