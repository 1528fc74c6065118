use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use huddle_shared::constants::{
    IDLE_INTERVAL_MS, VIDEO_FRAME_INTERVAL_MS, VIDEO_HEIGHT, VIDEO_WIDTH,
};

#[derive(Error, Debug)]
pub enum VideoError {
    #[error("No video device available")]
    NoDevice,

    #[error("Video capture error: {0}")]
    CaptureError(String),

    #[error("Video encode error: {0}")]
    EncodeError(String),

    #[error("Video decode error: {0}")]
    DecodeError(String),
}

/// Video configuration
#[derive(Debug, Clone)]
pub struct VideoConfig {
    pub width: u32,
    pub height: u32,
    /// Pause between frames while a source is active
    pub frame_interval: Duration,
    /// Pause between iterations while nothing is being captured
    pub idle_interval: Duration,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            width: VIDEO_WIDTH,
            height: VIDEO_HEIGHT,
            frame_interval: Duration::from_millis(VIDEO_FRAME_INTERVAL_MS),
            idle_interval: Duration::from_millis(IDLE_INTERVAL_MS),
        }
    }
}

/// Uncompressed video frame (packed pixels, layout owned by the source)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl VideoFrame {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            data,
        }
    }
}

/// A camera or screen grabber.
///
/// `capture` is called from the video sender loop once per frame interval
/// and should return within that interval.
pub trait FrameSource: Send {
    fn capture(&mut self) -> Result<VideoFrame, VideoError>;

    /// Give the device back while it is not in use. Capturing again reopens it.
    fn release(&mut self) {}
}

/// Opaque frame compression.
pub trait FrameCodec: Send + Sync {
    fn compress(&self, frame: &VideoFrame) -> Result<Vec<u8>, VideoError>;

    fn decompress(&self, bytes: &[u8]) -> Result<VideoFrame, VideoError>;
}

/// Placeholder for a device this host does not have.
#[derive(Debug, Default)]
pub struct UnavailableSource;

impl FrameSource for UnavailableSource {
    fn capture(&mut self) -> Result<VideoFrame, VideoError> {
        Err(VideoError::NoDevice)
    }
}

/// Returns the same frame on every capture.
#[derive(Debug, Clone)]
pub struct StillSource {
    frame: VideoFrame,
}

impl StillSource {
    pub fn new(frame: VideoFrame) -> Self {
        Self { frame }
    }
}

impl FrameSource for StillSource {
    fn capture(&mut self) -> Result<VideoFrame, VideoError> {
        Ok(self.frame.clone())
    }
}

/// Lossless codec: an 8-byte big-endian `width | height` header followed by
/// the pixel bytes untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawCodec;

const RAW_HEADER_LEN: usize = 8;

impl FrameCodec for RawCodec {
    fn compress(&self, frame: &VideoFrame) -> Result<Vec<u8>, VideoError> {
        let mut out = Vec::with_capacity(RAW_HEADER_LEN + frame.data.len());
        out.extend_from_slice(&frame.width.to_be_bytes());
        out.extend_from_slice(&frame.height.to_be_bytes());
        out.extend_from_slice(&frame.data);
        Ok(out)
    }

    fn decompress(&self, bytes: &[u8]) -> Result<VideoFrame, VideoError> {
        if bytes.len() < RAW_HEADER_LEN {
            return Err(VideoError::DecodeError(format!(
                "frame too short: {} bytes",
                bytes.len()
            )));
        }
        let (header, data) = bytes.split_at(RAW_HEADER_LEN);
        let width = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        let height = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
        if data.len() as u64 != u64::from(width) * u64::from(height) * 3 {
            debug!(width, height, bytes = data.len(), "Raw frame is not packed RGB");
        }
        Ok(VideoFrame::new(width, height, data.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_codec_preserves_frame() {
        let frame = VideoFrame::new(4, 2, vec![7; 24]);
        let bytes = RawCodec.compress(&frame).unwrap();
        assert_eq!(bytes.len(), 32);
        assert_eq!(RawCodec.decompress(&bytes).unwrap(), frame);
    }

    #[test]
    fn test_raw_codec_rejects_short_input() {
        assert!(matches!(
            RawCodec.decompress(&[1, 2, 3]),
            Err(VideoError::DecodeError(_))
        ));
    }

    #[test]
    fn test_unavailable_source() {
        assert!(matches!(
            UnavailableSource.capture(),
            Err(VideoError::NoDevice)
        ));
    }

    #[test]
    fn test_default_config() {
        let config = VideoConfig::default();
        assert_eq!((config.width, config.height), (640, 360));
        assert_eq!(config.frame_interval, Duration::from_millis(33));
    }
}
