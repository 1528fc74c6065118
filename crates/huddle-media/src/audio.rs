use std::time::Duration;

use thiserror::Error;

use huddle_shared::constants::{
    AUDIO_CHANNELS, AUDIO_CHUNK_SAMPLES, AUDIO_SAMPLE_RATE, IDLE_INTERVAL_MS,
};

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("No input device available")]
    NoInputDevice,

    #[error("No output device available")]
    NoOutputDevice,

    #[error("Audio device error: {0}")]
    DeviceError(String),

    #[error("Audio stream error: {0}")]
    StreamError(String),
}

/// Fixed PCM format: signed 16-bit little-endian, interleaved.
#[derive(Debug, Clone)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Samples per channel in one chunk
    pub chunk_samples: usize,
    /// Keep-alive cadence while the microphone is muted
    pub idle_interval: Duration,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: AUDIO_SAMPLE_RATE,
            channels: AUDIO_CHANNELS,
            chunk_samples: AUDIO_CHUNK_SAMPLES,
            idle_interval: Duration::from_millis(IDLE_INTERVAL_MS),
        }
    }
}

impl AudioConfig {
    pub fn chunk_bytes(&self) -> usize {
        self.chunk_samples * self.channels as usize * 2
    }

    pub fn chunk_duration(&self) -> Duration {
        Duration::from_micros(self.chunk_samples as u64 * 1_000_000 / self.sample_rate as u64)
    }
}

/// Microphone. `read_chunk` returns one chunk of PCM; implementations backed
/// by a real device block for about one chunk duration.
pub trait AudioSource: Send {
    fn read_chunk(&mut self) -> Result<Vec<u8>, AudioError>;
}

/// Speaker.
pub trait AudioSink: Send {
    fn play(&mut self, pcm: &[u8]) -> Result<(), AudioError>;
}

#[derive(Debug, Default)]
pub struct UnavailableInput;

impl AudioSource for UnavailableInput {
    fn read_chunk(&mut self) -> Result<Vec<u8>, AudioError> {
        Err(AudioError::NoInputDevice)
    }
}

#[derive(Debug, Default)]
pub struct UnavailableOutput;

impl AudioSink for UnavailableOutput {
    fn play(&mut self, _pcm: &[u8]) -> Result<(), AudioError> {
        Err(AudioError::NoOutputDevice)
    }
}

/// Produces zeroed chunks of the configured size.
#[derive(Debug, Clone)]
pub struct SilenceSource {
    chunk_bytes: usize,
}

impl SilenceSource {
    pub fn new(config: &AudioConfig) -> Self {
        Self {
            chunk_bytes: config.chunk_bytes(),
        }
    }
}

impl AudioSource for SilenceSource {
    fn read_chunk(&mut self) -> Result<Vec<u8>, AudioError> {
        Ok(vec![0u8; self.chunk_bytes])
    }
}

/// Discards everything it is asked to play.
#[derive(Debug, Default)]
pub struct NullSink;

impl AudioSink for NullSink {
    fn play(&mut self, _pcm: &[u8]) -> Result<(), AudioError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_geometry() {
        let config = AudioConfig::default();
        assert_eq!(config.chunk_bytes(), 4096);
        // 2048 samples at 44.1 kHz is a little over 46 ms
        assert_eq!(config.chunk_duration().as_millis(), 46);
    }

    #[test]
    fn test_silence_source_matches_config() {
        let config = AudioConfig::default();
        let chunk = SilenceSource::new(&config).read_chunk().unwrap();
        assert_eq!(chunk.len(), config.chunk_bytes());
        assert!(chunk.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_unavailable_devices() {
        assert!(matches!(
            UnavailableInput.read_chunk(),
            Err(AudioError::NoInputDevice)
        ));
        assert!(matches!(
            UnavailableOutput.play(&[0, 0]),
            Err(AudioError::NoOutputDevice)
        ));
    }
}
