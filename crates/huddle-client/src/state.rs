//! Media toggles shared between the session handle and the sender workers.
//!
//! Workers read these once per iteration; nothing waits on them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::info;

#[derive(Debug, Default)]
struct Flags {
    video_enabled: AtomicBool,
    audio_enabled: AtomicBool,
    screen_share: AtomicBool,
}

#[derive(Debug, Clone, Default)]
pub struct MediaControls {
    flags: Arc<Flags>,
}

impl MediaControls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn video_enabled(&self) -> bool {
        self.flags.video_enabled.load(Ordering::Relaxed)
    }

    pub fn audio_enabled(&self) -> bool {
        self.flags.audio_enabled.load(Ordering::Relaxed)
    }

    pub fn screen_sharing(&self) -> bool {
        self.flags.screen_share.load(Ordering::Relaxed)
    }

    pub fn set_video_enabled(&self, on: bool) {
        self.flags.video_enabled.store(on, Ordering::Relaxed);
        info!(on, "Camera toggled");
    }

    pub fn set_audio_enabled(&self, on: bool) {
        self.flags.audio_enabled.store(on, Ordering::Relaxed);
        info!(on, "Microphone toggled");
    }

    /// Starting a screen share turns the camera off.
    pub fn set_screen_share(&self, on: bool) {
        if on {
            self.flags.video_enabled.store(false, Ordering::Relaxed);
        }
        self.flags.screen_share.store(on, Ordering::Relaxed);
        info!(on, "Screen share toggled");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_screen_share_forces_camera_off() {
        let controls = MediaControls::new();
        controls.set_video_enabled(true);
        controls.set_screen_share(true);
        assert!(controls.screen_sharing());
        assert!(!controls.video_enabled());

        controls.set_screen_share(false);
        assert!(!controls.video_enabled());
    }

    #[test]
    fn test_clones_share_state() {
        let a = MediaControls::new();
        let b = a.clone();
        a.set_audio_enabled(true);
        assert!(b.audio_enabled());
    }
}
