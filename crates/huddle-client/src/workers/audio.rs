use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use huddle_media::{AudioConfig, AudioSink, AudioSource};
use huddle_shared::{MediaEnvelope, MediaKind};

use super::{on_device, pace, recv_buffer, Device, MediaLink};
use crate::events::{emit_event, ClientEvent, EventSender};
use crate::state::MediaControls;

/// Sends one PCM chunk per chunk duration while the microphone is on, and
/// a payload-less envelope per idle interval while it is off so the relay
/// keeps this peer as a member.
pub struct AudioSender {
    pub(crate) username: String,
    pub(crate) link: MediaLink,
    pub(crate) microphone: Device<Box<dyn AudioSource>>,
    pub(crate) controls: MediaControls,
    pub(crate) events: EventSender,
    pub(crate) config: AudioConfig,
}

impl AudioSender {
    pub async fn run(self, cancel: CancellationToken) {
        info!(relay = %self.link.relay(), "Audio sender started");
        let mut ticker = tokio::time::interval(self.config.chunk_duration());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !cancel.is_cancelled() {
            if !self.controls.audio_enabled() {
                self.link
                    .send(&MediaEnvelope::empty(self.username.clone(), MediaKind::None))
                    .await;
                if !pace(self.config.idle_interval, &cancel).await {
                    break;
                }
                continue;
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match on_device(&self.microphone, |mic| mic.read_chunk()).await {
                Some(Ok(pcm)) => {
                    self.link
                        .send(&MediaEnvelope::new(
                            self.username.clone(),
                            MediaKind::Microphone,
                            Some(pcm),
                        ))
                        .await;
                }
                Some(Err(e)) => {
                    warn!(error = %e, "Microphone read failed");
                    self.controls.set_audio_enabled(false);
                    emit_event(
                        &self.events,
                        ClientEvent::Error(format!("Microphone disabled: {e}")),
                    );
                }
                None => {
                    self.controls.set_audio_enabled(false);
                }
            }
        }

        info!("Audio sender stopped");
    }
}

/// Plays every audio payload it receives. Envelopes without a payload and
/// silence on the socket are both normal.
pub struct AudioReceiver {
    pub(crate) link: MediaLink,
    pub(crate) speaker: Device<Box<dyn AudioSink>>,
    pub(crate) events: EventSender,
    pub(crate) recv_timeout: Duration,
}

impl AudioReceiver {
    pub async fn run(self, cancel: CancellationToken) {
        info!(relay = %self.link.relay(), "Audio receiver started");
        let mut buf = recv_buffer();
        let mut playing = true;

        while let Ok(next) = self.link.recv(&mut buf, self.recv_timeout, &cancel).await {
            let Some(envelope) = next else { continue };
            let Some(pcm) = envelope.payload else { continue };
            if !playing {
                continue;
            }

            match on_device(&self.speaker, move |speaker| speaker.play(&pcm)).await {
                Some(Ok(())) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "Audio playback failed");
                    playing = false;
                    emit_event(
                        &self.events,
                        ClientEvent::Error(format!("Audio output disabled: {e}")),
                    );
                }
                None => playing = false,
            }
        }

        info!("Audio receiver stopped");
    }
}
