use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use huddle_media::{FrameCodec, FrameSource, VideoConfig, VideoError, VideoFrame};
use huddle_shared::{MediaEnvelope, MediaKind};

use super::{on_device, pace, recv_buffer, Device, MediaLink};
use crate::events::{emit_event, ClientEvent, EventSender};
use crate::presenter::PresenterTracker;
use crate::state::MediaControls;

/// Captures from the screen or camera, whichever is active, and sends one
/// envelope per frame interval.
pub struct VideoSender {
    pub(crate) username: String,
    pub(crate) link: MediaLink,
    pub(crate) camera: Device<Box<dyn FrameSource>>,
    pub(crate) screen: Device<Box<dyn FrameSource>>,
    pub(crate) codec: Arc<dyn FrameCodec>,
    pub(crate) controls: MediaControls,
    pub(crate) events: EventSender,
    pub(crate) config: VideoConfig,
}

impl VideoSender {
    pub async fn run(self, cancel: CancellationToken) {
        info!(relay = %self.link.relay(), "Video sender started");
        let mut camera_open = false;
        let mut screen_open = false;

        while !cancel.is_cancelled() {
            let (kind, frame) = if self.controls.screen_sharing() {
                screen_open = true;
                match self.capture(&self.screen).await {
                    Some(Ok(frame)) => (MediaKind::Screen, Some(frame)),
                    Some(Err(e)) => {
                        warn!(error = %e, "Screen capture failed");
                        self.controls.set_screen_share(false);
                        emit_event(&self.events, ClientEvent::Error(format!("Screen share stopped: {e}")));
                        (MediaKind::None, None)
                    }
                    None => (MediaKind::None, None),
                }
            } else if self.controls.video_enabled() {
                camera_open = true;
                match self.capture(&self.camera).await {
                    Some(Ok(frame)) => (MediaKind::Webcam, Some(frame)),
                    Some(Err(e)) => {
                        warn!(error = %e, "Camera capture failed");
                        self.controls.set_video_enabled(false);
                        emit_event(&self.events, ClientEvent::Error(format!("Camera disabled: {e}")));
                        (MediaKind::None, None)
                    }
                    None => (MediaKind::None, None),
                }
            } else {
                (MediaKind::None, None)
            };

            if camera_open && kind != MediaKind::Webcam {
                release(&self.camera);
                camera_open = false;
            }
            if screen_open && kind != MediaKind::Screen {
                release(&self.screen);
                screen_open = false;
            }

            let payload = frame.as_ref().and_then(|f| match self.codec.compress(f) {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    warn!(error = %e, "Frame compression failed");
                    None
                }
            });
            self.link
                .send(&MediaEnvelope::new(self.username.clone(), kind, payload))
                .await;

            let pause = if frame.is_some() {
                self.config.frame_interval
            } else {
                self.config.idle_interval
            };
            emit_event(&self.events, ClientEvent::LocalFrame(frame));

            if !pace(pause, &cancel).await {
                break;
            }
        }

        release(&self.camera);
        release(&self.screen);
        info!("Video sender stopped");
    }

    async fn capture(
        &self,
        source: &Device<Box<dyn FrameSource>>,
    ) -> Option<Result<VideoFrame, VideoError>> {
        on_device(source, |s| s.capture()).await
    }
}

fn release(source: &Mutex<Box<dyn FrameSource>>) {
    source.lock().unwrap_or_else(PoisonError::into_inner).release();
}

/// Receives peers' envelopes, decodes frames and tracks the presenter.
pub struct VideoReceiver {
    pub(crate) link: MediaLink,
    pub(crate) codec: Arc<dyn FrameCodec>,
    pub(crate) presenter: Arc<Mutex<PresenterTracker>>,
    pub(crate) events: EventSender,
    pub(crate) recv_timeout: Duration,
}

impl VideoReceiver {
    pub async fn run(self, cancel: CancellationToken) {
        info!(relay = %self.link.relay(), "Video receiver started");
        let mut buf = recv_buffer();

        while let Ok(next) = self.link.recv(&mut buf, self.recv_timeout, &cancel).await {
            let Some(envelope) = next else { continue };

            let frame = envelope.payload.as_deref().and_then(|bytes| {
                match self.codec.decompress(bytes) {
                    Ok(frame) => Some(frame),
                    Err(e) => {
                        debug!(sender = %envelope.sender, error = %e, "Dropping undecodable frame");
                        None
                    }
                }
            });

            let changed = self
                .presenter
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .observe(&envelope.sender, envelope.kind);

            emit_event(
                &self.events,
                ClientEvent::RemoteFrame {
                    sender: envelope.sender,
                    frame,
                    kind: envelope.kind,
                },
            );
            if let Some(presenter) = changed {
                info!(presenter = ?presenter, "Presenter changed");
                emit_event(&self.events, ClientEvent::PresenterChanged(presenter));
            }
        }

        info!("Video receiver stopped");
    }
}
