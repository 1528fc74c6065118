//! Media worker loops.
//!
//! Every loop suspends only on a bounded receive, a pacing sleep, or a
//! device call on the blocking pool, and checks its cancellation token at
//! each of those points.

pub mod audio;
pub mod video;

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use huddle_shared::constants::UDP_BUFFER_SIZE;
use huddle_shared::MediaEnvelope;

pub use audio::{AudioReceiver, AudioSender};
pub use video::{VideoReceiver, VideoSender};

/// A capture or playback device shared with the blocking pool.
pub(crate) type Device<D> = Arc<Mutex<D>>;

pub(crate) fn device<D>(inner: D) -> Device<D> {
    Arc::new(Mutex::new(inner))
}

/// Run one blocking device call off the async workers.
///
/// Returns `None` only if the blocking task itself panicked.
pub(crate) async fn on_device<D, R>(
    device: &Device<D>,
    call: impl FnOnce(&mut D) -> R + Send + 'static,
) -> Option<R>
where
    D: Send + 'static,
    R: Send + 'static,
{
    let device = Arc::clone(device);
    let joined = tokio::task::spawn_blocking(move || {
        let mut guard = device.lock().unwrap_or_else(PoisonError::into_inner);
        call(&mut *guard)
    })
    .await;

    match joined {
        Ok(result) => Some(result),
        Err(e) => {
            warn!(error = %e, "Device call panicked");
            None
        }
    }
}

/// One UDP socket talking to one relay.
#[derive(Debug, Clone)]
pub struct MediaLink {
    socket: Arc<UdpSocket>,
    relay: SocketAddr,
}

impl MediaLink {
    /// Bind an ephemeral local port of the relay's address family.
    pub async fn bind(relay: SocketAddr) -> std::io::Result<Self> {
        let local = if relay.is_ipv6() {
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
        } else {
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
        };
        let socket = UdpSocket::bind(local).await?;
        debug!(local = %socket.local_addr()?, relay = %relay, "Media socket bound");
        Ok(Self {
            socket: Arc::new(socket),
            relay,
        })
    }

    pub fn relay(&self) -> SocketAddr {
        self.relay
    }

    /// Send one envelope, stripping its payload if it would not fit in a
    /// datagram.
    pub async fn send(&self, envelope: &MediaEnvelope) {
        let bytes = match envelope.to_datagram() {
            Ok((bytes, stripped)) => {
                if stripped {
                    warn!(kind = %envelope.kind, "Payload too large for one datagram, sent without it");
                }
                bytes
            }
            Err(e) => {
                warn!(error = %e, "Failed to encode envelope");
                return;
            }
        };

        if let Err(e) = self.socket.send_to(&bytes, self.relay).await {
            debug!(relay = %self.relay, error = %e, "Media send failed");
        }
    }

    /// Wait up to `timeout` for the next decodable envelope.
    ///
    /// `Ok(None)` means the wait timed out or the datagram was garbage;
    /// `Err` means cancellation.
    pub async fn recv(
        &self,
        buf: &mut [u8],
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<MediaEnvelope>, Cancelled> {
        let received = tokio::select! {
            _ = cancel.cancelled() => return Err(Cancelled),
            r = tokio::time::timeout(timeout, self.socket.recv_from(buf)) => r,
        };

        let len = match received {
            Err(_elapsed) => return Ok(None),
            Ok(Ok((len, _from))) => len,
            Ok(Err(e)) => {
                debug!(error = %e, "Media receive failed");
                return Ok(None);
            }
        };

        match MediaEnvelope::from_bytes(&buf[..len]) {
            Ok(envelope) => Ok(Some(envelope)),
            Err(e) => {
                debug!(bytes = len, error = %e, "Dropping undecodable datagram");
                Ok(None)
            }
        }
    }
}

/// Marker returned when a worker's token fires mid-wait.
#[derive(Debug)]
pub struct Cancelled;

pub(crate) fn recv_buffer() -> Vec<u8> {
    vec![0u8; UDP_BUFFER_SIZE]
}

/// Sleep for `pause` unless cancelled first. Returns false on cancellation.
pub(crate) async fn pace(pause: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(pause) => true,
    }
}
