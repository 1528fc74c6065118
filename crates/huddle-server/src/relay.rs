//! Content-agnostic UDP fan-out relay.
//!
//! One instance runs per media stream. Every datagram received from a peer
//! refreshes that peer's membership, evicts peers that have been silent
//! longer than the stream timeout, and is forwarded verbatim to every
//! remaining peer except its sender. Payloads are never decoded.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use huddle_shared::constants::UDP_BUFFER_SIZE;

/// How long `run` blocks in one receive before re-checking cancellation.
const RECV_POLL: Duration = Duration::from_secs(1);

/// Peers known to one relay, keyed by address, valued by last activity.
///
/// Owned by the relay loop alone.
#[derive(Debug)]
pub struct MembershipTable {
    timeout: Duration,
    last_seen: HashMap<SocketAddr, Instant>,
}

impl MembershipTable {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            last_seen: HashMap::new(),
        }
    }

    /// Record a datagram from `from` at `now`.
    ///
    /// Returns `(targets, evicted)`. The targets never include `from` or
    /// any peer silent for longer than the timeout.
    pub fn observe(&mut self, from: SocketAddr, now: Instant) -> (Vec<SocketAddr>, Vec<SocketAddr>) {
        let joined = self.last_seen.insert(from, now).is_none();
        if joined {
            debug!(peer = %from, "New relay member");
        }

        let timeout = self.timeout;
        let mut evicted = Vec::new();
        self.last_seen.retain(|addr, seen| {
            let fresh = now.saturating_duration_since(*seen) <= timeout;
            if !fresh {
                evicted.push(*addr);
            }
            fresh
        });

        let targets = self
            .last_seen
            .keys()
            .filter(|addr| **addr != from)
            .copied()
            .collect();
        (targets, evicted)
    }

    pub fn contains(&self, addr: &SocketAddr) -> bool {
        self.last_seen.contains_key(addr)
    }

    pub fn len(&self) -> usize {
        self.last_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }
}

/// A bound relay ready to run.
pub struct MediaRelay {
    name: &'static str,
    socket: Arc<UdpSocket>,
    members: MembershipTable,
}

impl MediaRelay {
    pub async fn bind(
        name: &'static str,
        addr: SocketAddr,
        timeout: Duration,
    ) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        info!(
            relay = name,
            addr = %socket.local_addr()?,
            timeout_secs = timeout.as_secs(),
            "Media relay listening"
        );
        Ok(Self {
            name,
            socket: Arc::new(socket),
            members: MembershipTable::new(timeout),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Forward datagrams until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut buf = vec![0u8; UDP_BUFFER_SIZE];

        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => {
                    info!(relay = self.name, "Media relay shutting down");
                    break;
                }
                r = tokio::time::timeout(RECV_POLL, self.socket.recv_from(&mut buf)) => r,
            };

            let (len, from) = match received {
                Err(_elapsed) => continue,
                Ok(Ok(pair)) => pair,
                Ok(Err(e)) => {
                    // On some platforms an ICMP unreachable from an earlier
                    // send surfaces here; it concerns one peer only.
                    warn!(relay = self.name, error = %e, "Relay receive failed");
                    continue;
                }
            };

            let (targets, evicted) = self.members.observe(from, Instant::now());
            for peer in &evicted {
                info!(relay = self.name, peer = %peer, "Evicted silent peer");
            }

            let datagram = &buf[..len];
            for target in targets {
                if let Err(e) = self.socket.send_to(datagram, target).await {
                    warn!(
                        relay = self.name,
                        target = %target,
                        error = %e,
                        "Relay send failed"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, 1], port))
    }

    #[test]
    fn test_never_forwards_to_sender() {
        let mut table = MembershipTable::new(Duration::from_secs(10));
        let t0 = Instant::now();

        let (targets, _) = table.observe(peer(1), t0);
        assert!(targets.is_empty());

        let (targets, _) = table.observe(peer(2), t0);
        assert_eq!(targets, vec![peer(1)]);

        let (mut targets, _) = table.observe(peer(3), t0);
        targets.sort();
        assert_eq!(targets, vec![peer(1), peer(2)]);
    }

    #[test]
    fn test_silent_peer_is_evicted_before_forwarding() {
        let mut table = MembershipTable::new(Duration::from_secs(10));
        let t0 = Instant::now();

        table.observe(peer(1), t0); // X
        table.observe(peer(2), t0); // Y
        table.observe(peer(3), t0 + Duration::from_secs(8)); // Z

        let (targets, evicted) = table.observe(peer(2), t0 + Duration::from_secs(15));
        assert_eq!(targets, vec![peer(3)]);
        assert_eq!(evicted, vec![peer(1)]);
        assert!(!table.contains(&peer(1)));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_activity_refreshes_membership() {
        let mut table = MembershipTable::new(Duration::from_secs(10));
        let t0 = Instant::now();

        table.observe(peer(1), t0);
        table.observe(peer(1), t0 + Duration::from_secs(9));
        let (targets, evicted) = table.observe(peer(2), t0 + Duration::from_secs(18));

        assert_eq!(targets, vec![peer(1)]);
        assert!(evicted.is_empty());
    }

    #[tokio::test]
    async fn test_relay_forwards_verbatim() {
        let relay = MediaRelay::bind("video", "127.0.0.1:0".parse().unwrap(), Duration::from_secs(10))
            .await
            .unwrap();
        let relay_addr = relay.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(relay.run(cancel.clone()));

        let a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let b = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        // B registers first so it is known when A speaks.
        b.send_to(b"hello", relay_addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        a.send_to(&[0xde, 0xad, 0xbe, 0xef], relay_addr).await.unwrap();

        let mut buf = [0u8; 64];
        let (len, from) = tokio::time::timeout(Duration::from_secs(2), b.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..len], &[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(from, relay_addr);

        // A never hears its own datagram back.
        let echoed = tokio::time::timeout(Duration::from_millis(200), a.recv_from(&mut buf)).await;
        assert!(echoed.is_err());

        cancel.cancel();
        handle.await.unwrap();
    }
}
