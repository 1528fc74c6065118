use std::time::Duration;

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use huddle_server::MediaRelay;
use huddle_shared::{MediaEnvelope, MediaKind};

async fn recv_within(socket: &UdpSocket, wait: Duration) -> Option<Vec<u8>> {
    let mut buf = vec![0u8; 65_536];
    match tokio::time::timeout(wait, socket.recv_from(&mut buf)).await {
        Ok(Ok((len, _))) => Some(buf[..len].to_vec()),
        _ => None,
    }
}

#[tokio::test]
async fn test_stale_peer_gets_nothing() {
    let relay = MediaRelay::bind(
        "video",
        "127.0.0.1:0".parse().unwrap(),
        Duration::from_millis(500),
    )
    .await
    .unwrap();
    let relay_addr = relay.local_addr().unwrap();
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(relay.run(cancel.clone()));

    let x = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let y = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let z = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    x.send_to(b"x-hello", relay_addr).await.unwrap();
    tokio::time::sleep(Duration::from_millis(800)).await;

    z.send_to(b"z-hello", relay_addr).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let envelope = MediaEnvelope::new("y", MediaKind::Webcam, Some(vec![1, 2, 3]));
    let bytes = envelope.to_bytes().unwrap();
    y.send_to(&bytes, relay_addr).await.unwrap();

    // Z is fresh and receives Y's envelope byte-for-byte.
    let got = recv_within(&z, Duration::from_secs(2)).await.unwrap();
    assert_eq!(got, bytes);
    assert_eq!(MediaEnvelope::from_bytes(&got).unwrap(), envelope);

    // X went silent past the timeout and was evicted before either send.
    assert!(recv_within(&x, Duration::from_millis(300)).await.is_none());
    // Y never hears itself.
    assert!(recv_within(&y, Duration::from_millis(100)).await.is_none());

    cancel.cancel();
    handle.await.unwrap();
}
