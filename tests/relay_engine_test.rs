//! Byte accounting through the relay engine

use std::sync::Arc;

use sockstun::relay::{DirectionEnd, RelayEngine, RelaySession};
use sockstun::transform::TransformConfig;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};
use tokio::time::{timeout, Duration};

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 256) as u8).collect()
}

/// Push `len` bytes in at the client side, half-close, and collect what
/// comes out at the remote side.
async fn relay_exact(len: usize, pipe_size: usize, buffer_size: usize) {
    let (mut client_far, client_near) = duplex(pipe_size);
    let (remote_near, mut remote_far) = duplex(pipe_size);
    let session = Arc::new(RelaySession::new("client", "remote"));

    let relay = tokio::spawn({
        let session = Arc::clone(&session);
        async move {
            RelayEngine::new(buffer_size)
                .relay(session, client_near, remote_near)
                .await
        }
    });

    let data = payload(len);
    let sender = tokio::spawn(async move {
        client_far.write_all(&data).await.unwrap();
        client_far.shutdown().await.unwrap();
        client_far
    });

    let mut received = Vec::with_capacity(len);
    timeout(Duration::from_secs(30), remote_far.read_to_end(&mut received))
        .await
        .expect("relay stalled")
        .unwrap();
    let _client_far = sender.await.unwrap();
    let outcome = relay.await.unwrap();

    assert_eq!(received.len(), len, "pipe {} buffer {}", pipe_size, buffer_size);
    assert_eq!(received, payload(len));
    assert_eq!(outcome.stats.bytes_up, len as u64);
    assert_eq!(outcome.stats.bytes_down, 0);
    assert!(matches!(outcome.up, DirectionEnd::Eof));
    assert!(outcome.failure().is_none());
}

#[tokio::test]
async fn test_exact_byte_counts() {
    for len in [0, 1, 4096, 1_000_000] {
        for pipe_size in [16, 4096, 65536] {
            relay_exact(len, pipe_size, 4096).await;
        }
    }
}

#[tokio::test]
async fn test_single_byte_chunks() {
    relay_exact(4096, 1, 4096).await;
    relay_exact(4096, 64, 1024).await;
}

#[tokio::test]
async fn test_buffer_larger_than_payload() {
    relay_exact(100, 8192, 65536).await;
}

#[tokio::test]
async fn test_relay_through_stateful_transform() {
    let config = TransformConfig::Xor {
        key: "tunnel-key".to_string(),
    };

    let (mut client_far, client_near) = duplex(128);
    let (remote_near, remote_far) = duplex(128);
    // the relay encodes toward the remote side; the far end decodes
    let remote_near = config.wrap(remote_near);
    let mut remote_far = config.wrap(remote_far);

    let session = Arc::new(RelaySession::new("client", "remote"));
    let relay = tokio::spawn(async move {
        RelayEngine::new(1024)
            .relay(session, client_near, remote_near)
            .await
    });

    let data = payload(100_000);
    let expected = data.clone();
    let sender = tokio::spawn(async move {
        client_far.write_all(&data).await.unwrap();
        client_far.shutdown().await.unwrap();
        client_far
    });

    let mut received = Vec::new();
    remote_far.read_to_end(&mut received).await.unwrap();
    let _client_far = sender.await.unwrap();
    let outcome = relay.await.unwrap();

    assert_eq!(received, expected);
    assert_eq!(outcome.stats.bytes_up, 100_000);
}

#[tokio::test]
async fn test_both_directions_until_remote_closes() {
    let (mut client_far, client_near) = duplex(1024);
    let (remote_near, mut remote_far) = duplex(1024);
    let session = Arc::new(RelaySession::new("client", "remote"));

    let relay = tokio::spawn(async move {
        RelayEngine::default()
            .relay(session, client_near, remote_near)
            .await
    });

    for round in 0..10u8 {
        let request = vec![round; 100];
        client_far.write_all(&request).await.unwrap();
        let mut got = vec![0u8; 100];
        remote_far.read_exact(&mut got).await.unwrap();
        assert_eq!(got, request);

        let response = vec![round.wrapping_add(100); 300];
        remote_far.write_all(&response).await.unwrap();
        let mut got = vec![0u8; 300];
        client_far.read_exact(&mut got).await.unwrap();
        assert_eq!(got, response);
    }

    drop(remote_far);
    let outcome = relay.await.unwrap();

    assert_eq!(outcome.stats.bytes_up, 1000);
    assert_eq!(outcome.stats.bytes_down, 3000);
    assert!(matches!(outcome.down, DirectionEnd::Eof));
    assert!(matches!(outcome.up, DirectionEnd::Closed));

    // the client side was closed once both directions finished
    let mut rest = Vec::new();
    client_far.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());
}
