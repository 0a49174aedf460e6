// tests/transport_memory.rs

use bytes::Bytes;
use tokio::time::{timeout, Duration};

use evrpc::{
    // ---
    Channel,
    ConcreteTarget,
    MemoryHub,
    Role,
    TransportConfig,
};

#[tokio::test]
async fn memory_subscribe_then_emit_delivers() {
    // ---
    // Arrange
    // ---
    let hub = MemoryHub::new();

    let server = evrpc::create_memory_transport_with_hub(
        TransportConfig {
            node_id: "server".into(),
            role: Role::Server,
        },
        hub.clone(),
    )
    .await
    .expect("failed to create server transport");

    let player = evrpc::create_memory_transport_with_hub(
        TransportConfig {
            node_id: 7u32.into(),
            role: Role::Client,
        },
        hub.clone(),
    )
    .await
    .expect("failed to create client transport");

    let mut sub = server
        .subscribe(Channel::Request)
        .await
        .expect("subscribe failed");

    let payload = Bytes::from_static(b"hello");

    // ---
    // Act
    // ---
    player
        .emit(Channel::Request, payload.clone(), ConcreteTarget::Peer)
        .await
        .expect("emit failed");

    // ---
    // Assert
    // ---
    let received = timeout(Duration::from_millis(100), sub.inbox.recv())
        .await
        .expect("timed out waiting for message")
        .expect("subscription channel closed unexpectedly");

    assert_eq!(received.payload, payload);
    assert_eq!(received.channel, Channel::Request);
    assert_eq!(received.sender.as_str(), "7");
}

#[tokio::test]
async fn memory_channels_are_independent() {
    // ---
    // Arrange
    // ---
    let hub = MemoryHub::new();

    let server = evrpc::create_memory_transport_with_hub(
        TransportConfig {
            node_id: "server".into(),
            role: Role::Server,
        },
        hub.clone(),
    )
    .await
    .unwrap();

    let player = evrpc::create_memory_transport_with_hub(
        TransportConfig {
            node_id: 1u32.into(),
            role: Role::Client,
        },
        hub.clone(),
    )
    .await
    .unwrap();

    let mut requests = player.subscribe(Channel::Request).await.unwrap();
    let mut responses = player.subscribe(Channel::Response).await.unwrap();

    // ---
    // Act
    // ---
    server
        .emit(
            Channel::Response,
            Bytes::from_static(b"reply"),
            ConcreteTarget::One(1u32.into()),
        )
        .await
        .unwrap();

    // ---
    // Assert
    // ---
    let received = timeout(Duration::from_millis(100), responses.inbox.recv())
        .await
        .expect("timed out waiting for reply")
        .expect("subscription channel closed unexpectedly");
    assert_eq!(received.payload, Bytes::from_static(b"reply"));

    assert!(
        timeout(Duration::from_millis(20), requests.inbox.recv())
            .await
            .is_err(),
        "reply leaked onto the request channel"
    );
}

#[tokio::test]
async fn memory_close_detaches_endpoint() {
    // ---
    let hub = MemoryHub::new();

    let player = evrpc::create_memory_transport_with_hub(
        TransportConfig {
            node_id: 3u32.into(),
            role: Role::Client,
        },
        hub.clone(),
    )
    .await
    .unwrap();

    assert_eq!(hub.endpoint_count().await, 1);

    player.close().await.unwrap();
    assert_eq!(hub.endpoint_count().await, 0);

    assert!(player.subscribe(Channel::Request).await.is_err());
}
