// tests/transport_memory.rs

use std::sync::Arc;

use bytes::Bytes;
use tokio::time::{timeout, Duration};

use queue_rpc::{
    // ---
    create_memory_connection_with_hub,
    Address,
    ConsumeOptions,
    CorrelationId,
    Envelope,
    MemoryHub,
    QueueDeclaration,
    RpcError,
    JSON_CONTENT_TYPE,
};

#[tokio::test]
async fn memory_consume_then_publish_delivers_with_metadata() {
    // ---
    // Arrange
    // ---
    let hub = MemoryHub::new();
    let connection = create_memory_connection_with_hub("mcpd", hub.clone());
    let channel = connection.create_channel().await.expect("channel");

    let queue = channel
        .declare_queue(QueueDeclaration::shared("test.queue"))
        .await
        .expect("declare failed");

    let mut sub = channel
        .consume(&queue, ConsumeOptions::default())
        .await
        .expect("consume failed");

    let correlation_id = CorrelationId::generate();
    let env = Envelope::request(
        queue.clone(),
        Bytes::from_static(b"[1,2]"),
        correlation_id.as_shared(),
        Address::from("test.replies"),
    );

    // ---
    // Act
    // ---
    channel.publish(env).await.expect("publish failed");

    // ---
    // Assert
    // ---
    let delivery = timeout(Duration::from_millis(100), sub.inbox.recv())
        .await
        .expect("timed out waiting for delivery")
        .expect("inbox closed");

    assert_eq!(delivery.envelope.address, queue);
    assert_eq!(&delivery.envelope.payload[..], b"[1,2]");
    assert_eq!(
        delivery.envelope.correlation_id.as_deref(),
        Some(correlation_id.as_str())
    );
    assert_eq!(
        delivery.envelope.reply_to,
        Some(Address::from("test.replies"))
    );
    assert_eq!(
        delivery.envelope.content_type.as_deref(),
        Some(JSON_CONTENT_TYPE)
    );
    assert!(!delivery.redelivered);
}

#[tokio::test]
async fn memory_manual_ack_settles_delivery() {
    // ---
    let hub = MemoryHub::new();
    let connection = create_memory_connection_with_hub("mmasd", hub.clone());
    let channel = connection.create_channel().await.unwrap();

    let queue = channel
        .declare_queue(QueueDeclaration::shared("ack.queue"))
        .await
        .unwrap();
    let mut sub = channel
        .consume(&queue, ConsumeOptions { auto_ack: false })
        .await
        .unwrap();

    channel
        .publish(Envelope::response(
            queue.clone(),
            Bytes::from_static(b"1"),
            Arc::from("c-1"),
        ))
        .await
        .unwrap();

    let delivery = sub.inbox.recv().await.unwrap();
    assert_eq!(hub.unacked_count("ack.queue"), 1);

    delivery.ack().await.unwrap();
    assert_eq!(hub.unacked_count("ack.queue"), 0);
}

#[tokio::test]
async fn memory_auto_ack_tracks_nothing() {
    // ---
    let hub = MemoryHub::new();
    let connection = create_memory_connection_with_hub("mmatn", hub.clone());
    let channel = connection.create_channel().await.unwrap();

    let queue = channel
        .declare_queue(QueueDeclaration::transient())
        .await
        .unwrap();
    let mut sub = channel
        .consume(&queue, ConsumeOptions { auto_ack: true })
        .await
        .unwrap();

    channel
        .publish(Envelope::response(
            queue.clone(),
            Bytes::from_static(b"1"),
            Arc::from("c-1"),
        ))
        .await
        .unwrap();

    let delivery = sub.inbox.recv().await.unwrap();
    assert_eq!(hub.unacked_count(queue.as_str()), 0);
    delivery.ack().await.unwrap();
}

#[tokio::test]
async fn memory_unacked_redelivered_to_other_channel() {
    // ---
    let hub = MemoryHub::new();
    let connection = create_memory_connection_with_hub("mmurtoc", hub.clone());
    let first = connection.create_channel().await.unwrap();
    let second = connection.create_channel().await.unwrap();

    let queue = first
        .declare_queue(QueueDeclaration::shared("work.queue"))
        .await
        .unwrap();

    let mut first_sub = first.consume(&queue, ConsumeOptions::default()).await.unwrap();
    let _ = first
        .publish(Envelope::response(
            queue.clone(),
            Bytes::from_static(b"job"),
            Arc::from("job-1"),
        ))
        .await;
    let taken = first_sub.inbox.recv().await.unwrap();
    assert!(!taken.redelivered);

    let mut second_sub = second.consume(&queue, ConsumeOptions::default()).await.unwrap();

    // Dropped without ack, then the channel goes away
    drop(taken);
    first.close().await.unwrap();

    let again = timeout(Duration::from_millis(100), second_sub.inbox.recv())
        .await
        .expect("not redelivered")
        .unwrap();
    assert!(again.redelivered);
    assert_eq!(&again.envelope.payload[..], b"job");
}

#[tokio::test]
async fn memory_exclusive_queue_rejects_other_channels() {
    // ---
    let hub = MemoryHub::new();
    let connection = create_memory_connection_with_hub("mmeqroc", hub.clone());
    let owner = connection.create_channel().await.unwrap();
    let other = connection.create_channel().await.unwrap();

    let queue = owner
        .declare_queue(QueueDeclaration {
            name: Some(Address::from("private.queue")),
            ..QueueDeclaration::transient()
        })
        .await
        .unwrap();

    let err = other
        .declare_queue(QueueDeclaration {
            name: Some(queue.clone()),
            ..QueueDeclaration::transient()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Transport(_)));

    owner.close().await.unwrap();
    assert!(!hub.has_queue("private.queue"));
}

#[tokio::test]
async fn memory_consume_undeclared_queue_fails() {
    // ---
    let hub = MemoryHub::new();
    let connection = create_memory_connection_with_hub("mcuqf", hub);
    let channel = connection.create_channel().await.unwrap();

    let err = channel
        .consume(&Address::from("missing"), ConsumeOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Transport(_)));
}

#[tokio::test]
async fn memory_connection_close_closes_every_channel() {
    // ---
    let hub = MemoryHub::new();
    let connection = create_memory_connection_with_hub("mcccec", hub.clone());
    let a = connection.create_channel().await.unwrap();
    let b = connection.create_channel().await.unwrap();
    assert_ne!(a.transport_id(), b.transport_id());

    let queue = a
        .declare_queue(QueueDeclaration::shared("shared.queue"))
        .await
        .unwrap();
    let mut sub = b.consume(&queue, ConsumeOptions::default()).await.unwrap();

    connection.close().await.unwrap();

    assert!(sub.inbox.recv().await.is_none());
    assert_eq!(hub.consumer_count("shared.queue"), 0);
    assert!(hub.has_queue("shared.queue"));

    let err = a
        .publish(Envelope::response(
            queue,
            Bytes::new(),
            Arc::from("late"),
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Transport(_)));
}
