//! Integration tests for the in-memory channel transport.

use std::time::Duration;

use zonelink_transport::{
    ChannelConnection, ChannelMessenger, Connection, Messenger, Outbound, SessionId,
};

#[tokio::test]
async fn test_writer_task_sees_records_in_send_order_per_session() {
    let (messenger, mut rx) = ChannelMessenger::new(8);

    let writer = tokio::spawn(async move {
        let mut seen = Vec::new();
        while let Some(event) = rx.recv().await {
            seen.push(event);
        }
        seen
    });

    for i in 0..3u8 {
        messenger.send_stream(SessionId(1), &[i]).await.unwrap();
        messenger.send_datagram(SessionId(2), &[i, i]).await.unwrap();
    }
    messenger.close(SessionId(1)).await.unwrap();
    drop(messenger);

    let seen = writer.await.unwrap();
    let session_one: Vec<_> = seen
        .iter()
        .filter_map(|e| match e {
            Outbound::Stream { session_id: SessionId(1), data } => Some(data[0]),
            _ => None,
        })
        .collect();
    assert_eq!(session_one, vec![0, 1, 2]);
    assert_eq!(
        seen.last(),
        Some(&Outbound::Close { session_id: SessionId(1) })
    );
}

#[tokio::test]
async fn test_full_channel_applies_backpressure() {
    let (messenger, mut rx) = ChannelMessenger::new(1);
    messenger.send_datagram(SessionId(1), &[1]).await.unwrap();

    // The channel is full; the next send waits for the writer.
    let blocked =
        tokio::time::timeout(Duration::from_millis(50), messenger.send_datagram(SessionId(1), &[2]))
            .await;
    assert!(blocked.is_err(), "send should wait while the channel is full");

    assert!(rx.recv().await.is_some());
    messenger.send_datagram(SessionId(1), &[3]).await.unwrap();
}

#[tokio::test]
async fn test_connection_pair_is_duplex_across_tasks() {
    let (server, client) = ChannelConnection::pair(4);

    let echo = tokio::spawn(async move {
        while let Some(data) = server.recv().await.unwrap() {
            server.send(&data).await.unwrap();
        }
    });

    client.send(b"ping").await.unwrap();
    assert_eq!(client.recv().await.unwrap(), Some(b"ping".to_vec()));

    client.close().await.unwrap();
    echo.await.unwrap();
}
