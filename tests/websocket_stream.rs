//! End-to-end streaming over a real socket

use futures_util::StreamExt;
use sensorcast::api::{build_router, ApiConfig, AppState};
use sensorcast::config::Config;
use sensorcast::sensor::{Reading, SyntheticSource};
use sensorcast::server::Server;
use sensorcast::{ConnectionHub, HubConfig, SessionConfig};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

fn local_config(tick_ms: u64) -> Config {
    let mut config = Config::default();
    config.server.host = "127.0.0.1".to_string();
    config.server.port = 0;
    config.producer.tick_ms = tick_ms;
    config
}

/// Read text frames until one carries a reading, skipping pings
async fn next_readings<S>(stream: &mut S) -> Vec<Reading>
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .expect("websocket error");

        if let Message::Text(text) = message {
            return text
                .split('\n')
                .map(|line| serde_json::from_str(line).unwrap())
                .collect();
        }
    }
}

#[tokio::test]
async fn test_viewers_receive_readings() {
    let server = Server::start(local_config(10), SyntheticSource::default())
        .await
        .unwrap();
    let addr = server.local_addr();
    let hub = server.hub().clone();
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(server.run(shutdown.clone()));

    let url = format!("ws://{}/ws", addr);
    let (first, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    let (second, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    let (_first_tx, mut first_rx) = first.split();
    let (_second_tx, mut second_rx) = second.split();

    let a = next_readings(&mut first_rx).await;
    let b = next_readings(&mut second_rx).await;
    assert!(!a.is_empty());
    assert!(!b.is_empty());
    for reading in a.iter().chain(b.iter()) {
        assert!(reading.x.abs() <= 1.0 + 1e-9);
    }
    assert_eq!(hub.connection_count().await, 2);

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    // Both viewers see the stream end
    for rx in [&mut first_rx, &mut second_rx] {
        loop {
            match tokio::time::timeout(Duration::from_secs(5), rx.next()).await.unwrap() {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => continue,
            }
        }
    }
}

#[tokio::test]
async fn test_disconnected_viewer_is_unregistered() {
    let server = Server::start(local_config(10), SyntheticSource::default())
        .await
        .unwrap();
    let addr = server.local_addr();
    let hub = server.hub().clone();
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(server.run(shutdown.clone()));

    let url = format!("ws://{}/ws", addr);
    let (staying, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    let (leaving, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    let (_staying_tx, mut staying_rx) = staying.split();
    drop(leaving);

    let mut remaining = 0;
    for _ in 0..50 {
        remaining = hub.connection_count().await;
        if remaining == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(remaining, 1);

    // The remaining viewer keeps streaming
    assert!(!next_readings(&mut staying_rx).await.is_empty());

    shutdown.cancel();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_closed_hub_rejects_new_viewers() {
    let hub = ConnectionHub::spawn(HubConfig::default());
    hub.close().await;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = build_router(AppState::new(
        hub.clone(),
        SessionConfig::default(),
        ApiConfig::default(),
    ));
    let server = tokio::spawn(async move { axum::serve(listener, router).await });

    let url = format!("ws://{}/ws", addr);
    let (socket, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    let (_tx, mut rx) = socket.split();

    // The upgrade completes, then the socket is closed without any payload
    loop {
        match tokio::time::timeout(Duration::from_secs(5), rx.next())
            .await
            .expect("socket was not closed")
        {
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
            Some(Ok(Message::Text(text))) => panic!("unexpected payload: {}", text),
            Some(Ok(_)) => continue,
        }
    }
    assert_eq!(hub.connection_count().await, 0);

    server.abort();
}
