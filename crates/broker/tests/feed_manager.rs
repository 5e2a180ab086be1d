//! Integration tests for the feed manager against a scripted in-process
//! broker.
//!
//! Each test binds a local WebSocket listener, starts a device feed
//! pointed at it, and drives both sides: the server script reads the
//! subscription burst and injects value frames, while assertions watch
//! the event hub and the manager's status/publish surfaces.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;

use poolsense_broker::client::ConnectionError;
use poolsense_broker::manager::{FeedError, FeedManager};
use poolsense_broker::reconnect::ReconnectConfig;
use poolsense_core::device::{ConnectionState, DeviceKind, DeviceRecord};
use poolsense_core::{points, DecodedValue, ReadingEvent};
use poolsense_pipeline::EventHub;

type WsStream = tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>;

// ---------------------------------------------------------------------------
// Scripted broker helpers
// ---------------------------------------------------------------------------

async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let url = format!("ws://{}/", listener.local_addr().expect("local addr"));
    (listener, url)
}

async fn accept(listener: &TcpListener) -> WsStream {
    let (stream, _) = tokio::time::timeout(Duration::from_secs(5), listener.accept())
        .await
        .expect("timed out waiting for a connection")
        .expect("accept");
    tokio_tungstenite::accept_async(stream)
        .await
        .expect("websocket handshake")
}

/// Read the subscription burst: one subscribe and one get per sensor.
async fn read_burst(ws: &mut WsStream, kind: DeviceKind) -> Vec<String> {
    let expected = points::sensor_specs(kind).count() * 2;
    let mut texts = Vec::new();
    while texts.len() < expected {
        texts.push(next_text(ws).await);
    }
    texts
}

async fn next_text(ws: &mut WsStream) -> String {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a frame");
        match msg {
            Some(Ok(Message::Text(t))) => return t.to_string(),
            Some(Ok(_)) => {}
            other => panic!("Connection ended while reading: {other:?}"),
        }
    }
}

async fn send_text(ws: &mut WsStream, text: &str) {
    ws.send(Message::Text(text.into())).await.expect("send frame");
}

async fn recv_reading(rx: &mut broadcast::Receiver<ReadingEvent>) -> ReadingEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for a reading")
        .expect("event hub closed")
}

fn device() -> DeviceRecord {
    DeviceRecord {
        id: "D1".to_string(),
        kind: DeviceKind::AutomaticSalt,
        name: "Backyard pool".to_string(),
        access_token: "tok-1".to_string(),
    }
}

fn fast_reconnect() -> ReconnectConfig {
    ReconnectConfig {
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(40),
        multiplier: 2.0,
        failure_threshold: 2,
    }
}

// ---------------------------------------------------------------------------
// Test: connecting subscribes to every sensor and requests current values
// ---------------------------------------------------------------------------

#[tokio::test]
async fn connector_subscribes_and_emits_decoded_readings() {
    let (listener, url) = bind().await;
    let hub = Arc::new(EventHub::default());
    let manager = FeedManager::new(url, Arc::clone(&hub), fast_reconnect());
    let mut readings = hub.subscribe();

    manager.start(device()).await;

    let mut ws = accept(&listener).await;
    let burst = read_burst(&mut ws, DeviceKind::AutomaticSalt).await;
    assert!(burst.contains(&r#"{"type":"subscribe","data":{"topic":"D1/v/4.182"}}"#.to_string()));
    assert!(burst.contains(&r#"{"type":"get","data":{"topic":"D1/g/4.182"}}"#.to_string()));

    send_text(
        &mut ws,
        r#"{"type":"value","data":{"topic":"D1/v/4.182","value":"68"}}"#,
    )
    .await;

    let event = recv_reading(&mut readings).await;
    assert_eq!(event.device_id, "D1");
    assert_eq!(event.sensor, "4.182");
    assert_eq!(event.sensor_name, "pH");
    assert_eq!(event.value, DecodedValue::Number(6.8));

    // A broker-supplied timestamp becomes the observation time.
    send_text(
        &mut ws,
        r#"{"type":"value","data":{"topic":"D1/v/4.98","value":214,"timestamp":"2026-08-22T10:00:00Z"}}"#,
    )
    .await;

    let event = recv_reading(&mut readings).await;
    assert_eq!(event.sensor_name, "Temperature");
    assert_eq!(event.value, DecodedValue::Number(21.4));
    assert_eq!(event.observed_at.to_rfc3339(), "2026-08-22T10:00:00+00:00");

    manager.shutdown().await;
}

// ---------------------------------------------------------------------------
// Test: malformed and foreign frames are dropped, the session survives
// ---------------------------------------------------------------------------

#[tokio::test]
async fn a_bad_frame_never_ends_the_session() {
    let (listener, url) = bind().await;
    let hub = Arc::new(EventHub::default());
    let manager = FeedManager::new(url, Arc::clone(&hub), fast_reconnect());
    let mut readings = hub.subscribe();

    manager.start(device()).await;

    let mut ws = accept(&listener).await;
    read_burst(&mut ws, DeviceKind::AutomaticSalt).await;

    for text in [
        "not json at all",
        r#"{"type":"value","data":{"topic":"OTHER/v/4.182","value":"70"}}"#,
        r#"{"type":"value","data":{"topic":"D1/v/9.999","value":"1"}}"#,
        r#"{"type":"value","data":{"topic":"D1/x/4.182","value":"1"}}"#,
    ] {
        send_text(&mut ws, text).await;
    }
    send_text(
        &mut ws,
        r#"{"type":"value","data":{"topic":"D1/v/4.98","value":"214"}}"#,
    )
    .await;

    // The only reading to come out is the valid one.
    let event = recv_reading(&mut readings).await;
    assert_eq!(event.sensor, "4.98");
    assert_eq!(event.value, DecodedValue::Number(21.4));
    assert_eq!(event.unit.as_deref(), Some("°C"));

    manager.shutdown().await;
}

// ---------------------------------------------------------------------------
// Test: a dropped connection reconnects and re-issues the subscriptions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reconnects_and_resubscribes_after_a_drop() {
    let (listener, url) = bind().await;
    let hub = Arc::new(EventHub::default());
    let manager = FeedManager::new(url, Arc::clone(&hub), fast_reconnect());
    let mut readings = hub.subscribe();

    manager.start(device()).await;

    let mut ws = accept(&listener).await;
    read_burst(&mut ws, DeviceKind::AutomaticSalt).await;
    drop(ws);

    // The connector comes back and re-issues the full subscription set.
    let mut ws = accept(&listener).await;
    let burst = read_burst(&mut ws, DeviceKind::AutomaticSalt).await;
    assert!(burst.contains(&r#"{"type":"subscribe","data":{"topic":"D1/v/4.182"}}"#.to_string()));

    send_text(
        &mut ws,
        r#"{"type":"value","data":{"topic":"D1/v/4.182","value":"71"}}"#,
    )
    .await;

    let event = recv_reading(&mut readings).await;
    assert_eq!(event.value, DecodedValue::Number(7.1));

    manager.shutdown().await;
}

// ---------------------------------------------------------------------------
// Test: publish encodes the display value and writes a set frame
// ---------------------------------------------------------------------------

#[tokio::test]
async fn publish_encodes_and_writes_set_frames() {
    let (listener, url) = bind().await;
    let hub = Arc::new(EventHub::default());
    let manager = FeedManager::new(url, hub, fast_reconnect());

    manager.start(device()).await;

    let mut ws = accept(&listener).await;
    read_burst(&mut ws, DeviceKind::AutomaticSalt).await;

    // Enumerated option goes through the family's encode map.
    manager
        .publish("D1", "5.40", "Off")
        .await
        .expect("publish should succeed");
    let frame = next_text(&mut ws).await;
    assert_eq!(
        frame,
        r#"{"type":"set","data":{"topic":"D1/s/5.40","value":"19.18"}}"#
    );

    // Numeric setpoint is scaled back up by the coefficient.
    manager
        .publish("D1", "4.2", "7.2")
        .await
        .expect("publish should succeed");
    let frame = next_text(&mut ws).await;
    assert_eq!(
        frame,
        r#"{"type":"set","data":{"topic":"D1/s/4.2","value":"72"}}"#
    );

    manager.shutdown().await;
}

// ---------------------------------------------------------------------------
// Test: publish surfaces failure instead of queueing while disconnected
// ---------------------------------------------------------------------------

#[tokio::test]
async fn publish_to_an_unstarted_device_fails() {
    let hub = Arc::new(EventHub::default());
    let manager = FeedManager::new("ws://127.0.0.1:9".to_string(), hub, fast_reconnect());

    let err = manager.publish("D1", "5.40", "Off").await.unwrap_err();
    assert_matches!(err, FeedError::NotStarted(_));
}

#[tokio::test]
async fn publish_while_disconnected_is_rejected() {
    let (listener, url) = bind().await;
    drop(listener);

    let hub = Arc::new(EventHub::default());
    let reconnect = ReconnectConfig {
        initial_delay: Duration::from_secs(5),
        ..fast_reconnect()
    };
    let manager = FeedManager::new(url, hub, reconnect);
    manager.start(device()).await;

    // Let the first connect attempt fail; the task is now waiting out
    // its backoff delay.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let err = manager.publish("D1", "5.40", "Off").await.unwrap_err();
    assert_matches!(err, FeedError::Connection(ConnectionError::SessionGone));

    manager.shutdown().await;
}

// ---------------------------------------------------------------------------
// Test: repeated connect failures surface a disconnected status
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failure_threshold_surfaces_a_disconnected_status() {
    let (listener, url) = bind().await;
    drop(listener);

    let hub = Arc::new(EventHub::default());
    let manager = FeedManager::new(url, hub, fast_reconnect());
    manager.start(device()).await;

    let mut state = ConnectionState::Connecting;
    for _ in 0..100 {
        if let Some(status) = manager.status("D1").await {
            state = status.state.clone();
            if state == ConnectionState::Disconnected {
                assert!(status.reason.is_some(), "the connect error should surface");
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(state, ConnectionState::Disconnected);

    manager.shutdown().await;
}

// ---------------------------------------------------------------------------
// Test: start is idempotent per device id
// ---------------------------------------------------------------------------

#[tokio::test]
async fn start_twice_keeps_one_connection() {
    let (listener, url) = bind().await;
    let hub = Arc::new(EventHub::default());
    let manager = FeedManager::new(url, hub, fast_reconnect());

    manager.start(device()).await;
    manager.start(device()).await;

    let mut ws = accept(&listener).await;
    read_burst(&mut ws, DeviceKind::AutomaticSalt).await;

    let second = tokio::time::timeout(Duration::from_millis(300), listener.accept()).await;
    assert!(
        second.is_err(),
        "a duplicate start must not open a second connection"
    );

    manager.shutdown().await;
}

// ---------------------------------------------------------------------------
// Test: stop releases the connection and forgets the device
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stop_releases_the_connection() {
    let (listener, url) = bind().await;
    let hub = Arc::new(EventHub::default());
    let manager = FeedManager::new(url, hub, fast_reconnect());
    manager.start(device()).await;

    let mut ws = accept(&listener).await;
    read_burst(&mut ws, DeviceKind::AutomaticSalt).await;

    manager.stop("D1").await;

    // The broker side observes the close.
    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "broker side should observe the close");

    assert!(manager.status("D1").await.is_none());
    assert_matches!(
        manager.publish("D1", "5.40", "Off").await.unwrap_err(),
        FeedError::NotStarted(_)
    );
}
