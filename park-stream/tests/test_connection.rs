//! Connection lifecycle integration tests.
//!
//! Drives a `ConnectionManager` against a local WebSocket server: frame
//! delivery, reconnection and its budget, cancellation by `disconnect()`,
//! sending, and the real WebSocket prober.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

use common::{EventLog, TestServer, CAR_IN_FRAME};
use park_stream::{ConnectionManager, ConnectionState, Direction, StreamEvent, Topic, VehicleKind};

// ---- Frame delivery ----

#[tokio::test]
async fn car_in_frame_reaches_handlers_and_history() {
    let mut server = TestServer::start().await;
    let (manager, _prober) = common::create_test_manager(&server, |_| {});
    let log = EventLog::attach(&manager);

    manager.connect().await.unwrap();
    assert_eq!(manager.state(), ConnectionState::Connected);
    assert_eq!(manager.current_endpoint().await, Some(server.ws_url()));

    let mut client = server.next_client().await;
    client.send(Message::Text(CAR_IN_FRAME.to_string())).await.unwrap();

    let records = manager.records().clone();
    assert!(common::eventually(|| records.len() == 1).await);
    assert_eq!(log.count(Topic::CarIn), 1);
    assert_eq!(log.count(Topic::RecordAdded), 1);
    assert_eq!(log.count(Topic::CarOut), 0);

    let head = manager.latest_records(1).remove(0);
    assert_eq!(head.plate_number.as_deref(), Some("京A12345"));
    assert_eq!(head.direction, Direction::Entry);
    assert_eq!(head.vehicle_kind, VehicleKind::Fuel);

    // connected first, then the record events in order
    assert_eq!(
        log.topics(),
        vec![Topic::Connected, Topic::CarIn, Topic::RecordAdded]
    );

    manager.disconnect().await;
}

#[tokio::test]
async fn malformed_frames_do_not_break_the_stream() {
    let mut server = TestServer::start().await;
    let (manager, _prober) = common::create_test_manager(&server, |_| {});
    manager.connect().await.unwrap();

    let mut client = server.next_client().await;
    client.send(Message::Text("not json".into())).await.unwrap();
    client.send(Message::Text("[1,2]".into())).await.unwrap();
    client.send(Message::Text(CAR_IN_FRAME.to_string())).await.unwrap();

    let records = manager.records().clone();
    assert!(common::eventually(|| records.len() == 1).await);
    assert_eq!(manager.state(), ConnectionState::Connected);

    manager.disconnect().await;
}

#[tokio::test]
async fn handshake_ack_and_heartbeat_are_published() {
    let mut server = TestServer::start().await;
    let (manager, _prober) = common::create_test_manager(&server, |_| {});
    let log = EventLog::attach(&manager);
    manager.connect().await.unwrap();

    let mut client = server.next_client().await;
    client
        .send(Message::Text(r#"{"type":"success","content":"connected"}"#.into()))
        .await
        .unwrap();
    client
        .send(Message::Text(r#"{"type":"heartbeat"}"#.into()))
        .await
        .unwrap();

    assert!(common::eventually(|| log.count(Topic::Heartbeat) == 1).await);
    let acks: Vec<_> = log
        .events()
        .into_iter()
        .filter_map(|e| match e {
            StreamEvent::Connected { ack: Some(ack), .. } => Some(ack),
            _ => None,
        })
        .collect();
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0]["content"], "connected");
    assert!(manager.records().is_empty());

    manager.disconnect().await;
}

// ---- Reconnection ----

#[tokio::test]
async fn attempt_counter_is_zero_after_every_reconnect() {
    let mut server = TestServer::start().await;
    let (manager, _prober) = common::create_test_manager(&server, |_| {});
    let log = EventLog::attach(&manager);

    manager.connect().await.unwrap();
    let mut client = server.next_client().await;

    for cycle in 1..=3 {
        if cycle % 2 == 0 {
            drop(client);
        } else {
            client.close(None).await.unwrap();
        }
        client = server.next_client().await;

        assert!(common::eventually(|| log.count(Topic::Connected) == cycle + 1).await);
        let status = manager.connection_status().await;
        assert_eq!(status.state, ConnectionState::Connected);
        assert_eq!(status.reconnect_attempts, 0);
    }
    assert_eq!(log.count(Topic::Disconnected), 3);

    manager.disconnect().await;
}

#[tokio::test]
async fn exhausted_reconnects_fail_until_explicit_connect() {
    let mut server = TestServer::start().await;
    let (manager, prober) = common::create_test_manager(&server, |_| {});
    let log = EventLog::attach(&manager);

    manager.connect().await.unwrap();
    let mut client = server.next_client().await;
    assert_eq!(prober.calls(), 1);

    prober.set_reachable(false);
    client.close(None).await.unwrap();

    common::wait_for_state(&manager, ConnectionState::Failed).await;
    // one probe per reconnect attempt, five attempts
    assert_eq!(prober.calls(), 6);
    assert_eq!(log.error_kinds().last(), Some(&"reconnect_exhausted"));
    assert_eq!(manager.connection_status().await.reconnect_attempts, 5);

    // nothing else is scheduled
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(prober.calls(), 6);
    assert_eq!(manager.state(), ConnectionState::Failed);

    prober.set_reachable(true);
    manager.connect().await.unwrap();
    let _client = server.next_client().await;
    let status = manager.connection_status().await;
    assert_eq!(status.state, ConnectionState::Connected);
    assert_eq!(status.reconnect_attempts, 0);
    assert_eq!(prober.calls(), 7);

    manager.disconnect().await;
}

#[tokio::test]
async fn disconnect_during_reconnect_delay_cancels_it() {
    let mut server = TestServer::start().await;
    let (manager, prober) =
        common::create_test_manager(&server, |c| c.reconnect.base_interval_ms = 300);

    manager.connect().await.unwrap();
    let mut client = server.next_client().await;

    let connecting_seen = Arc::new(AtomicUsize::new(0));
    let mut states = manager.state_receiver();
    let seen = connecting_seen.clone();
    let watcher = tokio::spawn(async move {
        while states.changed().await.is_ok() {
            if *states.borrow_and_update() == ConnectionState::Connecting {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        }
    });

    client.close(None).await.unwrap();
    common::wait_for_state(&manager, ConnectionState::Reconnecting).await;

    manager.disconnect().await;
    assert_eq!(manager.state(), ConnectionState::Disconnected);

    assert!(!server.client_within(Duration::from_millis(600)).await);
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert_eq!(prober.calls(), 1);
    assert_eq!(connecting_seen.load(Ordering::SeqCst), 0);

    watcher.abort();
}

#[tokio::test]
async fn explicit_connect_while_reconnecting_resets_the_counter() {
    let mut server = TestServer::start().await;
    let (manager, _prober) =
        common::create_test_manager(&server, |c| c.reconnect.base_interval_ms = 5_000);

    manager.connect().await.unwrap();
    let mut client = server.next_client().await;
    client.close(None).await.unwrap();

    common::wait_for_state(&manager, ConnectionState::Reconnecting).await;
    assert_eq!(manager.connection_status().await.reconnect_attempts, 1);

    manager.connect().await.unwrap();
    let _client = server.next_client().await;
    let status = manager.connection_status().await;
    assert_eq!(status.state, ConnectionState::Connected);
    assert_eq!(status.reconnect_attempts, 0);

    manager.disconnect().await;
}

#[tokio::test]
async fn connect_is_a_no_op_when_connected() {
    let mut server = TestServer::start().await;
    let (manager, prober) = common::create_test_manager(&server, |_| {});

    manager.connect().await.unwrap();
    let _client = server.next_client().await;
    manager.connect().await.unwrap();

    assert_eq!(prober.calls(), 1);
    assert!(!server.client_within(Duration::from_millis(100)).await);

    manager.disconnect().await;
}

#[tokio::test]
async fn abandoned_connect_still_settles_the_state() {
    let mut server = TestServer::start().await;
    let (manager, prober) = common::create_test_manager(&server, |_| {});
    prober.set_delay(Duration::from_millis(300));

    let abandoned = tokio::time::timeout(Duration::from_millis(50), manager.connect()).await;
    assert!(abandoned.is_err());
    assert_eq!(manager.state(), ConnectionState::Connecting);

    common::wait_for_state(&manager, ConnectionState::Connected).await;
    let _client = server.next_client().await;
    assert_eq!(prober.calls(), 1);

    manager.disconnect().await;
    prober.set_delay(Duration::ZERO);
    manager.connect().await.unwrap();
    let _client = server.next_client().await;
    assert_eq!(prober.calls(), 2);
    assert_eq!(manager.state(), ConnectionState::Connected);

    manager.disconnect().await;
}

#[tokio::test]
async fn abandoned_failing_connect_allows_a_new_attempt() {
    let mut server = TestServer::start().await;
    let (manager, prober) = common::create_test_manager(&server, |_| {});
    prober.set_reachable(false);
    prober.set_delay(Duration::from_millis(200));

    let abandoned = tokio::time::timeout(Duration::from_millis(20), manager.connect()).await;
    assert!(abandoned.is_err());
    common::wait_for_state(&manager, ConnectionState::Failed).await;

    prober.set_reachable(true);
    prober.set_delay(Duration::ZERO);
    manager.connect().await.unwrap();
    let _client = server.next_client().await;
    assert_eq!(prober.calls(), 2);
    assert_eq!(manager.state(), ConnectionState::Connected);

    manager.disconnect().await;
}

// ---- Disconnect and send ----

#[tokio::test]
async fn disconnect_closes_the_socket_once() {
    let mut server = TestServer::start().await;
    let (manager, _prober) = common::create_test_manager(&server, |_| {});
    let log = EventLog::attach(&manager);

    manager.connect().await.unwrap();
    let mut client = server.next_client().await;

    manager.disconnect().await;
    manager.disconnect().await;
    assert_eq!(log.count(Topic::Disconnected), 1);
    assert!(manager.current_endpoint().await.is_none());

    // the server sees a close frame or the end of the stream
    let next = tokio::time::timeout(common::TEST_TIMEOUT, client.next())
        .await
        .unwrap();
    assert!(matches!(next, Some(Ok(Message::Close(_))) | None | Some(Err(_))));
}

#[tokio::test]
async fn send_only_while_connected() {
    let mut server = TestServer::start().await;
    let (manager, _prober) = common::create_test_manager(&server, |_| {});
    let log = EventLog::attach(&manager);

    manager.connect().await.unwrap();
    let mut client = server.next_client().await;

    manager
        .send(&serde_json::json!({"type": "subscribe", "yardCode": "PARK001"}))
        .await
        .unwrap();
    let received = tokio::time::timeout(common::TEST_TIMEOUT, client.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let Message::Text(text) = received else {
        panic!("expected a text frame");
    };
    let body: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(body["type"], "subscribe");

    manager.disconnect().await;
    let err = manager.send(&serde_json::json!({"type": "ping"})).await.unwrap_err();
    assert_eq!(err.kind(), "send_failure");
    assert_eq!(log.error_kinds(), vec!["send_failure"]);
}

#[tokio::test]
async fn panicking_error_handler_does_not_block_the_next() {
    let server = TestServer::start().await;
    let (manager, _prober) = common::create_test_manager(&server, |_| {});

    let delivered = Arc::new(AtomicUsize::new(0));
    manager.on(Topic::Error, |_| panic!("handler failure"));
    let counter = delivered.clone();
    manager.on(Topic::Error, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    assert!(manager.send("hello").await.is_err());
    assert_eq!(delivered.load(Ordering::SeqCst), 1);
}

// ---- Real prober ----

#[tokio::test]
async fn real_prober_finds_the_local_server() {
    let mut server = TestServer::start().await;
    let config = common::create_test_config(&server.base_url());
    let manager = ConnectionManager::new(&config);

    manager.connect().await.unwrap();
    assert_eq!(manager.state(), ConnectionState::Connected);

    // the probe connection comes first and is closed by the client
    let mut probe = server.next_client().await;
    let mut live = server.next_client().await;
    let _ = probe.send(Message::Text(CAR_IN_FRAME.to_string())).await;
    live.send(Message::Text(CAR_IN_FRAME.to_string())).await.unwrap();

    let records = manager.records().clone();
    assert!(common::eventually(|| records.len() == 1).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(records.len(), 1);

    manager.disconnect().await;
}

#[tokio::test]
async fn real_prober_reports_unreachable_backend() {
    let port = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let config = common::create_test_config(&format!("http://127.0.0.1:{port}"));
    let manager = ConnectionManager::new(&config);
    let log = EventLog::attach(&manager);

    let err = manager.connect().await.unwrap_err();
    assert_eq!(err.kind(), "no_reachable_endpoint");
    assert_eq!(manager.state(), ConnectionState::Failed);
    assert_eq!(log.error_kinds(), vec!["no_reachable_endpoint"]);

    let report = manager.diagnose().await;
    assert_eq!(report.total, 1);
    assert_eq!(report.successful, 0);
}
