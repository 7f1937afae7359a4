//! Heartbeat cadence, sequence echo, latency and liveness.

use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tokio::time::Instant;

use crate::common::{Event, TestGateway};
use gateway_client::Phase;

#[tokio::test(start_paused = true)]
async fn test_first_heartbeat_after_interval_with_null_sequence() {
    let mut gw = TestGateway::new();
    gw.client.connect().await.unwrap();
    let mut conn = gw.next_connection().await;

    let start = Instant::now();
    conn.hello(41250);
    let identify = conn.expect_op(2).await;
    assert_eq!(identify["d"]["token"], "test-token");
    assert_eq!(gw.client.phase(), Phase::Identified);

    let heartbeat = conn.expect_op(1).await;
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(41250), "sent after {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(41300), "sent after {:?}", elapsed);
    assert_eq!(heartbeat["d"], Value::Null);

    gw.client.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_carries_latest_sequence() {
    let mut gw = TestGateway::new();
    gw.client.connect().await.unwrap();
    let mut conn = gw.next_connection().await;
    conn.hello(41250);
    conn.expect_op(2).await;

    conn.dispatch(3, "TYPING_START", json!({"channel_id": "1"}));
    match gw.next_event().await {
        Event::Unhandled(label, _) => assert_eq!(label, "TYPING_START"),
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(gw.client.sequence(), Some(3));

    let heartbeat = conn.expect_op(1).await;
    assert_eq!(heartbeat["d"], 3);

    gw.client.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_ack_reports_latency_change() {
    let mut gw = TestGateway::new();
    let mut conn = gw.connect_ready(41250).await;

    conn.expect_op(1).await;
    conn.ack();

    conn.expect_op(1).await;
    tokio::time::sleep(Duration::from_millis(120)).await;
    conn.ack();

    match gw.next_event().await {
        Event::Latency(_, new) => assert_eq!(new, 120.0),
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(gw.client.latency(), 120.0);
    assert_eq!(gw.client.context().latency(), 120.0);

    gw.client.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_server_heartbeat_request_answered_immediately() {
    let mut gw = TestGateway::new();
    let mut conn = gw.connect_ready(41250).await;

    let start = Instant::now();
    conn.push(json!({"op": 1, "d": null}));
    let heartbeat = conn.expect_op(1).await;

    assert_eq!(heartbeat["d"], 1);
    assert!(start.elapsed() < Duration::from_millis(10));

    gw.client.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_missed_ack_reconnects_exactly_once() {
    let mut gw = TestGateway::new();
    let mut conn = gw.connect_ready(41250).await;

    // Never acknowledged.
    conn.expect_op(1).await;

    assert_eq!(
        gw.next_event().await,
        Event::ConnectionError(1006, "heartbeat acknowledgement not received".into())
    );

    let mut second = gw.next_connection().await;
    assert!(conn.is_closed());
    assert_eq!(conn.transport.close_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert!(conn.drain_sent().is_empty(), "no heartbeat resent on the dead link");

    second.hello(41250);
    let resume = second.expect_op(6).await;
    assert_eq!(resume["d"]["session_id"], "session-1");
    assert_eq!(resume["d"]["seq"], 1);
    assert_eq!(gw.opens(), 2);

    gw.client.close().await;
}
