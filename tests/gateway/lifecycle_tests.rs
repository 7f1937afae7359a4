//! Connect/disconnect lifecycle of the controller.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio_test::assert_ok;

use crate::common::{test_config, RecordingRest, StalledConnector, TestGateway};
use gateway_client::gateway::NoopHandler;
use gateway_client::{GatewayClient, GatewayError, Phase};

#[tokio::test(start_paused = true)]
async fn test_new_client_is_disconnected() {
    let gw = TestGateway::new();

    assert_eq!(gw.client.phase(), Phase::Disconnected);
    assert_eq!(gw.client.sequence(), None);
    assert_eq!(gw.client.latency(), 0.0);
    assert_eq!(gw.opens(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_connect_reaches_connected() {
    let mut gw = TestGateway::new();
    let _conn = gw.connect_ready(41250).await;

    assert_eq!(gw.client.phase(), Phase::Connected);

    gw.client.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_connect_is_idempotent() {
    let mut gw = TestGateway::new();

    assert_ok!(gw.client.connect().await);
    assert_ok!(gw.client.connect().await);
    let _conn = gw.next_connection().await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(gw.opens(), 1);

    gw.client.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_connect_after_disconnect_fails() {
    let mut gw = TestGateway::new();
    let _conn = gw.connect_ready(41250).await;

    gw.client.disconnect().await;

    assert_eq!(gw.client.phase(), Phase::Disconnected);
    assert!(matches!(gw.client.connect().await, Err(GatewayError::Closed)));
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_before_connect() {
    let gw = TestGateway::new();

    gw.client.disconnect().await;

    assert_eq!(gw.client.phase(), Phase::Disconnected);
    assert!(matches!(gw.client.connect().await, Err(GatewayError::Closed)));
    assert_eq!(gw.opens(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_disconnects_tear_down_once() {
    let mut gw = TestGateway::new();
    let conn = gw.connect_ready(41250).await;

    tokio::join!(gw.client.disconnect(), gw.client.disconnect());

    assert_eq!(gw.client.phase(), Phase::Disconnected);
    assert_eq!(conn.transport.close_calls.load(Ordering::SeqCst), 1);
    assert_eq!(Arc::strong_count(&conn.transport), 1);
}

#[tokio::test(start_paused = true)]
async fn test_close_releases_background_tasks() {
    let mut gw = TestGateway::new();
    let conn = gw.connect_ready(41250).await;
    let handler = gw.handler.clone();
    let connector = gw.connector.clone();

    gw.client.close().await;

    assert!(conn.is_closed());
    assert_eq!(Arc::strong_count(&conn.transport), 1);
    // test harness + local clone
    assert_eq!(Arc::strong_count(&handler), 2);
    assert_eq!(Arc::strong_count(&connector), 2);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_while_awaiting_hello() {
    let mut gw = TestGateway::new();
    gw.client.connect().await.unwrap();
    let conn = gw.next_connection().await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(gw.client.phase(), Phase::AwaitingHello);

    gw.client.disconnect().await;

    assert_eq!(gw.client.phase(), Phase::Disconnected);
    assert!(conn.is_closed());
    assert!(gw.drain_events().is_empty(), "teardown is not reported as an error");
}

#[tokio::test(start_paused = true)]
async fn test_no_heartbeats_after_disconnect() {
    let mut gw = TestGateway::new();
    let mut conn = gw.connect_ready(41250).await;

    gw.client.disconnect().await;
    tokio::time::sleep(Duration::from_secs(200)).await;

    assert!(conn.drain_sent().is_empty());
    assert_eq!(gw.opens(), 1);
    assert!(gw.drain_events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_bounded_when_peer_stalls() {
    let config = test_config();
    let shutdown_timeout = config.shutdown_timeout;
    let client = GatewayClient::builder("test-token")
        .config(config)
        .connector(Arc::new(StalledConnector))
        .rest(Arc::new(RecordingRest::default()))
        .handler(NoopHandler)
        .build()
        .unwrap();

    assert_ok!(client.connect().await);
    // The reader takes hello and blocks sending identify.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(client.phase(), Phase::AwaitingHello);

    let start = tokio::time::Instant::now();
    tokio::time::timeout(Duration::from_secs(60), client.disconnect())
        .await
        .expect("disconnect should not hang on a stalled peer");

    assert!(
        start.elapsed() <= shutdown_timeout * 2,
        "disconnect took {:?}",
        start.elapsed()
    );
    assert_eq!(client.phase(), Phase::Disconnected);
}
