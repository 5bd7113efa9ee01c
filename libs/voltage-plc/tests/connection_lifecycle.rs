//! Connection Lifecycle Integration Tests
//!
//! - Suspension of requests while disconnected
//! - Link loss, interruption and automatic reconnection
//! - Disconnect by request (no automatic reconnection)
//! - Caller cancellation and disposal of pending requests

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use voltage_plc::{
    kinds, Address, ByteOrder, ConnectionState, MemoryBackend, Plc, PlcConfig, PlcError, Region,
};

const WAIT: Duration = Duration::from_secs(5);

fn create_test_plc() -> (Plc, Arc<MemoryBackend>) {
    let backend = Arc::new(MemoryBackend::new());
    let config = PlcConfig::new("line1").with_reconnect_delay(Duration::from_millis(10));
    (Plc::new(backend.clone(), config), backend)
}

// ============================================================================
// Suspension
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_read_while_disconnected_completes_after_connect() {
    let (plc, backend) = create_test_plc();
    backend.write_bytes(Region::Data, 1, 0, &[0x01, 0x02]);
    let word = kinds::uint16(Some("word"), Address::data(1, 0), ByteOrder::BigEndian).unwrap();

    let reader = {
        let plc = plc.clone();
        let word = word.clone();
        tokio::spawn(async move { plc.read_value(&word, &CancellationToken::new()).await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!reader.is_finished());
    assert_eq!(backend.stats().reads, 0);

    assert!(plc.connect().await);
    let value = timeout(WAIT, reader).await.unwrap().unwrap().unwrap();
    assert_eq!(value, Some(0x0102));
    assert_eq!(word.value(), 0x0102);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_disconnected_by_request_does_not_reconnect() {
    let (plc, backend) = create_test_plc();
    assert!(plc.connect().await);
    assert!(plc.disconnect().await);

    let byte = kinds::byte(None, Address::data(1, 0)).unwrap();
    let reader = {
        let plc = plc.clone();
        let byte = byte.clone();
        tokio::spawn(async move { plc.read_item(&byte, &CancellationToken::new()).await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!reader.is_finished());
    assert_eq!(backend.stats().opens, 1);
    assert_eq!(plc.state(), ConnectionState::Disconnected);

    assert!(plc.connect().await);
    assert!(timeout(WAIT, reader).await.unwrap().unwrap().unwrap());
}

// ============================================================================
// Link loss and reconnection
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_link_loss_reconnects_and_retries() {
    let (plc, backend) = create_test_plc();
    backend.write_bytes(Region::Data, 3, 4, &[42]);
    assert!(plc.connect().await);
    let mut events = plc.subscribe();

    backend.drop_link();
    let byte = kinds::byte(None, Address::data(3, 4)).unwrap();
    let value = timeout(WAIT, plc.read_value(&byte, &CancellationToken::new()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(value, Some(42));
    assert_eq!(plc.state(), ConnectionState::Connected);

    let first = events.recv().await.unwrap();
    assert_eq!(first.previous, ConnectionState::Connected);
    assert_eq!(first.current, ConnectionState::Interrupted);
    let second = events.recv().await.unwrap();
    assert_eq!(second.current, ConnectionState::Connected);

    let stats = plc.reconnect_stats();
    assert_eq!(stats.successes, 1);
    assert!(stats.last_reconnected.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reconnect_keeps_trying_while_offline() {
    let (plc, backend) = create_test_plc();
    assert!(plc.connect().await);

    backend.set_online(false);
    let byte = kinds::byte(None, Address::data(1, 0)).unwrap();
    let reader = {
        let plc = plc.clone();
        let byte = byte.clone();
        tokio::spawn(async move { plc.read_item(&byte, &CancellationToken::new()).await })
    };

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(!reader.is_finished());
    assert_eq!(plc.state(), ConnectionState::Interrupted);
    assert!(plc.reconnect_stats().attempts >= 2);

    backend.set_online(true);
    assert!(timeout(WAIT, reader).await.unwrap().unwrap().unwrap());
    assert_eq!(plc.state(), ConnectionState::Connected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_share_one_reconnection() {
    let (plc, backend) = create_test_plc();
    assert!(plc.connect().await);
    backend.drop_link();

    let mut readers = Vec::new();
    for position in 0..8u16 {
        let plc = plc.clone();
        readers.push(tokio::spawn(async move {
            let byte = kinds::byte(None, Address::data(1, position)).unwrap();
            plc.read_item(&byte, &CancellationToken::new()).await
        }));
    }
    for reader in readers {
        assert!(timeout(WAIT, reader).await.unwrap().unwrap().unwrap());
    }
    let stats = plc.reconnect_stats();
    assert_eq!(stats.attempts, 1);
    assert_eq!(stats.successes, 1);
    assert_eq!(plc.state(), ConnectionState::Connected);
}

// ============================================================================
// Cancellation and disposal
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_caller_cancel_while_suspended() {
    let (plc, _) = create_test_plc();
    let byte = kinds::byte(None, Address::data(1, 0)).unwrap();
    let cancel = CancellationToken::new();

    let reader = {
        let plc = plc.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { plc.read_item(&byte, &cancel).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    let completed = timeout(WAIT, reader).await.unwrap().unwrap().unwrap();
    assert!(!completed);
    assert!(!plc.is_disposed());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dispose_fails_suspended_requests() {
    let (plc, _) = create_test_plc();
    let byte = kinds::byte(Some("b"), Address::data(1, 0)).unwrap();

    let reader = {
        let plc = plc.clone();
        tokio::spawn(async move { plc.read_item(&byte, &CancellationToken::new()).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    plc.dispose().await;

    let err = timeout(WAIT, reader).await.unwrap().unwrap().unwrap_err();
    match err {
        PlcError::Disposed(e) => {
            assert!(e.succeeded.is_empty());
            assert_eq!(e.failed.len(), 1);
            assert_eq!(e.failed[0].item.identifier(), "b");
        },
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dispose_stops_reconnection() {
    let (plc, backend) = create_test_plc();
    assert!(plc.connect().await);
    backend.set_online(false);

    let byte = kinds::byte(None, Address::data(1, 0)).unwrap();
    let reader = {
        let plc = plc.clone();
        tokio::spawn(async move { plc.read_item(&byte, &CancellationToken::new()).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    timeout(WAIT, plc.dispose()).await.unwrap();
    assert!(timeout(WAIT, reader).await.unwrap().unwrap().unwrap_err().is_disposed());

    let opens = backend.stats().opens;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(backend.stats().opens, opens);
    assert_eq!(plc.state(), ConnectionState::Disconnected);
}

// ============================================================================
// Events and logging
// ============================================================================

#[tokio::test]
async fn test_events_only_on_change() {
    let (plc, _) = create_test_plc();
    let mut events = plc.subscribe();

    plc.disconnect().await;
    plc.connect().await;
    plc.connect().await;
    plc.disconnect().await;
    plc.disconnect().await;

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        assert_eq!(event.plc, "line1");
        seen.push(event.current);
    }
    assert_eq!(
        seen,
        vec![ConnectionState::Connected, ConnectionState::Disconnected]
    );
}

#[tokio::test]
async fn test_reconnect_cycles_state() {
    let (plc, backend) = create_test_plc();
    plc.connect().await;
    let mut events = plc.subscribe();

    assert!(plc.reconnect().await);
    assert_eq!(events.try_recv().unwrap().current, ConnectionState::Disconnected);
    assert_eq!(events.try_recv().unwrap().current, ConnectionState::Connected);
    assert_eq!(backend.stats().opens, 2);
}
