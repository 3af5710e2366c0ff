//! Reconnect scheduling under a paused clock
//!
//! The tokio clock only advances when every task is idle, so the recorded
//! attempt instants show the exact delays chosen by the manager.


use mqttlink::testing::{ConnectOutcome, MockConnector};
use mqttlink::{ConnectionManager, ConnectionState, StatusKind, TransportEvent};
use std::time::Duration;
use test_helpers::{connect_recording, next_status, statuses_until, test_config};
use tokio::time::Instant;

fn refused() -> ConnectOutcome {
    ConnectOutcome::Fail(TransportEvent::Error("connection refused".to_string()))
}

/// Gaps between consecutive attempts, in whole milliseconds
fn gaps_ms(attempts: &[Instant]) -> Vec<u128> {
    attempts
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).as_millis())
        .collect()
}

fn assert_gaps(actual: &[u128], expected: &[u128]) {
    assert_eq!(actual.len(), expected.len(), "gaps: {actual:?}");
    for (actual, expected) in actual.iter().zip(expected) {
        // Timer resolution may round a deadline up by a tick
        assert!(
            *actual >= *expected && *actual <= *expected + 5,
            "expected ~{expected}ms, got {actual}ms"
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_three_failures_then_reconnect_error() {
    // Arrange: every attempt is refused
    let connector = MockConnector::new();
    connector.set_default_outcome(refused());
    let manager = ConnectionManager::new(test_config(), connector.clone()).unwrap();

    // Act
    let mut log = connect_recording(&manager).await;
    let statuses = statuses_until(&mut log, StatusKind::ReconnectError).await;

    // Assert: initial attempt plus 3 retries at 1000, 2000, 4000ms
    assert_eq!(
        statuses,
        vec![
            StatusKind::Error,
            StatusKind::Error,
            StatusKind::Error,
            StatusKind::Error,
            StatusKind::ReconnectError,
        ]
    );
    assert_gaps(&gaps_ms(&connector.connect_attempts()), &[1000, 2000, 4000]);
    assert_eq!(manager.state().await, ConnectionState::Disconnected);
    assert_eq!(manager.reconnect_state().await.attempt_count, 3);
}

#[tokio::test(start_paused = true)]
async fn test_no_attempts_after_exhaustion() {
    let connector = MockConnector::new();
    connector.set_default_outcome(refused());
    let manager = ConnectionManager::new(test_config(), connector.clone()).unwrap();
    let mut log = connect_recording(&manager).await;
    statuses_until(&mut log, StatusKind::ReconnectError).await;

    tokio::time::sleep(Duration::from_secs(3600)).await;

    assert_eq!(connector.connect_attempts().len(), 4);
    assert!(log.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_explicit_connect_after_exhaustion_starts_over() {
    // Arrange: exhaust the retry budget
    let connector = MockConnector::new();
    connector.set_default_outcome(refused());
    let manager = ConnectionManager::new(test_config(), connector.clone()).unwrap();
    let mut log = connect_recording(&manager).await;
    statuses_until(&mut log, StatusKind::ReconnectError).await;

    // Act: the broker is back and the caller connects again
    connector.set_default_outcome(ConnectOutcome::Accept);
    let mut log = connect_recording(&manager).await;

    // Assert
    assert_eq!(next_status(&mut log).await, StatusKind::ConnectSuccess);
    assert_eq!(manager.reconnect_state().await.attempt_count, 0);
    assert!(manager.is_connected().await);
}

#[tokio::test(start_paused = true)]
async fn test_success_resets_backoff() {
    // Arrange: fail once, recover, then lose the connection again
    let connector = MockConnector::with_outcomes([refused(), refused()]);
    let manager = ConnectionManager::new(test_config(), connector.clone()).unwrap();
    let mut log = connect_recording(&manager).await;
    statuses_until(&mut log, StatusKind::ConnectSuccess).await;
    let recovered_at = Instant::now();

    // Act
    connector.emit(TransportEvent::Closed("eof".to_string()));
    statuses_until(&mut log, StatusKind::ConnectSuccess).await;

    // Assert: the retry after recovery starts again at the initial delay
    let attempts = connector.connect_attempts();
    assert_gaps(&gaps_ms(&attempts[..3]), &[1000, 2000]);
    let last_gap = (attempts[3] - recovered_at).as_millis();
    assert!((1000..=1005).contains(&last_gap), "got {last_gap}ms");
}

#[tokio::test(start_paused = true)]
async fn test_unlimited_retries_with_delay_cap() {
    // Arrange: unlimited attempts, delay capped at 5s, broker back after 7 refusals
    let connector = MockConnector::with_outcomes(std::iter::repeat_with(refused).take(7));
    let mut config = test_config();
    config.max_reconnect_attempts = -1;
    config.max_reconnect_delay_ms = Some(5000);
    let manager = ConnectionManager::new(config, connector.clone()).unwrap();

    // Act
    let mut log = connect_recording(&manager).await;
    let statuses = statuses_until(&mut log, StatusKind::ConnectSuccess).await;

    // Assert
    assert_eq!(statuses.len(), 8);
    assert!(!statuses.contains(&StatusKind::ReconnectError));
    assert_gaps(
        &gaps_ms(&connector.connect_attempts()),
        &[1000, 2000, 4000, 5000, 5000, 5000, 5000],
    );
}

#[tokio::test(start_paused = true)]
async fn test_zero_max_attempts_never_retries() {
    let connector = MockConnector::new();
    connector.set_default_outcome(refused());
    let mut config = test_config();
    config.max_reconnect_attempts = 0;
    let manager = ConnectionManager::new(config, connector.clone()).unwrap();

    let mut log = connect_recording(&manager).await;
    let statuses = statuses_until(&mut log, StatusKind::ReconnectError).await;
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(statuses, vec![StatusKind::Error, StatusKind::ReconnectError]);
    assert_eq!(connector.connect_attempts().len(), 1);
}
