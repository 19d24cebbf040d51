//! Outage scenarios run under both reconnection strategies.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use relink_connector::{
    ConnectionEventKind, ConnectionState, ConnectorError, FatalConnectError, ReconnectionStrategy,
};
use tokio::sync::mpsc;

use super::support::{EventCountdown, EventLog, FlakyDatabase, STRATEGIES, init_tracing, query};

const FREQUENCY: Duration = Duration::from_millis(500);
const PATIENCE: Duration = Duration::from_secs(30);

/// A poller keeps querying while the database is stopped and restarted.
/// It must receive rows again once three connection failures have been
/// reported and the database is back.
async fn poller_survives_database_restart(strategy: ReconnectionStrategy) {
    init_tracing();
    let db = FlakyDatabase::new();
    let connector = db.connector(strategy, FREQUENCY, 10);
    let failures = EventCountdown::new(ConnectionEventKind::ConnectionFailed);
    let log = EventLog::default();
    connector.subscribe(failures.clone());
    connector.subscribe(log.clone());
    connector.start().await.unwrap();

    let (rows_tx, mut rows) = mpsc::unbounded_channel();
    let running = Arc::new(AtomicBool::new(true));
    let poller = {
        let connector = connector.clone();
        let running = Arc::clone(&running);
        tokio::spawn(async move {
            while running.load(Ordering::SeqCst) {
                if let Ok(row) = connector.execute(query).await {
                    let _ = rows_tx.send(row);
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        })
    };

    let first = tokio::time::timeout(PATIENCE, rows.recv()).await.unwrap();
    assert!(first.is_some(), "poller never received a row");

    db.stop();
    assert!(
        failures.wait_for(3, PATIENCE).await,
        "expected three connection failures"
    );
    db.start();

    // Drain anything delivered before the outage, then wait for fresh data
    while rows.try_recv().is_ok() {}
    let after = tokio::time::timeout(PATIENCE, rows.recv()).await.unwrap();
    assert!(after.is_some(), "poller did not recover");

    running.store(false, Ordering::SeqCst);
    poller.await.unwrap();

    assert_eq!(log.failed_attempts(), vec![1, 2, 3]);
    assert_eq!(log.count(ConnectionEventKind::Disconnected), 1);
    // Initial connection plus exactly one reconnection
    assert_eq!(log.count(ConnectionEventKind::Connected), 2);
    assert!(connector.is_connected());

    connector.stop().await;
}

#[tokio::test(start_paused = true)]
async fn blocking_poller_survives_database_restart() {
    poller_survives_database_restart(ReconnectionStrategy::Blocking).await;
}

#[tokio::test(start_paused = true)]
async fn non_blocking_poller_survives_database_restart() {
    poller_survives_database_restart(ReconnectionStrategy::NonBlocking).await;
}

/// The resource fails right after the first successful operation and comes
/// back after three failed attempts.
async fn three_failures_then_connected(strategy: ReconnectionStrategy) {
    init_tracing();
    let db = FlakyDatabase::new();
    let connector = db.connector(strategy, FREQUENCY, 5);
    let failures = EventCountdown::new(ConnectionEventKind::ConnectionFailed);
    let connected = EventCountdown::new(ConnectionEventKind::Connected);
    let log = EventLog::default();
    connector.subscribe(failures.clone());
    connector.subscribe(connected.clone());
    connector.subscribe(log.clone());

    connector.start().await.unwrap();
    assert_eq!(connector.execute(query).await.unwrap(), 0);

    db.stop();
    let restorer = {
        let db = db.clone();
        let failures = failures.clone();
        tokio::spawn(async move {
            assert!(failures.wait_for(3, PATIENCE).await);
            db.start();
        })
    };

    let started = tokio::time::Instant::now();
    match strategy {
        ReconnectionStrategy::Blocking => {
            // Held until the connection is back, then the query is replayed
            assert_eq!(connector.execute(query).await.unwrap(), 1);
            assert!(started.elapsed() >= FREQUENCY * 3);
        }
        ReconnectionStrategy::NonBlocking => {
            let err = connector.execute(query).await.unwrap_err();
            assert!(matches!(err, ConnectorError::ConnectionLost(_)));
            assert_eq!(started.elapsed(), Duration::ZERO);

            assert!(connected.wait_for(2, PATIENCE).await);
            assert_eq!(connector.execute(query).await.unwrap(), 1);
        }
    }
    restorer.await.unwrap();

    assert_eq!(failures.count(), 3);
    assert_eq!(connected.count(), 2);
    assert_eq!(
        log.events(),
        vec![
            (ConnectionEventKind::Connected, 1),
            (ConnectionEventKind::Disconnected, 0),
            (ConnectionEventKind::ConnectionFailed, 1),
            (ConnectionEventKind::ConnectionFailed, 2),
            (ConnectionEventKind::ConnectionFailed, 3),
            (ConnectionEventKind::Connected, 4),
        ]
    );
    assert_eq!(connector.attempts(), 0);

    connector.stop().await;
}

#[tokio::test(start_paused = true)]
async fn blocking_three_failures_then_connected() {
    three_failures_then_connected(ReconnectionStrategy::Blocking).await;
}

#[tokio::test(start_paused = true)]
async fn non_blocking_three_failures_then_connected() {
    three_failures_then_connected(ReconnectionStrategy::NonBlocking).await;
}

/// The resource never comes back and only two attempts are allowed.
async fn exhaustion_after_two_attempts(strategy: ReconnectionStrategy) {
    let db = FlakyDatabase::new();
    db.stop();
    let connector = db.connector(strategy, FREQUENCY, 2);
    let log = EventLog::default();
    connector.subscribe(log.clone());

    let fatal = match strategy {
        ReconnectionStrategy::Blocking => connector.start().await.unwrap_err(),
        ReconnectionStrategy::NonBlocking => {
            connector.start().await.unwrap();
            let mut state = connector.reconnect_state().watch();
            tokio::time::timeout(
                PATIENCE,
                state.wait_for(|s| *s == ConnectionState::Failed),
            )
            .await
            .unwrap()
            .unwrap();
            connector.execute(query).await.unwrap_err()
        }
    };

    match fatal {
        ConnectorError::Fatal(FatalConnectError::Exhausted { attempts, cause }) => {
            assert_eq!(attempts, 2);
            assert_eq!(cause.to_string(), "connection refused");
        }
        other => panic!("expected exhaustion, got {other:?}"),
    }
    assert_eq!(log.failed_attempts(), vec![1, 2]);
    assert_eq!(log.count(ConnectionEventKind::Connected), 0);
    assert_eq!(db.connects(), 2);
    assert_eq!(connector.state(), ConnectionState::Failed);

    // Stays failed without intervention
    let again = connector.execute(query).await.unwrap_err();
    assert!(again.is_fatal());
    assert_eq!(db.connects(), 2);
}

#[tokio::test(start_paused = true)]
async fn blocking_exhaustion_after_two_attempts() {
    exhaustion_after_two_attempts(ReconnectionStrategy::Blocking).await;
}

#[tokio::test(start_paused = true)]
async fn non_blocking_exhaustion_after_two_attempts() {
    exhaustion_after_two_attempts(ReconnectionStrategy::NonBlocking).await;
}

#[tokio::test(start_paused = true)]
async fn operation_errors_never_trigger_reconnection() {
    for strategy in STRATEGIES {
        let db = FlakyDatabase::new();
        let connector = db.connector(strategy, FREQUENCY, 3);
        let log = EventLog::default();
        connector.subscribe(log.clone());
        connector.start().await.unwrap();

        let err = connector
            .execute(super::support::bad_query)
            .await
            .unwrap_err();

        assert!(err.is_operation(), "{strategy:?}: {err}");
        assert_eq!(db.connects(), 1);
        assert_eq!(log.count(ConnectionEventKind::Disconnected), 0);
        connector.stop().await;
    }
}
