use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use relink_connector::{ConnectionEventKind, ConnectionState, ConnectorError, ReconnectionStrategy};
use tokio::time::sleep;

use super::support::{EventLog, FlakyDatabase, STRATEGIES, query};

#[tokio::test]
async fn stop_twice_publishes_one_disconnect() {
    for strategy in STRATEGIES {
        let db = FlakyDatabase::new();
        let connector = db.connector(strategy, Duration::from_millis(100), 3);
        let log = EventLog::default();
        connector.subscribe(log.clone());
        connector.start().await.unwrap();

        connector.stop().await;
        connector.stop().await;

        assert_eq!(
            log.events(),
            vec![
                (ConnectionEventKind::Connected, 1),
                (ConnectionEventKind::Disconnected, 0),
            ],
            "{strategy:?}"
        );
        assert_eq!(db.closes(), 1);
        assert_eq!(connector.state(), ConnectionState::Stopped);
        assert!(matches!(
            connector.start().await.unwrap_err(),
            ConnectorError::Stopped
        ));
    }
}

#[tokio::test(start_paused = true)]
async fn stop_ends_background_recovery() {
    let db = FlakyDatabase::new();
    db.stop();
    let connector = db.connector(ReconnectionStrategy::NonBlocking, Duration::from_millis(200), 100);
    let log = EventLog::default();
    connector.subscribe(log.clone());
    connector.start().await.unwrap();

    sleep(Duration::from_millis(500)).await;
    connector.stop().await;
    let connects = db.connects();
    let events = log.events().len();

    db.start();
    sleep(Duration::from_secs(5)).await;

    assert_eq!(db.connects(), connects);
    assert_eq!(log.events().len(), events);
    assert_eq!(connector.state(), ConnectionState::Stopped);
    assert!(matches!(
        connector.execute(query).await.unwrap_err(),
        ConnectorError::Stopped
    ));
}

#[tokio::test(start_paused = true)]
async fn stop_interrupts_blocking_recovery() {
    let db = FlakyDatabase::new();
    let connector = db.connector(ReconnectionStrategy::Blocking, Duration::from_millis(500), 100);
    let log = EventLog::default();
    connector.subscribe(log.clone());
    connector.start().await.unwrap();

    db.stop();
    let caller = {
        let connector = connector.clone();
        tokio::spawn(async move { connector.execute(query).await })
    };

    // The caller is now parked between attempts
    sleep(Duration::from_millis(250)).await;
    connector.stop().await;

    let err = caller.await.unwrap().unwrap_err();
    assert!(matches!(err, ConnectorError::Stopped));
    assert_eq!(
        log.events(),
        vec![
            (ConnectionEventKind::Connected, 1),
            (ConnectionEventKind::Disconnected, 0),
            (ConnectionEventKind::ConnectionFailed, 1),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn restart_after_exhaustion_begins_a_new_episode() {
    for strategy in STRATEGIES {
        let db = FlakyDatabase::new();
        db.stop();
        let connector = db.connector(strategy, Duration::from_millis(100), 2);
        let log = EventLog::default();
        connector.subscribe(log.clone());

        let _ = connector.start().await;
        let mut state = connector.reconnect_state().watch();
        state
            .wait_for(|s| *s == ConnectionState::Failed)
            .await
            .unwrap();
        assert!(connector.last_error().is_some());

        db.start();
        connector.start().await.unwrap();
        if !strategy.is_blocking() {
            state
                .wait_for(|s| *s == ConnectionState::Connected)
                .await
                .unwrap();
        }

        assert!(connector.is_connected(), "{strategy:?}");
        assert!(connector.last_error().is_none());
        assert_eq!(
            log.events(),
            vec![
                (ConnectionEventKind::ConnectionFailed, 1),
                (ConnectionEventKind::ConnectionFailed, 2),
                (ConnectionEventKind::Connected, 1),
            ],
            "{strategy:?}"
        );
        assert_eq!(connector.execute(query).await.unwrap(), 0);

        connector.stop().await;
    }
}

#[tokio::test]
async fn unsubscribed_listener_hears_nothing_more() {
    let db = FlakyDatabase::new();
    let connector = db.connector(ReconnectionStrategy::Blocking, Duration::from_millis(10), 3);
    let heard = Arc::new(AtomicUsize::new(0));
    let h = Arc::clone(&heard);
    let id = connector.subscribe_fn(move |_| {
        h.fetch_add(1, Ordering::SeqCst);
    });

    connector.start().await.unwrap();
    assert_eq!(heard.load(Ordering::SeqCst), 1);

    assert!(connector.unsubscribe(id));
    assert!(!connector.unsubscribe(id));

    db.stop();
    db.start();
    connector.execute(query).await.unwrap();
    connector.stop().await;

    assert_eq!(heard.load(Ordering::SeqCst), 1);
}
