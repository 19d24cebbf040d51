//! Managed connector metrics regression tests

use super::helpers::*;
use relink_connector::{
    Connection, ConnectionFactory, ManagedConnector, ReconnectConfig, RetryPolicy,
};
use serial_test::serial;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

struct Session;

impl Connection for Session {
    type Error = io::Error;

    async fn is_valid(&mut self) -> bool {
        true
    }

    async fn close(&mut self) {}
}

fn session_connector(
    name: &str,
    up: Arc<AtomicBool>,
    attempts: u32,
) -> ManagedConnector<impl ConnectionFactory<Connection = Session>> {
    ManagedConnector::new(
        move || {
            let up = up.load(Ordering::SeqCst);
            async move {
                if up {
                    Ok(Session)
                } else {
                    Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"))
                }
            }
        },
        ReconnectConfig::builder()
            .name(name)
            .policy(RetryPolicy::fixed(Duration::from_millis(5), attempts))
            .build(),
    )
}

#[tokio::test]
#[serial]
async fn connector_metrics_exist() {
    init_recorder();

    let up = Arc::new(AtomicBool::new(true));
    let connector = session_connector("metrics_connector", up, 3);
    connector.start().await.unwrap();

    assert_counter_exists("relink_connect_attempts_total");
    assert_metric_has_label("relink_connect_attempts_total", "connector", "metrics_connector");
    assert_metric_has_label("relink_connect_attempts_total", "outcome", "success");

    assert_counter_exists("relink_transitions_total");
    assert_metric_has_label("relink_transitions_total", "to", "connected");

    assert_gauge_exists("relink_connected");
    assert_eq!(
        gauge_value("relink_connected", "connector", "metrics_connector"),
        Some(1.0)
    );

    connector.stop().await;

    assert_metric_has_label("relink_transitions_total", "to", "disconnected");
    assert_eq!(
        gauge_value("relink_connected", "connector", "metrics_connector"),
        Some(0.0)
    );
}

#[tokio::test]
#[serial]
async fn failed_attempts_are_labelled() {
    init_recorder();

    let up = Arc::new(AtomicBool::new(false));
    let connector = session_connector("metrics_flaky", Arc::clone(&up), 5);

    let flip = Arc::clone(&up);
    connector.subscribe_fn(move |event| {
        if event.attempt() >= 2 && event.is_connection_failed() {
            flip.store(true, Ordering::SeqCst);
        }
    });
    connector.start().await.unwrap();

    assert_metric_has_label("relink_connect_attempts_total", "outcome", "failure");
    assert_metric_has_label("relink_connect_attempts_total", "connector", "metrics_flaky");
    assert_eq!(
        gauge_value("relink_connected", "connector", "metrics_flaky"),
        Some(1.0)
    );

    connector.stop().await;
}

#[tokio::test]
#[serial]
async fn exhaustion_is_counted() {
    init_recorder();

    let up = Arc::new(AtomicBool::new(false));
    let connector = session_connector("metrics_exhausted", up, 2);

    let err = connector.start().await.unwrap_err();
    assert!(err.is_fatal());

    assert_counter_exists("relink_recovery_exhausted_total");
    assert_metric_has_label(
        "relink_recovery_exhausted_total",
        "connector",
        "metrics_exhausted",
    );
}
