//! A poller that keeps querying a database through an outage.
//!
//! Run with: cargo run --example polling_database -p relink-connector
//!
//! The simulated database goes down after the first few polls and comes
//! back a little later. Set `NON_BLOCKING=1` to use the background
//! reconnection strategy instead of the blocking one.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use relink_connector::{
    Connection, ConnectionEventKind, ManagedConnector, ReconnectConfig, ReconnectionStrategy,
    RetryPolicy,
};

/// Shared switch standing in for the database server.
#[derive(Clone, Default)]
struct Server {
    down: Arc<AtomicBool>,
    rows: Arc<AtomicU64>,
}

struct Session {
    server: Server,
}

impl Session {
    async fn next_row(&mut self) -> Result<u64, io::Error> {
        if self.server.down.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe"));
        }
        Ok(self.server.rows.fetch_add(1, Ordering::SeqCst))
    }
}

impl Connection for Session {
    type Error = io::Error;

    async fn is_valid(&mut self) -> bool {
        !self.server.down.load(Ordering::SeqCst)
    }

    async fn close(&mut self) {}
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let strategy = if std::env::var_os("NON_BLOCKING").is_some() {
        ReconnectionStrategy::NonBlocking
    } else {
        ReconnectionStrategy::Blocking
    };
    println!("Polling with {strategy:?} reconnection\n");

    let server = Server::default();
    let factory_server = server.clone();
    let connector = ManagedConnector::new(
        move || {
            let server = factory_server.clone();
            async move {
                if server.down.load(Ordering::SeqCst) {
                    Err(io::Error::new(
                        io::ErrorKind::ConnectionRefused,
                        "connection refused",
                    ))
                } else {
                    Ok(Session { server })
                }
            }
        },
        ReconnectConfig::builder()
            .name("orders-db")
            .strategy(strategy)
            .policy(RetryPolicy::fixed(Duration::from_millis(500), 10))
            .build(),
    );

    connector.subscribe_fn(|event| match event.kind() {
        ConnectionEventKind::Connected => println!("  [event] connected"),
        ConnectionEventKind::ConnectionFailed => {
            println!("  [event] connection attempt {} failed", event.attempt())
        }
        ConnectionEventKind::Disconnected => println!("  [event] disconnected"),
    });

    connector.start().await?;

    for poll in 0..12 {
        if poll == 3 {
            println!("-- stopping database");
            server.down.store(true, Ordering::SeqCst);
            let server = server.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(1600)).await;
                println!("-- starting database");
                server.down.store(false, Ordering::SeqCst);
            });
        }

        match connector
            .execute(|session| Box::pin(session.next_row()))
            .await
        {
            Ok(row) => println!("poll {poll}: row {row}"),
            Err(err) if err.is_unavailable() => println!("poll {poll}: {err}"),
            Err(err) => {
                println!("poll {poll}: giving up: {err}");
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(300)).await;
    }

    connector.stop().await;
    Ok(())
}
