use std::task::{Context, Poll};

use futures::future::BoxFuture;
use tower::{Service, ServiceExt};

use crate::connector::{ManagedConnector, OperationError};
use crate::error::ConnectorError;
use crate::handle::ConnectionFactory;

/// A Tower service that sends each request over a managed connection.
///
/// Works with connections that are themselves `Service<Request>`. Requests
/// get the connector's reconnection semantics: they wait for or fail fast
/// on recovery per the strategy, and are replayed once after a reconnect.
///
/// # Examples
///
/// ```
/// use std::task::{Context, Poll};
/// use relink_connector::{Connection, ManagedConnector, ReconnectConfig};
/// use tower::{Service, ServiceExt};
///
/// #[derive(Clone)]
/// struct Echo;
///
/// impl Connection for Echo {
///     type Error = std::io::Error;
///
///     async fn is_valid(&mut self) -> bool {
///         true
///     }
///
///     async fn close(&mut self) {}
/// }
///
/// impl Service<String> for Echo {
///     type Response = String;
///     type Error = std::io::Error;
///     type Future = std::future::Ready<Result<String, std::io::Error>>;
///
///     fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
///         Poll::Ready(Ok(()))
///     }
///
///     fn call(&mut self, request: String) -> Self::Future {
///         std::future::ready(Ok(request))
///     }
/// }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let connector = ManagedConnector::new(
///     || async { Ok::<_, std::io::Error>(Echo) },
///     ReconnectConfig::default(),
/// );
/// connector.start().await.unwrap();
///
/// let mut service = connector.clone().into_service();
/// let reply = service.ready().await.unwrap().call("ping".to_string()).await.unwrap();
/// assert_eq!(reply, "ping");
/// # }
/// ```
pub struct ConnectorService<F: ConnectionFactory> {
    connector: ManagedConnector<F>,
}

impl<F: ConnectionFactory> ConnectorService<F> {
    /// Wraps a connector.
    pub fn new(connector: ManagedConnector<F>) -> Self {
        Self { connector }
    }

    /// The underlying connector.
    pub fn connector(&self) -> &ManagedConnector<F> {
        &self.connector
    }
}

impl<F: ConnectionFactory> Clone for ConnectorService<F> {
    fn clone(&self) -> Self {
        Self {
            connector: self.connector.clone(),
        }
    }
}

impl<F: ConnectionFactory> std::fmt::Debug for ConnectorService<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorService")
            .field("connector", &self.connector)
            .finish()
    }
}

impl<F: ConnectionFactory> ManagedConnector<F> {
    /// Turns the connector into a Tower service.
    pub fn into_service(self) -> ConnectorService<F> {
        ConnectorService::new(self)
    }
}

impl<F, Request> Service<Request> for ConnectorService<F>
where
    F: ConnectionFactory,
    F::Connection: Service<Request, Error = OperationError<F>>,
    <F::Connection as Service<Request>>::Response: Send + 'static,
    <F::Connection as Service<Request>>::Future: Send,
    Request: Clone + Send + 'static,
{
    type Response = <F::Connection as Service<Request>>::Response;
    type Error = ConnectorError<OperationError<F>>;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    // Readiness of the connection itself is awaited inside the call.
    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let connector = self.connector.clone();
        Box::pin(async move {
            connector
                .execute(move |connection| {
                    let request = request.clone();
                    Box::pin(async move { connection.ready().await?.call(request).await })
                })
                .await
        })
    }
}
