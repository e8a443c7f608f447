//! Minimal HTTP/1 server plumbing
//!
//! [`serve`] runs an accept loop until shutdown, handing each connection to a
//! fresh service from the caller's factory. Concurrency is bounded by a
//! semaphore: connections over the limit are dropped, not queued.
//!
//! ## Metrics
//!
//! `connection.limit`: Maximum concurrent connections
//! `connection.current`: Connections currently being served
//!

use std::{net::SocketAddr, sync::Arc};

use bytes::Bytes;
use http::{HeaderValue, Response, StatusCode, header};
use http_body_util::{BodyExt, Full, combinators::UnsyncBoxBody};
use hyper::service::Service;
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::conn::auto,
};
use metrics::gauge;
use tokio::{
    net::TcpListener,
    pin,
    sync::{Semaphore, TryAcquireError},
    task::JoinSet,
};
use tracing::{debug, error, info, warn};

use crate::signals::Watcher;

/// Response body used by every tgraph handler. Streaming bodies are not
/// `Sync`, hence the unsync box.
pub type Body = UnsyncBoxBody<Bytes, hyper::Error>;

#[derive(thiserror::Error, Debug)]
/// Errors produced by the HTTP server.
pub enum Error {
    /// Could not bind the listening socket.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Requested address
        addr: SocketAddr,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },
    /// Wrapper for [`std::io::Error`].
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Bind a listener on `addr`. Failure to bind is fatal to the caller.
///
/// # Errors
///
/// Returns an error if the socket cannot be bound.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener, Error> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| Error::Bind { addr, source })
}

/// Serve connections accepted on `listener` until `shutdown` is signaled.
/// In-flight connections are aborted on shutdown: event streams and idle
/// keep-alive connections would otherwise never finish.
///
/// # Errors
///
/// Currently infallible once bound; the signature leaves room for accept
/// failures that should end the server.
pub async fn serve<SF, S>(
    listener: TcpListener,
    concurrency_limit: usize,
    mut shutdown: Watcher,
    make_service: SF,
) -> Result<(), Error>
where
    SF: Send + Sync + 'static + Clone + Fn() -> S,
    S: Service<hyper::Request<hyper::body::Incoming>, Response = Response<Body>, Error = hyper::Error>
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    let sem = Arc::new(Semaphore::new(concurrency_limit));
    let mut join_set = JoinSet::new();

    gauge!("connection.limit").set(concurrency_limit as f64);

    let shutdown_fut = shutdown.recv();
    pin!(shutdown_fut);
    loop {
        let claimed_permits = concurrency_limit - sem.available_permits();
        gauge!("connection.current").set(claimed_permits as f64);

        tokio::select! {
            () = &mut shutdown_fut => {
                info!("Shutdown signal received, stopping accept loop.");
                break;
            }

            incoming = listener.accept() => {
                let (stream, addr) = match incoming {
                    Ok(sa) => sa,
                    Err(e) => {
                        error!("Error accepting connection: {e}");
                        continue;
                    }
                };
                debug!("Accepted connection from {addr}");

                let sem = Arc::clone(&sem);
                let service_factory = make_service.clone();

                join_set.spawn(async move {
                    let permit = match sem.try_acquire() {
                        Ok(p) => p,
                        Err(TryAcquireError::Closed) => {
                            error!("Semaphore closed");
                            return;
                        }
                        Err(TryAcquireError::NoPermits) => {
                            warn!("httpd over connection capacity, load shedding");
                            drop(stream);
                            return;
                        }
                    };

                    let builder = auto::Builder::new(TokioExecutor::new());
                    let serve_future = builder.serve_connection_with_upgrades(
                        TokioIo::new(stream),
                        service_factory(),
                    );

                    if let Err(e) = serve_future.await {
                        debug!("Connection from {addr} ended: {e}");
                    }
                    drop(permit);
                });
            }
        }
    }

    drop(listener);
    join_set.shutdown().await;
    Ok(())
}

/// A complete body from `bytes`.
pub fn full(bytes: impl Into<Bytes>) -> Body {
    Full::new(bytes.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

/// A response with `status`, `content_type` and a complete body.
#[must_use]
pub fn respond(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> Response<Body> {
    let mut response = Response::new(full(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

/// A JSON response with `status`.
#[must_use]
pub fn json(status: StatusCode, body: impl Into<Bytes>) -> Response<Body> {
    respond(status, "application/json", body)
}

/// A JSON `{"error": message}` response with `status`.
#[must_use]
pub fn json_error(status: StatusCode, message: &str) -> Response<Body> {
    let body = serde_json::json!({ "error": message }).to_string();
    json(status, body)
}
