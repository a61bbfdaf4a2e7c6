//! HTTP server receiving collectd's `write_http` output.
//!
//! collectd is configured to POST JSON to this server. Each request is
//! decoded, grouped per monitor and handed to a [`BatchReceiver`]. Any path
//! is accepted; the query string carries routing hints (see
//! [`RequestContext`]).

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use http_body_util::{BodyExt, Full, Limited};
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::decode::{decode_body, RequestContext, RoutedBatch};
use crate::error::{Result, SupervisorError};
use crate::registry::DispatchReport;

/// Upper bound on a single request body.
pub const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Consumer of decoded write-back batches.
pub trait BatchReceiver: Send + Sync + 'static {
    fn receive(&self, batch: RoutedBatch) -> DispatchReport;
}

/// A running write-back server.
///
/// Dropping the server stops accepting connections.
#[derive(Debug)]
pub struct WriteServer {
    port: u16,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl WriteServer {
    /// Bind `ip:port` (port 0 picks an ephemeral port) and start serving.
    pub async fn start(ip: &str, port: u16, receiver: Arc<dyn BatchReceiver>) -> Result<Self> {
        let addr = format!("{}:{}", ip, port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| SupervisorError::WriteServer {
                addr: addr.clone(),
                source,
            })?;
        let port = listener
            .local_addr()
            .map_err(|source| SupervisorError::WriteServer {
                addr: addr.clone(),
                source,
            })?
            .port();

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(serve(listener, receiver, shutdown_rx));

        tracing::info!(%addr, port, "collectd write server listening");
        Ok(Self {
            port,
            shutdown_tx: Some(shutdown_tx),
            task,
        })
    }

    /// The port actually bound.
    pub fn running_port(&self) -> u16 {
        self.port
    }

    /// Stop accepting connections and wait for the listener to close.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = (&mut self.task).await;
        tracing::info!(port = self.port, "collectd write server stopped");
    }
}

impl Drop for WriteServer {
    fn drop(&mut self) {
        if self.shutdown_tx.is_some() {
            self.task.abort();
        }
    }
}

async fn serve(
    listener: TcpListener,
    receiver: Arc<dyn BatchReceiver>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    loop {
        let accepted = tokio::select! {
            _ = &mut shutdown_rx => break,
            accepted = listener.accept() => accepted,
        };

        let stream = match accepted {
            Ok((stream, _)) => stream,
            Err(e) => {
                tracing::warn!(error = %e, "write server accept failed");
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }
        };

        let io = TokioIo::new(stream);
        let receiver = receiver.clone();
        tokio::spawn(async move {
            let service = service_fn(move |req| handle_request(req, receiver.clone()));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                tracing::debug!(error = %e, "write server connection error");
            }
        });
    }
}

async fn handle_request(
    req: Request<Incoming>,
    receiver: Arc<dyn BatchReceiver>,
) -> std::result::Result<Response<Full<Bytes>>, Infallible> {
    if req.method() != Method::POST {
        return Ok(text_response(
            StatusCode::METHOD_NOT_ALLOWED,
            "only POST is supported",
        ));
    }

    let ctx = RequestContext::from_query(req.uri().query());
    let body = match Limited::new(req.into_body(), MAX_BODY_BYTES).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            tracing::error!(error = %e, "failed to read write_http request body");
            return Ok(text_response(StatusCode::BAD_REQUEST, "unreadable body"));
        }
    };

    let decoded = match decode_body(&body, &ctx) {
        Ok(decoded) => decoded,
        Err(e) => {
            tracing::error!(error = %e, bytes = body.len(), "could not decode collectd payload");
            return Ok(text_response(StatusCode::BAD_REQUEST, "malformed payload"));
        }
    };

    let unrouted = decoded.unrouted;
    let invalid = decoded.invalid;
    let report = receiver.receive(decoded.into_batch());
    tracing::trace!(
        delivered = report.delivered,
        dropped = report.dropped,
        unrouted,
        invalid,
        "dispatched collectd payload"
    );

    Ok(text_response(StatusCode::OK, ""))
}

fn text_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}
