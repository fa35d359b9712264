//! HTTP/1 server loop
//!
//! Every request runs under `request_timeout`. When the deadline passes the
//! handler future is dropped, which cancels its unit of work and rolls back
//! any open transaction, and the client gets a 504.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::config::Args;
use crate::error::{AgoraError, ErrorKind};
use crate::services::Services;

use super::routes::{self, BoxBody};

/// Shared state for every connection
pub struct AppState {
    pub args: Args,
    pub services: Services,
}

impl AppState {
    pub fn new(args: Args, services: Services) -> Self {
        Self { args, services }
    }
}

/// Bind the configured address and serve until the process exits
pub async fn run(state: Arc<AppState>) -> Result<(), AgoraError> {
    let listener = TcpListener::bind(state.args.listen)
        .await
        .map_err(|e| AgoraError::Config(format!("cannot bind {}: {}", state.args.listen, e)))?;

    info!(
        "Agora listening on {} as node {}",
        state.args.listen, state.args.node_id
    );

    serve(listener, state).await;
    Ok(())
}

/// Accept connections on an already bound listener
pub async fn serve(listener: TcpListener, state: Arc<AppState>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new()
                        .serve_connection(io, service)
                        .await
                    {
                        debug!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route one request under the request deadline
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> Result<Response<BoxBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let started = Instant::now();

    debug!("[{}] {} {}", addr, method, path);

    if method == Method::OPTIONS {
        return Ok(routes::preflight_response());
    }

    let timeout = state.args.request_timeout();
    let response = match tokio::time::timeout(timeout, routes::dispatch(Arc::clone(&state), req)).await
    {
        Ok(Ok(response)) => response,
        Ok(Err(err)) => {
            if err.kind() == ErrorKind::Internal && !matches!(err, AgoraError::LockTimeout(_)) {
                error!(%method, %path, error = %err, "Request failed");
            } else {
                debug!(%method, %path, error = %err, "Request rejected");
            }
            routes::error_response(&err)
        }
        Err(_) => {
            warn!(%method, %path, timeout_ms = timeout.as_millis() as u64, "Request timed out");
            routes::timeout_response()
        }
    };

    info!(
        %method,
        %path,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Handled request"
    );

    Ok(response)
}
