//! Connection serving
//!
//! Drives one accepted transport (plain TCP or TLS, the code does not care)
//! through hyper with upgrades enabled, so the relay router sees every
//! request and WebSocket viewers can take the connection over.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::Router;
use hyper::body::Incoming;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;
use tower::Service;

use crate::error::{Error, Result};
use crate::session::SessionContext;

/// Serve one connection to completion
///
/// The request head must be complete by `deadline`; a peer that has not
/// sent one by then is dropped without a response. Once the request is
/// dispatched the connection has no further time limit.
pub async fn serve_connection<S>(
    stream: S,
    ctx: SessionContext,
    app: Router,
    deadline: Instant,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let session_id = ctx.session_id;
    let started = Arc::new(AtomicBool::new(false));

    let service = {
        let started = Arc::clone(&started);
        hyper::service::service_fn(move |mut request: Request<Incoming>| {
            started.store(true, Ordering::Release);
            tracing::debug!(
                session_id = session_id,
                method = %request.method(),
                uri = %request.uri(),
                "Request"
            );
            request.extensions_mut().insert(ctx.clone());
            app.clone().call(request)
        })
    };

    // One request per connection: ingest owns it until EOF, viewers upgrade
    let mut builder = Builder::new(TokioExecutor::new());
    builder.http1().keep_alive(false);

    let conn = builder.serve_connection_with_upgrades(TokioIo::new(stream), service);
    tokio::pin!(conn);

    let result = tokio::select! {
        result = conn.as_mut() => result,
        _ = tokio::time::sleep_until(deadline) => {
            if !started.load(Ordering::Acquire) {
                tracing::debug!(session_id = session_id, "Request head timed out");
                return Ok(());
            }
            conn.as_mut().await
        }
    };

    result.map_err(Error::Http)
}
