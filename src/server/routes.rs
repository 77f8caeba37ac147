//! Request routing
//!
//! Every listener serves the same router: a WebSocket upgrade becomes a
//! viewer session, anything else is an ingest request. The first path
//! segment is the producer's secret (ignored for viewers), the second is the
//! channel.

use axum::body::Body;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::Uri;
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::{Extension, Router};

use crate::registry::ChannelId;
use crate::session::{IngestSession, SessionContext, SharedState, ViewerSession};

type Upgrade = Result<WebSocketUpgrade, WebSocketUpgradeRejection>;

/// Build the relay router around the shared state
///
/// Handlers expect a [`SessionContext`] request extension, inserted by
/// [`serve_connection`](super::serve_connection).
pub fn relay_router(shared: SharedState) -> Router {
    Router::new()
        .route("/{secret}/{channel}", any(relay))
        .fallback(relay_degenerate)
        // Producer bodies are unbounded streams
        .layer(DefaultBodyLimit::disable())
        .with_state(shared)
}

async fn relay(
    State(shared): State<SharedState>,
    Extension(ctx): Extension<SessionContext>,
    Path((secret, channel)): Path<(String, String)>,
    ws: Upgrade,
    body: Body,
) -> Response {
    dispatch(shared, ctx, &secret, ChannelId::new(channel), ws, body).await
}

/// Paths without exactly two segments still reach a (possibly empty) channel
async fn relay_degenerate(
    State(shared): State<SharedState>,
    Extension(ctx): Extension<SessionContext>,
    uri: Uri,
    ws: Upgrade,
    body: Body,
) -> Response {
    let mut segments = uri.path().trim_start_matches('/').split('/');
    let secret = segments.next().unwrap_or_default().to_string();
    let channel = segments.next().unwrap_or_default();

    tracing::debug!(session_id = ctx.session_id, path = uri.path(), "Degenerate request path");
    dispatch(shared, ctx, &secret, ChannelId::new(channel), ws, body).await
}

async fn dispatch(
    shared: SharedState,
    ctx: SessionContext,
    secret: &str,
    channel: ChannelId,
    ws: Upgrade,
    body: Body,
) -> Response {
    match ws {
        Ok(ws) => ViewerSession::new(ctx, shared, channel).upgrade(ws),
        // Not an upgrade request at all
        Err(WebSocketUpgradeRejection::MethodNotGet(_))
        | Err(WebSocketUpgradeRejection::InvalidConnectionHeader(_))
        | Err(WebSocketUpgradeRejection::InvalidUpgradeHeader(_)) => {
            IngestSession::new(ctx, shared, channel).run(secret, body).await.into_response()
        }
        // Asked for an upgrade but got something else wrong
        Err(rejection) => {
            tracing::debug!(
                session_id = ctx.session_id,
                error = %rejection,
                "Rejected WebSocket upgrade"
            );
            rejection.into_response()
        }
    }
}
