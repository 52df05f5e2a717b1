//! HTTP adapter: one JSON-RPC request per POST body, on any path.

use std::net::SocketAddr;

use anyhow::Context;
use axum::{
    Router,
    body::Body,
    extract::State,
    http::{Method, StatusCode, header},
    response::{IntoResponse, Response},
};
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::dispatcher::Dispatcher;
use crate::session::MAX_FRAME_BYTES;

#[derive(Clone)]
struct HttpState {
    dispatcher: Dispatcher,
    shutdown: CancellationToken,
}

/// Router answering every path with the dispatcher.
///
/// Each request gets a child of `shutdown`, so in-flight tool calls are
/// cancelled when the server stops. A client that disconnects drops the
/// handler future, which kills the provider process with it.
pub fn router(dispatcher: Dispatcher, shutdown: CancellationToken) -> Router {
    Router::new()
        .fallback(handle)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(HttpState {
            dispatcher,
            shutdown,
        })
}

async fn handle(State(state): State<HttpState>, method: Method, body: Body) -> Response {
    if method != Method::POST {
        return (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed").into_response();
    }

    let raw = match axum::body::to_bytes(body, MAX_FRAME_BYTES).await {
        Ok(raw) => raw,
        Err(e) => {
            warn!("Failed to read request body: {}", e);
            return (
                StatusCode::BAD_REQUEST,
                format!("Failed to read request body: {e}"),
            )
                .into_response();
        }
    };

    let cancel = state.shutdown.child_token();
    let response = match state.dispatcher.handle(&raw, &cancel).await {
        Ok(response) => response,
        Err(e) => {
            warn!("Failed to process request: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to process request: {e}"),
            )
                .into_response();
        }
    };

    match serde_json::to_vec(&response) {
        Ok(body) => ([(header::CONTENT_TYPE, "application/json")], body).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode response: {e}"),
        )
            .into_response(),
    }
}

/// Serve until `shutdown` is cancelled, then drain in-flight requests.
pub async fn serve(
    dispatcher: Dispatcher,
    bind: SocketAddr,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!("MCP HTTP server listening on http://{}", listener.local_addr()?);

    let app = router(dispatcher, shutdown.clone());
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("MCP HTTP server stopped");
    Ok(())
}
