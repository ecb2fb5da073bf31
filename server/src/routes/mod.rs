//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! One websocket endpoint (mounted at `/` for clients that dial the bare
//! host, and at `/ws`) plus a health check. Connect info is enabled so
//! sessions can log the peer address.

pub mod ws;

use std::future::Future;
use std::net::SocketAddr;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(ws::handle_ws))
        .route("/ws", get(ws::handle_ws))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the app on an already-bound listener until `shutdown` resolves.
///
/// # Errors
///
/// Returns the underlying I/O error if the accept loop fails.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(listener, app(state).into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown)
        .await
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}
