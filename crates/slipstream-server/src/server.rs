//! Router assembly and serving.

use std::net::SocketAddr;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::handlers::{messages, meta};
use crate::state::AppState;

/// Build the router over prepared state.
///
/// Separate from [`run`] so tests can drive it in-process.
#[must_use]
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/messages", post(messages::handle_messages))
        .route("/v1/messages/count_tokens", post(messages::handle_count_tokens))
        .route("/v1/models", get(meta::handle_list_models))
        .route("/health", get(meta::handle_health))
        .route("/account-limits", get(meta::handle_account_limits))
        .route("/refresh-token", post(meta::handle_refresh_token))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until `shutdown` resolves.
pub async fn run(
    state: AppState,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
