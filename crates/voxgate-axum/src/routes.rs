//! Route definitions and router construction.

use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Build the gateway router: PBX ingress plus the ops surface.
#[must_use]
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/pbx", get(handlers::pbx_ws::pbx_upgrade))
        .route("/health", get(handlers::ops::health))
        .route("/stats", get(handlers::ops::stats))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind the listen port and serve until the process exits.
pub async fn serve(state: AppState, port: u16) -> std::io::Result<()> {
    let router = build_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "voxgate listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await
}
