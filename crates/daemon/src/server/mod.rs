//! HTTP and WebSocket front end.
//!
//! Routes:
//!
//! - `GET /terminal`, `GET /logs`: browser pages from the static directory
//! - `/static/*`: other static assets
//! - `GET /ws/{cluster}/{namespace}/{pod}/{container}/webshell`: terminal
//! - `GET /ws/{cluster}/{namespace}/{pod}/{container}/logs`: log tail
//! - `GET /healthz`: liveness and cluster count

mod handlers;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::registry::ClusterRegistry;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// Known clusters.
    pub registry: Arc<ClusterRegistry>,
    /// Effective configuration.
    pub config: Arc<Config>,
    /// Cancelled when the gateway stops; ends upgraded sessions.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Creates handler state.
    pub fn new(
        registry: Arc<ClusterRegistry>,
        config: Arc<Config>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            config,
            shutdown,
        }
    }
}

/// Builds the application router.
pub fn create_router(state: AppState) -> Router {
    let static_dir = state.config.server.static_dir.clone();

    Router::new()
        .route_service("/terminal", ServeFile::new(static_dir.join("terminal.html")))
        .route_service("/logs", ServeFile::new(static_dir.join("logs.html")))
        .nest_service("/static", ServeDir::new(&static_dir))
        .route("/healthz", get(handlers::healthz))
        .route(
            "/ws/:cluster/:namespace/:pod/:container/webshell",
            get(handlers::webshell),
        )
        .route(
            "/ws/:cluster/:namespace/:pod/:container/logs",
            get(handlers::logs),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
