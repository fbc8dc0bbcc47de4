//! Chronicle HTTP API.
//!
//! Exposes the Order context and the snapshot engine's diagnostics over
//! JSON. The binary in `main.rs` wires stores, tracing and configuration;
//! tests build the same router through [`app`].

pub mod error;
pub mod routes;
pub mod state;
pub mod telemetry;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Builds the full application router.
pub fn app(state: AppState) -> Router {
    // TODO: Replace CorsLayer::permissive() with restricted origins for production.
    Router::new()
        .merge(routes::health::router())
        .nest("/api/v1/orders", routes::orders::router())
        .nest("/api/v1/snapshots", routes::snapshots::router())
        .nest("/api/v1/performance", routes::performance::router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
