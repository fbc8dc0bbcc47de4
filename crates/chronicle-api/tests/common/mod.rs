//! Shared test helpers for API integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chronicle_core::clock::Clock;
use chronicle_core::config::SnapshotConfiguration;
use chronicle_test_support::FixedClock;
use http_body_util::BodyExt;
use sqlx::PgPool;
use tower::ServiceExt;

use chronicle_api::state::AppState;

/// Fixed timestamp used across all integration tests.
fn fixed_clock() -> Arc<dyn Clock> {
    Arc::new(FixedClock(
        chrono::TimeZone::with_ymd_and_hms(&chrono::Utc, 2026, 1, 15, 10, 0, 0).unwrap(),
    ))
}

/// Snapshot settings small enough to exercise creation and retention.
pub fn test_config() -> SnapshotConfiguration {
    SnapshotConfiguration {
        event_count_threshold: 2,
        max_snapshots_per_aggregate: 2,
        ..SnapshotConfiguration::default()
    }
}

/// In-memory state with a deterministic clock.
pub fn in_memory_state() -> AppState {
    AppState::in_memory(test_config(), fixed_clock()).unwrap()
}

/// PostgreSQL-backed state with a deterministic clock.
pub fn pg_state(pool: PgPool) -> AppState {
    AppState::postgres(pool, test_config(), fixed_clock()).unwrap()
}

/// Build the full app router over `state`, exactly as `main.rs` does.
pub fn build_test_app(state: &AppState) -> Router {
    chronicle_api::app(state.clone())
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = if body_bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body_bytes).unwrap()
    };

    (status, json)
}

/// Send a POST request with a JSON body and return the response.
pub async fn post_json(
    app: Router,
    uri: &str,
    body: &serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap();

    send(app, request).await
}

/// Send a POST request without a body and return the response.
pub async fn post_empty(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap();

    send(app, request).await
}

/// Send a GET request and return the response.
pub async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap();

    send(app, request).await
}

/// Create an order for `customer_id` and return its id.
pub async fn create_order(state: &AppState, customer_id: &str) -> uuid::Uuid {
    let (status, json) = post_json(
        build_test_app(state),
        "/api/v1/orders/create",
        &serde_json::json!({ "customer_id": customer_id }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    json["aggregate_id"].as_str().unwrap().parse().unwrap()
}

/// Add `quantity` units of `product_id` at `unit_price_cents`.
pub async fn add_item(
    state: &AppState,
    order_id: uuid::Uuid,
    product_id: &str,
    quantity: u32,
    unit_price_cents: i64,
) -> (StatusCode, serde_json::Value) {
    post_json(
        build_test_app(state),
        "/api/v1/orders/add-item",
        &serde_json::json!({
            "order_id": order_id,
            "product_id": product_id,
            "quantity": quantity,
            "unit_price_cents": unit_price_cents
        }),
    )
    .await
}
