//! Snapshot diagnostics and maintenance.

use axum::extract::{Path, State};
use axum::{
    Json, Router,
    routing::{get, post},
};
use chronicle_core::config::SnapshotConfiguration;
use chronicle_core::snapshot::{SnapshotInfo, SnapshotStats};
use serde::Serialize;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

/// Active snapshot engine settings.
#[derive(Debug, Serialize)]
pub struct SnapshotConfigResponse {
    /// Name of the active policy, including its parameters.
    pub policy: String,
    /// Interval reported by the active policy.
    pub snapshot_interval: i64,
    /// Full engine configuration.
    pub config: SnapshotConfiguration,
}

/// Snapshots held for one aggregate.
#[derive(Debug, Serialize)]
pub struct SnapshotListResponse {
    /// The aggregate queried.
    pub aggregate_id: Uuid,
    /// Stored snapshots, oldest first.
    pub snapshots: Vec<SnapshotInfo>,
}

/// Outcome of a retention run.
#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    /// The aggregate cleaned.
    pub aggregate_id: Uuid,
    /// Number of snapshots removed.
    pub deleted: u64,
}

/// GET /stats
#[instrument(skip(state))]
async fn snapshot_stats(State(state): State<AppState>) -> Result<Json<SnapshotStats>, ApiError> {
    let stats = state.orders.snapshot_manager().snapshot_stats().await?;
    Ok(Json(stats))
}

/// GET /config
async fn snapshot_config(State(state): State<AppState>) -> Json<SnapshotConfigResponse> {
    let manager = state.orders.snapshot_manager();
    Json(SnapshotConfigResponse {
        policy: manager.policy().name(),
        snapshot_interval: manager.policy().snapshot_interval(),
        config: manager.config().clone(),
    })
}

/// GET /{aggregate_id}
#[instrument(skip(state))]
async fn list_snapshots(
    State(state): State<AppState>,
    Path(aggregate_id): Path<Uuid>,
) -> Result<Json<SnapshotListResponse>, ApiError> {
    let snapshots = state
        .orders
        .snapshot_manager()
        .get_snapshot_info(aggregate_id)
        .await?;
    Ok(Json(SnapshotListResponse {
        aggregate_id,
        snapshots,
    }))
}

/// POST /{aggregate_id}/cleanup
#[instrument(skip(state))]
async fn cleanup_snapshots(
    State(state): State<AppState>,
    Path(aggregate_id): Path<Uuid>,
) -> Result<Json<CleanupResponse>, ApiError> {
    let deleted = state
        .orders
        .snapshot_manager()
        .cleanup_old_snapshots(aggregate_id)
        .await?;
    info!(%aggregate_id, deleted, "snapshot cleanup requested");
    Ok(Json(CleanupResponse {
        aggregate_id,
        deleted,
    }))
}

/// Returns the router for snapshot diagnostics.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/stats", get(snapshot_stats))
        .route("/config", get(snapshot_config))
        .route("/{aggregate_id}", get(list_snapshots))
        .route("/{aggregate_id}/cleanup", post(cleanup_snapshots))
}
