//! Routes for the Order bounded context.

use axum::extract::{Path, State};
use axum::{
    Json, Router,
    routing::{get, post},
};
use serde::Deserialize;
use tracing::{info, instrument};
use uuid::Uuid;

use chronicle_orders::application::command_handlers::{self, OrderCommandResult};
use chronicle_orders::application::query_handlers::{self, OrderEventView, OrderView};
use chronicle_orders::domain::commands;

use crate::error::ApiError;
use crate::state::AppState;

/// Request body for POST /create.
#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    /// Client-chosen order id; a new one is generated when omitted.
    #[serde(default)]
    pub order_id: Option<Uuid>,
    /// The customer placing the order.
    pub customer_id: String,
}

/// Request body for POST /add-item.
#[derive(Debug, Deserialize)]
pub struct AddItemRequest {
    /// The order to add to.
    pub order_id: Uuid,
    /// The product identifier.
    pub product_id: String,
    /// Units to add.
    pub quantity: u32,
    /// Price per unit in cents.
    pub unit_price_cents: i64,
}

/// Request body for POST /remove-item.
#[derive(Debug, Deserialize)]
pub struct RemoveItemRequest {
    /// The order to remove from.
    pub order_id: Uuid,
    /// The product identifier.
    pub product_id: String,
}

/// Request body for POST /confirm.
#[derive(Debug, Deserialize)]
pub struct ConfirmOrderRequest {
    /// The order to confirm.
    pub order_id: Uuid,
}

/// Request body for POST /ship.
#[derive(Debug, Deserialize)]
pub struct ShipOrderRequest {
    /// The order to ship.
    pub order_id: Uuid,
    /// Carrier tracking number.
    pub tracking_number: String,
}

/// Request body for POST /cancel.
#[derive(Debug, Deserialize)]
pub struct CancelOrderRequest {
    /// The order to cancel.
    pub order_id: Uuid,
    /// Why the order is cancelled.
    pub reason: String,
}

/// POST /create
#[instrument(skip(state, request))]
async fn create_order(
    State(state): State<AppState>,
    Json(request): Json<CreateOrderRequest>,
) -> Result<Json<OrderCommandResult>, ApiError> {
    let command = commands::CreateOrder {
        correlation_id: Uuid::new_v4(),
        order_id: request.order_id.unwrap_or_else(Uuid::new_v4),
        customer_id: request.customer_id,
    };

    info!(
        correlation_id = %command.correlation_id,
        order_id = %command.order_id,
        "handling create_order command"
    );

    let result =
        command_handlers::handle_create_order(&command, state.clock.as_ref(), &state.orders)
            .await?;

    Ok(Json(result))
}

/// POST /add-item
#[instrument(skip(state, request), fields(order_id = %request.order_id))]
async fn add_item(
    State(state): State<AppState>,
    Json(request): Json<AddItemRequest>,
) -> Result<Json<OrderCommandResult>, ApiError> {
    let command = commands::AddItem {
        correlation_id: Uuid::new_v4(),
        order_id: request.order_id,
        product_id: request.product_id,
        quantity: request.quantity,
        unit_price_cents: request.unit_price_cents,
    };

    info!(correlation_id = %command.correlation_id, "handling add_item command");

    let result =
        command_handlers::handle_add_item(&command, state.clock.as_ref(), &state.orders).await?;

    Ok(Json(result))
}

/// POST /remove-item
#[instrument(skip(state, request), fields(order_id = %request.order_id))]
async fn remove_item(
    State(state): State<AppState>,
    Json(request): Json<RemoveItemRequest>,
) -> Result<Json<OrderCommandResult>, ApiError> {
    let command = commands::RemoveItem {
        correlation_id: Uuid::new_v4(),
        order_id: request.order_id,
        product_id: request.product_id,
    };

    info!(correlation_id = %command.correlation_id, "handling remove_item command");

    let result =
        command_handlers::handle_remove_item(&command, state.clock.as_ref(), &state.orders)
            .await?;

    Ok(Json(result))
}

/// POST /confirm
#[instrument(skip(state, request), fields(order_id = %request.order_id))]
async fn confirm_order(
    State(state): State<AppState>,
    Json(request): Json<ConfirmOrderRequest>,
) -> Result<Json<OrderCommandResult>, ApiError> {
    let command = commands::ConfirmOrder {
        correlation_id: Uuid::new_v4(),
        order_id: request.order_id,
    };

    info!(correlation_id = %command.correlation_id, "handling confirm_order command");

    let result =
        command_handlers::handle_confirm_order(&command, state.clock.as_ref(), &state.orders)
            .await?;

    Ok(Json(result))
}

/// POST /ship
#[instrument(skip(state, request), fields(order_id = %request.order_id))]
async fn ship_order(
    State(state): State<AppState>,
    Json(request): Json<ShipOrderRequest>,
) -> Result<Json<OrderCommandResult>, ApiError> {
    let command = commands::ShipOrder {
        correlation_id: Uuid::new_v4(),
        order_id: request.order_id,
        tracking_number: request.tracking_number,
    };

    info!(correlation_id = %command.correlation_id, "handling ship_order command");

    let result =
        command_handlers::handle_ship_order(&command, state.clock.as_ref(), &state.orders)
            .await?;

    Ok(Json(result))
}

/// POST /cancel
#[instrument(skip(state, request), fields(order_id = %request.order_id))]
async fn cancel_order(
    State(state): State<AppState>,
    Json(request): Json<CancelOrderRequest>,
) -> Result<Json<OrderCommandResult>, ApiError> {
    let command = commands::CancelOrder {
        correlation_id: Uuid::new_v4(),
        order_id: request.order_id,
        reason: request.reason,
    };

    info!(correlation_id = %command.correlation_id, "handling cancel_order command");

    let result =
        command_handlers::handle_cancel_order(&command, state.clock.as_ref(), &state.orders)
            .await?;

    Ok(Json(result))
}

/// GET /{order_id}
#[instrument(skip(state))]
async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<OrderView>, ApiError> {
    let view = query_handlers::get_order_by_id(order_id, &state.orders).await?;
    Ok(Json(view))
}

/// GET /{order_id}/history
#[instrument(skip(state))]
async fn get_order_history(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<Vec<OrderEventView>>, ApiError> {
    let history = query_handlers::get_order_history(order_id, &state.orders).await?;
    Ok(Json(history))
}

/// Returns the router for the order context.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/create", post(create_order))
        .route("/add-item", post(add_item))
        .route("/remove-item", post(remove_item))
        .route("/confirm", post(confirm_order))
        .route("/ship", post(ship_order))
        .route("/cancel", post(cancel_order))
        .route("/{order_id}", get(get_order))
        .route("/{order_id}/history", get(get_order_history))
}
