//! Query handlers for the Order context.

use chrono::{DateTime, Utc};
use chronicle_core::aggregate::Aggregate;
use chronicle_core::error::DomainError;
use chronicle_snapshot::AggregateRepository;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::aggregates::Order;
use crate::domain::events::ORDER_AGGREGATE_TYPE;

/// One product line of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderLineView {
    /// The product identifier.
    pub product_id: String,
    /// Units ordered.
    pub quantity: u32,
    /// Price per unit in cents.
    pub unit_price_cents: i64,
    /// Line total in cents.
    pub total_cents: i64,
}

/// Read model of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderView {
    /// The order identifier.
    pub order_id: Uuid,
    /// The customer who placed the order.
    pub customer_id: String,
    /// Lifecycle status.
    pub status: String,
    /// Product lines ordered by product id.
    pub items: Vec<OrderLineView>,
    /// Order total in cents.
    pub total_cents: i64,
    /// Units across all lines.
    pub item_count: u32,
    /// Carrier tracking number once shipped.
    pub tracking_number: Option<String>,
    /// Cancellation reason once cancelled.
    pub cancellation_reason: Option<String>,
    /// Stream version the view was built from.
    pub version: i64,
}

impl From<&Order> for OrderView {
    fn from(order: &Order) -> Self {
        Self {
            order_id: order.id(),
            customer_id: order.customer_id().to_owned(),
            status: order.status().to_string(),
            items: order
                .lines()
                .map(|line| OrderLineView {
                    product_id: line.product_id.clone(),
                    quantity: line.quantity,
                    unit_price_cents: line.unit_price_cents,
                    total_cents: line.total_cents(),
                })
                .collect(),
            total_cents: order.total_cents(),
            item_count: order.item_count(),
            tracking_number: order.tracking_number().map(str::to_owned),
            cancellation_reason: order.cancellation_reason().map(str::to_owned),
            version: order.version(),
        }
    }
}

/// One entry of an order's event history.
#[derive(Debug, Clone, Serialize)]
pub struct OrderEventView {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// Event type tag.
    pub event_type: String,
    /// Stream version of the event.
    pub version: i64,
    /// Event payload as stored.
    pub payload: serde_json::Value,
    /// Correlation ID of the command that produced the event.
    pub correlation_id: Uuid,
    /// When the event occurred.
    pub occurred_at: DateTime<Utc>,
}

/// Returns the current state of an order, loaded from its newest snapshot
/// plus the event tail.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` if the order does not exist.
pub async fn get_order_by_id(
    order_id: Uuid,
    repo: &AggregateRepository<Order>,
) -> Result<OrderView, DomainError> {
    let order = repo.get_by_id(order_id).await?;
    Ok(OrderView::from(&order))
}

/// Returns every event of an order, oldest first.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` if the order has no events.
pub async fn get_order_history(
    order_id: Uuid,
    repo: &AggregateRepository<Order>,
) -> Result<Vec<OrderEventView>, DomainError> {
    let stored = repo
        .event_store()
        .get_event_history(order_id, ORDER_AGGREGATE_TYPE, 1)
        .await?;
    if stored.is_empty() {
        return Err(DomainError::AggregateNotFound(order_id));
    }
    Ok(stored
        .into_iter()
        .map(|event| OrderEventView {
            event_id: event.event_id,
            event_type: event.event_type,
            version: event.version,
            payload: event.payload,
            correlation_id: event.correlation_id,
            occurred_at: event.occurred_at,
        })
        .collect())
}
