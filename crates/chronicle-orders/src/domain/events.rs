//! Domain events for the Order context.

use chronicle_core::error::DomainError;
use chronicle_core::event::{DomainEvent, EventMetadata};
use chronicle_core::event_store::StoredEvent;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Aggregate type name of orders.
pub const ORDER_AGGREGATE_TYPE: &str = "order";

/// Event type tag for `OrderCreated`.
pub const ORDER_CREATED_EVENT_TYPE: &str = "order.created";
/// Event type tag for `ItemAdded`.
pub const ITEM_ADDED_EVENT_TYPE: &str = "order.item_added";
/// Event type tag for `ItemRemoved`.
pub const ITEM_REMOVED_EVENT_TYPE: &str = "order.item_removed";
/// Event type tag for `OrderConfirmed`.
pub const ORDER_CONFIRMED_EVENT_TYPE: &str = "order.confirmed";
/// Event type tag for `OrderShipped`.
pub const ORDER_SHIPPED_EVENT_TYPE: &str = "order.shipped";
/// Event type tag for `OrderCancelled`.
pub const ORDER_CANCELLED_EVENT_TYPE: &str = "order.cancelled";

/// Emitted when an order is placed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCreated {
    /// The order identifier.
    pub order_id: Uuid,
    /// The customer placing the order.
    pub customer_id: String,
}

/// Emitted when a product is added to an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemAdded {
    /// The order identifier.
    pub order_id: Uuid,
    /// The product identifier.
    pub product_id: String,
    /// Units added.
    pub quantity: u32,
    /// Price per unit in cents.
    pub unit_price_cents: i64,
}

/// Emitted when a product line is removed from an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRemoved {
    /// The order identifier.
    pub order_id: Uuid,
    /// The product identifier.
    pub product_id: String,
}

/// Emitted when an order is confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderConfirmed {
    /// The order identifier.
    pub order_id: Uuid,
}

/// Emitted when a confirmed order ships.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderShipped {
    /// The order identifier.
    pub order_id: Uuid,
    /// Carrier tracking number.
    pub tracking_number: String,
}

/// Emitted when an order is cancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCancelled {
    /// The order identifier.
    pub order_id: Uuid,
    /// Why the order was cancelled.
    pub reason: String,
}

/// Event payload variants for the Order context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderEventKind {
    /// An order has been placed.
    OrderCreated(OrderCreated),
    /// A product has been added.
    ItemAdded(ItemAdded),
    /// A product line has been removed.
    ItemRemoved(ItemRemoved),
    /// The order has been confirmed.
    OrderConfirmed(OrderConfirmed),
    /// The order has shipped.
    OrderShipped(OrderShipped),
    /// The order has been cancelled.
    OrderCancelled(OrderCancelled),
}

impl OrderEventKind {
    /// Event type tag of this variant.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::OrderCreated(_) => ORDER_CREATED_EVENT_TYPE,
            Self::ItemAdded(_) => ITEM_ADDED_EVENT_TYPE,
            Self::ItemRemoved(_) => ITEM_REMOVED_EVENT_TYPE,
            Self::OrderConfirmed(_) => ORDER_CONFIRMED_EVENT_TYPE,
            Self::OrderShipped(_) => ORDER_SHIPPED_EVENT_TYPE,
            Self::OrderCancelled(_) => ORDER_CANCELLED_EVENT_TYPE,
        }
    }
}

/// Domain event envelope for the Order context.
#[derive(Debug, Clone)]
pub struct OrderEvent {
    /// Event metadata.
    pub metadata: EventMetadata,
    /// Event-specific payload.
    pub kind: OrderEventKind,
}

fn decode<T: DeserializeOwned>(stored: &StoredEvent) -> Result<T, DomainError> {
    serde_json::from_value(stored.payload.clone()).map_err(|e| {
        DomainError::Deserialization(format!(
            "{} payload at version {}: {e}",
            stored.event_type, stored.version
        ))
    })
}

impl DomainEvent for OrderEvent {
    fn event_type(&self) -> &'static str {
        self.kind.event_type()
    }

    fn to_payload(&self) -> Result<serde_json::Value, DomainError> {
        let payload = match &self.kind {
            OrderEventKind::OrderCreated(p) => serde_json::to_value(p),
            OrderEventKind::ItemAdded(p) => serde_json::to_value(p),
            OrderEventKind::ItemRemoved(p) => serde_json::to_value(p),
            OrderEventKind::OrderConfirmed(p) => serde_json::to_value(p),
            OrderEventKind::OrderShipped(p) => serde_json::to_value(p),
            OrderEventKind::OrderCancelled(p) => serde_json::to_value(p),
        };
        payload.map_err(|e| DomainError::Serialization(e.to_string()))
    }

    fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }

    fn from_stored(stored: &StoredEvent) -> Result<Self, DomainError> {
        let kind = match stored.event_type.as_str() {
            ORDER_CREATED_EVENT_TYPE => OrderEventKind::OrderCreated(decode(stored)?),
            ITEM_ADDED_EVENT_TYPE => OrderEventKind::ItemAdded(decode(stored)?),
            ITEM_REMOVED_EVENT_TYPE => OrderEventKind::ItemRemoved(decode(stored)?),
            ORDER_CONFIRMED_EVENT_TYPE => OrderEventKind::OrderConfirmed(decode(stored)?),
            ORDER_SHIPPED_EVENT_TYPE => OrderEventKind::OrderShipped(decode(stored)?),
            ORDER_CANCELLED_EVENT_TYPE => OrderEventKind::OrderCancelled(decode(stored)?),
            other => {
                return Err(DomainError::UnknownEventType {
                    aggregate_type: ORDER_AGGREGATE_TYPE.to_owned(),
                    event_type: other.to_owned(),
                });
            }
        };
        Ok(Self {
            metadata: EventMetadata::from_stored(stored),
            kind,
        })
    }
}
