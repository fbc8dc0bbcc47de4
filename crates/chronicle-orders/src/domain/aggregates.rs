//! Aggregate roots for the Order context.

use std::collections::BTreeMap;
use std::fmt;

use chronicle_core::aggregate::{AggregateRoot, AggregateState};
use chronicle_core::clock::Clock;
use chronicle_core::error::DomainError;
use chronicle_core::event::EventMetadata;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::events::{
    ItemAdded, ItemRemoved, ORDER_AGGREGATE_TYPE, OrderCancelled, OrderConfirmed, OrderCreated,
    OrderEvent, OrderEventKind, OrderShipped,
};

/// Fulfilment status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Placed and still editable.
    #[default]
    Pending,
    /// Accepted for fulfilment.
    Confirmed,
    /// Handed to the carrier.
    Shipped,
    /// Withdrawn before shipping.
    Cancelled,
}

impl OrderStatus {
    /// Stable lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Shipped => "shipped",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One product line of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    /// The product identifier.
    pub product_id: String,
    /// Units ordered.
    pub quantity: u32,
    /// Price per unit in cents.
    pub unit_price_cents: i64,
}

impl OrderLine {
    /// Line total in cents.
    #[must_use]
    pub fn total_cents(&self) -> i64 {
        i64::from(self.quantity).saturating_mul(self.unit_price_cents)
    }
}

/// The aggregate root for an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    state: AggregateState<OrderEvent>,
    customer_id: String,
    status: OrderStatus,
    lines: BTreeMap<String, OrderLine>,
    tracking_number: Option<String>,
    cancellation_reason: Option<String>,
}

impl Order {
    /// Places a new order, producing an `OrderCreated` event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if `customer_id` is blank.
    pub fn create(
        order_id: Uuid,
        customer_id: &str,
        correlation_id: Uuid,
        clock: &dyn Clock,
    ) -> Result<Self, DomainError> {
        if customer_id.trim().is_empty() {
            return Err(DomainError::Validation("customer id must not be blank".into()));
        }
        let mut order = Self::empty(order_id);
        order.emit(
            OrderEventKind::OrderCreated(OrderCreated {
                order_id,
                customer_id: customer_id.to_owned(),
            }),
            correlation_id,
            clock,
        );
        Ok(order)
    }

    /// Adds units of a product, producing an `ItemAdded` event. Adding a
    /// product already on the order increases its quantity and reprices the
    /// line.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the order is not pending, the
    /// quantity is zero, the price is negative or the order total would no
    /// longer fit in an `i64`.
    pub fn add_item(
        &mut self,
        product_id: &str,
        quantity: u32,
        unit_price_cents: i64,
        correlation_id: Uuid,
        clock: &dyn Clock,
    ) -> Result<(), DomainError> {
        self.require_status(&[OrderStatus::Pending], "add items to")?;
        if product_id.trim().is_empty() {
            return Err(DomainError::Validation("product id must not be blank".into()));
        }
        if quantity == 0 {
            return Err(DomainError::Validation("quantity must be at least 1".into()));
        }
        if unit_price_cents < 0 {
            return Err(DomainError::Validation("unit price must not be negative".into()));
        }
        if self.total_with_line(product_id, quantity, unit_price_cents).is_none() {
            return Err(DomainError::Validation(format!(
                "adding {quantity} x {product_id} would overflow the order total"
            )));
        }
        self.emit(
            OrderEventKind::ItemAdded(ItemAdded {
                order_id: self.id(),
                product_id: product_id.to_owned(),
                quantity,
                unit_price_cents,
            }),
            correlation_id,
            clock,
        );
        Ok(())
    }

    /// Removes a product line, producing an `ItemRemoved` event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the order is not pending or the
    /// product is not on the order.
    pub fn remove_item(
        &mut self,
        product_id: &str,
        correlation_id: Uuid,
        clock: &dyn Clock,
    ) -> Result<(), DomainError> {
        self.require_status(&[OrderStatus::Pending], "remove items from")?;
        if !self.lines.contains_key(product_id) {
            return Err(DomainError::Validation(format!(
                "product {product_id} not found in order {}",
                self.id()
            )));
        }
        self.emit(
            OrderEventKind::ItemRemoved(ItemRemoved {
                order_id: self.id(),
                product_id: product_id.to_owned(),
            }),
            correlation_id,
            clock,
        );
        Ok(())
    }

    /// Confirms the order, producing an `OrderConfirmed` event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the order is not pending or has
    /// no items.
    pub fn confirm(&mut self, correlation_id: Uuid, clock: &dyn Clock) -> Result<(), DomainError> {
        self.require_status(&[OrderStatus::Pending], "confirm")?;
        if self.lines.is_empty() {
            return Err(DomainError::Validation(format!(
                "order {} has no items",
                self.id()
            )));
        }
        self.emit(
            OrderEventKind::OrderConfirmed(OrderConfirmed {
                order_id: self.id(),
            }),
            correlation_id,
            clock,
        );
        Ok(())
    }

    /// Ships the order, producing an `OrderShipped` event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the order is not confirmed or the
    /// tracking number is blank.
    pub fn ship(
        &mut self,
        tracking_number: &str,
        correlation_id: Uuid,
        clock: &dyn Clock,
    ) -> Result<(), DomainError> {
        self.require_status(&[OrderStatus::Confirmed], "ship")?;
        if tracking_number.trim().is_empty() {
            return Err(DomainError::Validation(
                "tracking number must not be blank".into(),
            ));
        }
        self.emit(
            OrderEventKind::OrderShipped(OrderShipped {
                order_id: self.id(),
                tracking_number: tracking_number.to_owned(),
            }),
            correlation_id,
            clock,
        );
        Ok(())
    }

    /// Cancels the order, producing an `OrderCancelled` event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the order already shipped or was
    /// cancelled.
    pub fn cancel(
        &mut self,
        reason: &str,
        correlation_id: Uuid,
        clock: &dyn Clock,
    ) -> Result<(), DomainError> {
        self.require_status(&[OrderStatus::Pending, OrderStatus::Confirmed], "cancel")?;
        self.emit(
            OrderEventKind::OrderCancelled(OrderCancelled {
                order_id: self.id(),
                reason: reason.to_owned(),
            }),
            correlation_id,
            clock,
        );
        Ok(())
    }

    /// The order identifier.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.state.id()
    }

    /// The customer who placed the order.
    #[must_use]
    pub fn customer_id(&self) -> &str {
        &self.customer_id
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> OrderStatus {
        self.status
    }

    /// Product lines ordered by product id.
    pub fn lines(&self) -> impl Iterator<Item = &OrderLine> {
        self.lines.values()
    }

    /// Order total in cents.
    #[must_use]
    pub fn total_cents(&self) -> i64 {
        self.lines
            .values()
            .fold(0, |total, line| total.saturating_add(line.total_cents()))
    }

    /// Total units across all lines.
    #[must_use]
    pub fn item_count(&self) -> u32 {
        self.lines
            .values()
            .fold(0, |count, line| count.saturating_add(line.quantity))
    }

    /// Carrier tracking number once shipped.
    #[must_use]
    pub fn tracking_number(&self) -> Option<&str> {
        self.tracking_number.as_deref()
    }

    /// Cancellation reason once cancelled.
    #[must_use]
    pub fn cancellation_reason(&self) -> Option<&str> {
        self.cancellation_reason.as_deref()
    }

    /// Order total after merging an added line, or `None` on overflow.
    fn total_with_line(
        &self,
        product_id: &str,
        quantity: u32,
        unit_price_cents: i64,
    ) -> Option<i64> {
        let existing = self.lines.get(product_id).map_or(0, |line| line.quantity);
        let merged_quantity = existing.checked_add(quantity)?;
        let line_total = i64::from(merged_quantity).checked_mul(unit_price_cents)?;
        self.lines
            .values()
            .filter(|line| line.product_id != product_id)
            .try_fold(line_total, |total, line| {
                i64::from(line.quantity)
                    .checked_mul(line.unit_price_cents)
                    .and_then(|cents| total.checked_add(cents))
            })
    }

    fn require_status(&self, allowed: &[OrderStatus], action: &str) -> Result<(), DomainError> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(DomainError::Validation(format!(
                "cannot {action} order {} while it is {}",
                self.id(),
                self.status
            )))
        }
    }

    fn emit(&mut self, kind: OrderEventKind, correlation_id: Uuid, clock: &dyn Clock) {
        let metadata = EventMetadata::new(
            kind.event_type(),
            self.id(),
            ORDER_AGGREGATE_TYPE,
            self.state.next_version(),
            correlation_id,
            clock.now(),
        )
        .with_attribute("schema", "v1");
        self.raise(OrderEvent { metadata, kind });
    }
}

impl AggregateRoot for Order {
    type Event = OrderEvent;

    const AGGREGATE_TYPE: &'static str = ORDER_AGGREGATE_TYPE;

    fn empty(id: Uuid) -> Self {
        Self {
            state: AggregateState::new(id, ORDER_AGGREGATE_TYPE),
            customer_id: String::new(),
            status: OrderStatus::Pending,
            lines: BTreeMap::new(),
            tracking_number: None,
            cancellation_reason: None,
        }
    }

    fn state(&self) -> &AggregateState<OrderEvent> {
        &self.state
    }

    fn state_mut(&mut self) -> &mut AggregateState<OrderEvent> {
        &mut self.state
    }

    fn mutate(&mut self, event: &OrderEvent) {
        match &event.kind {
            OrderEventKind::OrderCreated(payload) => {
                self.customer_id.clone_from(&payload.customer_id);
                self.status = OrderStatus::Pending;
            }
            OrderEventKind::ItemAdded(payload) => {
                self.lines
                    .entry(payload.product_id.clone())
                    .and_modify(|line| {
                        line.quantity = line.quantity.saturating_add(payload.quantity);
                        line.unit_price_cents = payload.unit_price_cents;
                    })
                    .or_insert_with(|| OrderLine {
                        product_id: payload.product_id.clone(),
                        quantity: payload.quantity,
                        unit_price_cents: payload.unit_price_cents,
                    });
            }
            OrderEventKind::ItemRemoved(payload) => {
                self.lines.remove(&payload.product_id);
            }
            OrderEventKind::OrderConfirmed(_) => self.status = OrderStatus::Confirmed,
            OrderEventKind::OrderShipped(payload) => {
                self.status = OrderStatus::Shipped;
                self.tracking_number = Some(payload.tracking_number.clone());
            }
            OrderEventKind::OrderCancelled(payload) => {
                self.status = OrderStatus::Cancelled;
                self.cancellation_reason = Some(payload.reason.clone());
            }
        }
    }
}
