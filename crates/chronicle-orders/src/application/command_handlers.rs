//! Command handlers for the Order context.
//!
//! Each handler loads the order through the repository (snapshot first, then
//! the event tail), executes the command and saves. Concurrency conflicts
//! are retried on freshly loaded state.

use chronicle_core::aggregate::{Aggregate, AggregateRoot};
use chronicle_core::clock::Clock;
use chronicle_core::error::DomainError;
use chronicle_core::event::DomainEvent;
use chronicle_snapshot::AggregateRepository;
use serde::Serialize;
use tracing::instrument;
use uuid::Uuid;

use crate::domain::aggregates::Order;
use crate::domain::commands::{
    AddItem, CancelOrder, ConfirmOrder, CreateOrder, RemoveItem, ShipOrder,
};

/// Attempts per command before a concurrency conflict is returned.
pub const MAX_COMMAND_ATTEMPTS: u32 = 3;

/// Result of a successfully handled command.
#[derive(Debug, Clone, Serialize)]
pub struct OrderCommandResult {
    /// The aggregate ID affected by the command.
    pub aggregate_id: Uuid,
    /// Order version after the command.
    pub version: i64,
    /// Types of the events the command appended.
    pub event_types: Vec<String>,
}

fn pending_event_types(order: &Order) -> Vec<String> {
    order
        .uncommitted_events()
        .iter()
        .map(|event| event.event_type().to_owned())
        .collect()
}

async fn execute<F>(
    order_id: Uuid,
    repo: &AggregateRepository<Order>,
    mut action: F,
) -> Result<OrderCommandResult, DomainError>
where
    F: FnMut(&mut Order) -> Result<(), DomainError> + Send,
{
    let mut event_types = Vec::new();
    let order = repo
        .save_with_retry(order_id, MAX_COMMAND_ATTEMPTS, |order| {
            action(order)?;
            event_types = pending_event_types(order);
            Ok(())
        })
        .await?;
    Ok(OrderCommandResult {
        aggregate_id: order_id,
        version: order.version(),
        event_types,
    })
}

/// Handles the `CreateOrder` command.
///
/// # Errors
///
/// Returns `DomainError::Validation` for a blank customer and
/// `DomainError::ConcurrencyConflict` if the order already exists.
#[instrument(skip(clock, repo), fields(order_id = %command.order_id))]
pub async fn handle_create_order(
    command: &CreateOrder,
    clock: &dyn Clock,
    repo: &AggregateRepository<Order>,
) -> Result<OrderCommandResult, DomainError> {
    let mut order = Order::create(
        command.order_id,
        &command.customer_id,
        command.correlation_id,
        clock,
    )?;
    let event_types = pending_event_types(&order);
    repo.save(&mut order).await?;
    Ok(OrderCommandResult {
        aggregate_id: command.order_id,
        version: order.version(),
        event_types,
    })
}

/// Handles the `AddItem` command.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` for unknown orders and
/// `DomainError::Validation` when the order rejects the item.
#[instrument(skip(clock, repo), fields(order_id = %command.order_id))]
pub async fn handle_add_item(
    command: &AddItem,
    clock: &dyn Clock,
    repo: &AggregateRepository<Order>,
) -> Result<OrderCommandResult, DomainError> {
    execute(command.order_id, repo, |order| {
        order.add_item(
            &command.product_id,
            command.quantity,
            command.unit_price_cents,
            command.correlation_id,
            clock,
        )
    })
    .await
}

/// Handles the `RemoveItem` command.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` for unknown orders and
/// `DomainError::Validation` if the product is not on a pending order.
#[instrument(skip(clock, repo), fields(order_id = %command.order_id))]
pub async fn handle_remove_item(
    command: &RemoveItem,
    clock: &dyn Clock,
    repo: &AggregateRepository<Order>,
) -> Result<OrderCommandResult, DomainError> {
    execute(command.order_id, repo, |order| {
        order.remove_item(&command.product_id, command.correlation_id, clock)
    })
    .await
}

/// Handles the `ConfirmOrder` command.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` for unknown orders and
/// `DomainError::Validation` for empty or non-pending orders.
#[instrument(skip(clock, repo), fields(order_id = %command.order_id))]
pub async fn handle_confirm_order(
    command: &ConfirmOrder,
    clock: &dyn Clock,
    repo: &AggregateRepository<Order>,
) -> Result<OrderCommandResult, DomainError> {
    execute(command.order_id, repo, |order| {
        order.confirm(command.correlation_id, clock)
    })
    .await
}

/// Handles the `ShipOrder` command.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` for unknown orders and
/// `DomainError::Validation` for orders that are not confirmed.
#[instrument(skip(clock, repo), fields(order_id = %command.order_id))]
pub async fn handle_ship_order(
    command: &ShipOrder,
    clock: &dyn Clock,
    repo: &AggregateRepository<Order>,
) -> Result<OrderCommandResult, DomainError> {
    execute(command.order_id, repo, |order| {
        order.ship(&command.tracking_number, command.correlation_id, clock)
    })
    .await
}

/// Handles the `CancelOrder` command.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` for unknown orders and
/// `DomainError::Validation` for shipped or cancelled orders.
#[instrument(skip(clock, repo), fields(order_id = %command.order_id))]
pub async fn handle_cancel_order(
    command: &CancelOrder,
    clock: &dyn Clock,
    repo: &AggregateRepository<Order>,
) -> Result<OrderCommandResult, DomainError> {
    execute(command.order_id, repo, |order| {
        order.cancel(&command.reason, command.correlation_id, clock)
    })
    .await
}
