//! Order bounded context for Chronicle.
//!
//! Order placement, line items and fulfilment status. Orders are persisted
//! through the snapshot-optimized `AggregateRepository`.

pub mod application;
pub mod domain;
