//! Chronicle Core: shared event-sourcing abstractions.
//!
//! This crate defines the fundamental traits and types that the storage
//! adapters, the snapshot engine and every bounded context depend on. It
//! contains no infrastructure code.

pub mod aggregate;
pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod event_store;
pub mod snapshot;
