//! Route modules organized by concern.

pub mod health;
pub mod orders;
pub mod performance;
pub mod snapshots;
