//! Identifier types shared across the service crates.

pub mod types;

pub use types::{CustomerId, OrderId, SagaId};
