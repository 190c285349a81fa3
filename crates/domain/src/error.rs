//! Order domain errors.

use thiserror::Error;

use crate::order::Status;

/// Validation and lifecycle errors for orders.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    /// The customer id was missing or nil.
    #[error("customer id is required")]
    CustomerIdRequired,

    /// The currency is not a three-letter uppercase code.
    #[error("currency must be a three-letter uppercase code")]
    InvalidCurrency,

    /// An order needs at least one item.
    #[error("at least one item required")]
    NoItems,

    /// An item had an empty SKU, zero quantity, or a negative price.
    #[error("invalid item {sku:?}")]
    InvalidItem { sku: String },

    /// The requested status change is not an edge of the lifecycle DAG.
    #[error("cannot transition order from {from} to {to}")]
    InvalidTransition { from: Status, to: Status },

    /// Shipped orders can never be cancelled.
    #[error("cannot cancel shipped order")]
    CannotCancelShipped,

    /// The status string does not name a known status.
    #[error("unknown status {0:?}")]
    UnknownStatus(String),
}
