//! Order domain model.
//!
//! The order is a plain value object: validation happens at construction,
//! status changes go through the transition methods so the lifecycle DAG
//! cannot be violated.

pub mod error;
pub mod order;

pub use error::OrderError;
pub use order::{Item, Order, Status};
