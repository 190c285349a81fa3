//! Persistence layer for the order service.
//!
//! Provides the connection pool with its transaction scope, the order
//! repository whose write path couples every mutation with an outbox append,
//! and the HTTP request-idempotency store. The [`OrderStore`] trait is the
//! seam the service is written against; [`PostgresOrderStore`] is the
//! production implementation and [`InMemoryOrderStore`] the test twin.

pub mod db;
pub mod error;
pub mod idempotency;
pub mod memory;
pub mod postgres;
pub mod store;

pub use db::{Db, Tx};
pub use error::{Result, StoreError};
pub use idempotency::{
    IdempotencyStore, IdempotentResult, InMemoryIdempotencyStore, PostgresIdempotencyStore,
};
pub use memory::{InMemoryOrderStore, RecordedEvent};
pub use postgres::PostgresOrderStore;
pub use store::{NewEvent, OrderPage, OrderStore, PageRequest};
