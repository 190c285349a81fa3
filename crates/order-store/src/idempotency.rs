//! HTTP request-idempotency persistence.
//!
//! Records the outcome of a mutation keyed by `(Idempotency-Key, route)` so a
//! retried request can be answered from the original result instead of being
//! re-executed.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::{CustomerId, OrderId};
use sqlx::Row;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::db::Db;
use crate::error::Result;

/// Outcome of a previously executed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdempotentResult {
    pub order_id: OrderId,
    pub status_code: u16,
}

/// Stores and recalls request outcomes within their TTL.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Records the result of a request. Replaying an existing `(key, route)`
    /// pair is a silent success; the first write wins.
    async fn save(
        &self,
        key: &str,
        route: &str,
        customer_id: CustomerId,
        order_id: OrderId,
        status_code: u16,
    ) -> Result<()>;

    /// Returns the recorded result while its TTL has not passed.
    async fn get(&self, key: &str, route: &str) -> Result<Option<IdempotentResult>>;
}

/// PostgreSQL implementation. Records expire 24 hours after insertion.
#[derive(Clone)]
pub struct PostgresIdempotencyStore {
    db: Db,
}

impl PostgresIdempotencyStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

#[async_trait]
impl IdempotencyStore for PostgresIdempotencyStore {
    async fn save(
        &self,
        key: &str,
        route: &str,
        customer_id: CustomerId,
        order_id: OrderId,
        status_code: u16,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO idempotency_keys (key, route, customer_id, order_id, status_code, ttl_at)
            VALUES ($1, $2, $3, $4, $5, now() + interval '24 hours')
            ON CONFLICT (key, route) DO NOTHING
            "#,
        )
        .bind(key)
        .bind(route)
        .bind(customer_id.as_uuid())
        .bind(order_id.as_uuid())
        .bind(i32::from(status_code))
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    async fn get(&self, key: &str, route: &str) -> Result<Option<IdempotentResult>> {
        let row = sqlx::query(
            r#"
            SELECT order_id, status_code FROM idempotency_keys
            WHERE key = $1 AND route = $2 AND ttl_at > now()
            "#,
        )
        .bind(key)
        .bind(route)
        .fetch_optional(self.db.pool())
        .await?;

        match row {
            Some(row) => {
                let order_id: Uuid = row.try_get("order_id")?;
                let status_code: i32 = row.try_get("status_code")?;
                Ok(Some(IdempotentResult {
                    order_id: OrderId::from_uuid(order_id),
                    status_code: status_code as u16,
                }))
            }
            None => {
                tracing::debug!(key, route, "idempotency key not found");
                Ok(None)
            }
        }
    }
}

/// In-memory implementation for tests, with the same TTL behavior.
#[derive(Clone, Default)]
pub struct InMemoryIdempotencyStore {
    records: Arc<RwLock<HashMap<(String, String), (IdempotentResult, DateTime<Utc>)>>>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn save(
        &self,
        key: &str,
        route: &str,
        _customer_id: CustomerId,
        order_id: OrderId,
        status_code: u16,
    ) -> Result<()> {
        let mut records = self.records.write().await;
        records
            .entry((key.to_string(), route.to_string()))
            .or_insert((
                IdempotentResult {
                    order_id,
                    status_code,
                },
                Utc::now() + Duration::hours(24),
            ));

        Ok(())
    }

    async fn get(&self, key: &str, route: &str) -> Result<Option<IdempotentResult>> {
        let records = self.records.read().await;
        Ok(records
            .get(&(key.to_string(), route.to_string()))
            .filter(|(_, ttl_at)| *ttl_at > Utc::now())
            .map(|(result, _)| *result))
    }
}
