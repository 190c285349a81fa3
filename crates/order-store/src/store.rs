//! The storage seam the order service is written against.

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, SecondsFormat, Utc};
use common::OrderId;
use domain::{Order, Status};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{Result, StoreError};

/// An outbox event appended atomically with the domain mutation it describes.
///
/// The payload is stored opaquely and forwarded to the bus as-is.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub event_type: String,
    pub payload: serde_json::Value,
}

impl NewEvent {
    pub fn new(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
        }
    }
}

/// A validated pagination window.
#[derive(Debug, Clone)]
pub struct PageRequest {
    limit: i64,
    after: Option<(DateTime<Utc>, OrderId)>,
}

impl PageRequest {
    pub const DEFAULT_LIMIT: i64 = 20;
    pub const MAX_LIMIT: i64 = 100;

    /// Clamps `limit` into `[1, 100]` (default 20) and decodes the opaque
    /// cursor; malformed cursors are rejected here, before any query runs.
    pub fn new(limit: Option<i64>, cursor: Option<&str>) -> Result<Self> {
        let limit = limit.unwrap_or(Self::DEFAULT_LIMIT).clamp(1, Self::MAX_LIMIT);
        let after = match cursor {
            Some(c) if !c.is_empty() => Some(decode_cursor(c)?),
            _ => None,
        };

        Ok(Self { limit, after })
    }

    pub fn limit(&self) -> i64 {
        self.limit
    }

    /// The `(created_at, id)` position of the last row of the previous page.
    pub fn after(&self) -> Option<(DateTime<Utc>, OrderId)> {
        self.after
    }
}

/// One page of orders and the cursor for the next one (empty when exhausted).
#[derive(Debug, Serialize)]
pub struct OrderPage {
    pub orders: Vec<Order>,
    pub next: String,
}

impl OrderPage {
    /// Builds a page from up to `limit + 1` candidate rows: the extra row
    /// only signals that a next page exists.
    pub fn from_rows(mut orders: Vec<Order>, limit: i64) -> Self {
        let limit = limit as usize;
        if orders.len() > limit {
            orders.truncate(limit);
            let next = orders
                .last()
                .map(|last| encode_cursor(last.created_at, last.id))
                .unwrap_or_default();
            return Self { orders, next };
        }

        Self {
            orders,
            next: String::new(),
        }
    }
}

/// Encodes a `(created_at, id)` position as an opaque cursor.
pub(crate) fn encode_cursor(created_at: DateTime<Utc>, id: OrderId) -> String {
    let raw = format!(
        "{}|{}",
        created_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
        id
    );
    URL_SAFE_NO_PAD.encode(raw)
}

pub(crate) fn decode_cursor(cursor: &str) -> Result<(DateTime<Utc>, OrderId)> {
    let raw = URL_SAFE_NO_PAD
        .decode(cursor)
        .map_err(|_| StoreError::InvalidCursor)?;
    let raw = String::from_utf8(raw).map_err(|_| StoreError::InvalidCursor)?;
    let (ts, id) = raw.split_once('|').ok_or(StoreError::InvalidCursor)?;
    let ts = DateTime::parse_from_rfc3339(ts)
        .map_err(|_| StoreError::InvalidCursor)?
        .with_timezone(&Utc);
    let id = Uuid::parse_str(id).map_err(|_| StoreError::InvalidCursor)?;

    Ok((ts, OrderId::from_uuid(id)))
}

/// Storage capabilities of the order service.
///
/// The write operations couple the domain mutation with its outbox event in
/// one transaction: either both rows commit or neither does.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persists a new order and its outbox event atomically. An existing
    /// order with the same id is a conflict.
    async fn create_order(&self, order: &Order, event: NewEvent) -> Result<()>;

    /// Updates the status column (bumping `updated_at`) and appends the
    /// matching outbox event atomically. Missing orders are `NotFound`.
    async fn update_order_status(&self, id: OrderId, status: Status, event: NewEvent)
    -> Result<()>;

    /// Reads one order. Missing orders are `NotFound`.
    async fn get_order(&self, id: OrderId) -> Result<Order>;

    /// Reads one page ordered by `(created_at, id)` ascending.
    async fn list_orders(&self, page: PageRequest) -> Result<OrderPage>;

    /// Round-trips the backing store, for readiness probes.
    async fn ping(&self) -> Result<()>;
}
