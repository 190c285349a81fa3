//! PostgreSQL-backed order store.

use async_trait::async_trait;
use common::{CustomerId, OrderId};
use domain::{Order, Status};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, Row};
use uuid::Uuid;

use crate::db::Db;
use crate::error::{Result, StoreError};
use crate::store::{NewEvent, OrderPage, OrderStore, PageRequest};

const SELECT_ORDER_COLUMNS: &str =
    "SELECT id, customer_id, status, currency, total_amount, items, created_at, updated_at FROM orders";

/// Production [`OrderStore`] over the shared pool.
#[derive(Clone)]
pub struct PostgresOrderStore {
    db: Db,
}

impl PostgresOrderStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    fn row_to_order(row: PgRow) -> Result<Order> {
        let status: String = row.try_get("status")?;
        let status = status
            .parse::<Status>()
            .map_err(|_| StoreError::Decode(format!("unknown status {status:?}")))?;
        let items: serde_json::Value = row.try_get("items")?;

        Ok(Order {
            id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
            customer_id: CustomerId::from_uuid(row.try_get::<Uuid, _>("customer_id")?),
            status,
            currency: row.try_get("currency")?,
            total_amount: row.try_get("total_amount")?,
            items: serde_json::from_value(items)?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Inserts the full order row inside the caller's transaction. A primary-key
/// collision surfaces as a conflict rather than a database error.
pub(crate) async fn insert_order(conn: &mut PgConnection, order: &Order) -> Result<()> {
    let items = serde_json::to_value(&order.items)?;
    sqlx::query(
        r#"
        INSERT INTO orders (id, customer_id, status, currency, total_amount, items, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(order.id.as_uuid())
    .bind(order.customer_id.as_uuid())
    .bind(order.status.as_str())
    .bind(&order.currency)
    .bind(order.total_amount)
    .bind(items)
    .bind(order.created_at)
    .bind(order.updated_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| {
        if let sqlx::Error::Database(ref db_err) = e
            && db_err.constraint() == Some("orders_pkey")
        {
            return StoreError::Conflict("order already exists".to_string());
        }
        StoreError::Database(e)
    })?;

    Ok(())
}

/// Updates the status column inside the caller's transaction. Zero affected
/// rows means the order does not exist.
pub(crate) async fn update_status(
    conn: &mut PgConnection,
    id: OrderId,
    status: Status,
) -> Result<()> {
    let done = sqlx::query("UPDATE orders SET status = $2, updated_at = now() WHERE id = $1")
        .bind(id.as_uuid())
        .bind(status.as_str())
        .execute(&mut *conn)
        .await?;
    if done.rows_affected() == 0 {
        return Err(StoreError::NotFound);
    }

    Ok(())
}

/// Appends an outbox row inside the caller's transaction. The row id is
/// assigned by the database sequence; `available_at` and `created_at` default
/// to now and `published_at` stays null until the relay delivers the row.
pub(crate) async fn append_event(
    conn: &mut PgConnection,
    aggregate_id: Uuid,
    aggregate_type: &str,
    event_type: &str,
    payload: &serde_json::Value,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO outbox (aggregate_id, aggregate_type, event_type, payload)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(aggregate_id)
    .bind(aggregate_type)
    .bind(event_type)
    .bind(payload)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    async fn create_order(&self, order: &Order, event: NewEvent) -> Result<()> {
        let mut tx = self.db.begin().await?;
        insert_order(&mut tx, order).await?;
        append_event(
            &mut tx,
            order.id.as_uuid(),
            "order",
            &event.event_type,
            &event.payload,
        )
        .await?;
        tx.commit().await?;

        Ok(())
    }

    async fn update_order_status(
        &self,
        id: OrderId,
        status: Status,
        event: NewEvent,
    ) -> Result<()> {
        let mut tx = self.db.begin().await?;
        update_status(&mut tx, id, status).await?;
        append_event(
            &mut tx,
            id.as_uuid(),
            "order",
            &event.event_type,
            &event.payload,
        )
        .await?;
        tx.commit().await?;

        Ok(())
    }

    async fn get_order(&self, id: OrderId) -> Result<Order> {
        let row = sqlx::query(&format!("{SELECT_ORDER_COLUMNS} WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(self.db.pool())
            .await?;

        match row {
            Some(row) => Self::row_to_order(row),
            None => Err(StoreError::NotFound),
        }
    }

    async fn list_orders(&self, page: PageRequest) -> Result<OrderPage> {
        let rows = match page.after() {
            None => {
                sqlx::query(&format!(
                    "{SELECT_ORDER_COLUMNS} ORDER BY created_at, id LIMIT $1"
                ))
                .bind(page.limit() + 1)
                .fetch_all(self.db.pool())
                .await?
            }
            Some((ts, id)) => {
                sqlx::query(&format!(
                    "{SELECT_ORDER_COLUMNS} WHERE (created_at, id) > ($1, $2) ORDER BY created_at, id LIMIT $3"
                ))
                .bind(ts)
                .bind(id.as_uuid())
                .bind(page.limit() + 1)
                .fetch_all(self.db.pool())
                .await?
            }
        };

        let orders = rows
            .into_iter()
            .map(Self::row_to_order)
            .collect::<Result<Vec<_>>>()?;

        Ok(OrderPage::from_rows(orders, page.limit()))
    }

    async fn ping(&self) -> Result<()> {
        self.db.ping().await
    }
}
