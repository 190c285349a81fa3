//! Order use-cases.
//!
//! The write path couples every domain mutation with its outbox event inside
//! one store transaction; creation additionally opens the fulfillment saga.

use std::sync::Arc;

use common::{CustomerId, OrderId};
use domain::{Item, Order, OrderError, Status};
use order_store::{NewEvent, OrderPage, OrderStore, PageRequest, StoreError};
use saga::{NewStep, SagaStore};
use thiserror::Error;

/// Saga opened for every new order.
const FULFILLMENT_SAGA: &str = "order-fulfillment";

/// Errors surfaced by the order use-cases.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Domain(#[from] OrderError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ServiceError>;

/// Thin orchestrator over the order store and the saga store.
pub struct OrderService<S> {
    store: S,
    sagas: Option<Arc<SagaStore>>,
}

impl<S: OrderStore> OrderService<S> {
    pub fn new(store: S, sagas: Option<Arc<SagaStore>>) -> Self {
        Self { store, sagas }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Validates and persists a new order together with its `order.created`
    /// event, then opens the fulfillment saga. The saga is best effort: a
    /// failure to open it is logged, the created order stands.
    pub async fn create(
        &self,
        customer_id: CustomerId,
        currency: &str,
        items: Vec<Item>,
    ) -> Result<Order> {
        let order = Order::new(customer_id, currency, items)?;
        let payload = serde_json::to_value(&order)?;
        self.store
            .create_order(&order, NewEvent::new("order.created", payload))
            .await?;

        if let Some(sagas) = &self.sagas {
            let steps = vec![
                NewStep {
                    step_no: 1,
                    name: "reserve-inventory".to_string(),
                    action: "reserve_inventory".to_string(),
                    compensate: "release_inventory".to_string(),
                    payload: serde_json::json!({ "order_id": order.id }),
                },
                NewStep {
                    step_no: 2,
                    name: "authorize-payment".to_string(),
                    action: "authorize_payment".to_string(),
                    compensate: "void_payment".to_string(),
                    payload: serde_json::json!({
                        "order_id": order.id,
                        "amount_minor": order.total_amount,
                    }),
                },
            ];
            let data = serde_json::json!({ "order_id": order.id });
            if let Err(err) = sagas.create(FULFILLMENT_SAGA, &steps, data).await {
                tracing::error!(order_id = %order.id, error = %err, "failed to open fulfillment saga");
            }
        }

        Ok(order)
    }

    pub async fn get(&self, id: OrderId) -> Result<Order> {
        Ok(self.store.get_order(id).await?)
    }

    pub async fn list(&self, page: PageRequest) -> Result<OrderPage> {
        Ok(self.store.list_orders(page).await?)
    }

    /// Applies a status transition and appends the matching event
    /// atomically. Transitions outside the lifecycle DAG never reach the
    /// store.
    pub async fn update_status(&self, id: OrderId, status: Status) -> Result<Order> {
        let mut order = self.store.get_order(id).await?;
        order.transition(status)?;
        let payload = serde_json::json!({ "id": id, "status": status });
        self.store
            .update_order_status(id, status, NewEvent::new(event_for(status), payload))
            .await?;

        Ok(order)
    }

    /// Readiness probe: the backing store answers.
    pub async fn ready(&self) -> Result<()> {
        Ok(self.store.ping().await?)
    }
}

/// Event type emitted for a status change.
fn event_for(status: Status) -> &'static str {
    match status {
        Status::Paid => "order.paid",
        Status::Cancelled => "order.cancelled",
        Status::Shipped => "order.shipped",
        Status::Created => "order.updated",
    }
}
