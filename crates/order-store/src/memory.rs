//! In-memory order store for tests.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::OrderId;
use domain::{Order, Status};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::store::{NewEvent, OrderPage, OrderStore, PageRequest};

/// An outbox event captured by [`InMemoryOrderStore`], kept for assertions.
#[derive(Debug, Clone)]
pub struct RecordedEvent {
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
}

/// In-memory implementation with the same atomicity contract as the
/// PostgreSQL store: a mutation and its event are recorded together or not
/// at all.
#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    orders: Arc<RwLock<Vec<Order>>>,
    events: Arc<RwLock<Vec<RecordedEvent>>>,
}

impl InMemoryOrderStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every event appended so far, in order.
    pub async fn events(&self) -> Vec<RecordedEvent> {
        self.events.read().await.clone()
    }

    /// Returns the number of stored orders.
    pub async fn order_count(&self) -> usize {
        self.orders.read().await.len()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn create_order(&self, order: &Order, event: NewEvent) -> Result<()> {
        let mut orders = self.orders.write().await;
        if orders.iter().any(|o| o.id == order.id) {
            return Err(StoreError::Conflict("order already exists".to_string()));
        }
        orders.push(order.clone());
        self.events.write().await.push(RecordedEvent {
            aggregate_id: order.id.as_uuid(),
            event_type: event.event_type,
            payload: event.payload,
        });

        Ok(())
    }

    async fn update_order_status(
        &self,
        id: OrderId,
        status: Status,
        event: NewEvent,
    ) -> Result<()> {
        let mut orders = self.orders.write().await;
        let order = orders
            .iter_mut()
            .find(|o| o.id == id)
            .ok_or(StoreError::NotFound)?;
        order.status = status;
        order.updated_at = Utc::now();
        self.events.write().await.push(RecordedEvent {
            aggregate_id: id.as_uuid(),
            event_type: event.event_type,
            payload: event.payload,
        });

        Ok(())
    }

    async fn get_order(&self, id: OrderId) -> Result<Order> {
        self.orders
            .read()
            .await
            .iter()
            .find(|o| o.id == id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn list_orders(&self, page: PageRequest) -> Result<OrderPage> {
        let mut orders: Vec<Order> = self.orders.read().await.clone();
        orders.sort_by_key(|o| (o.created_at, o.id.as_uuid()));

        let after = page.after();
        let candidates: Vec<Order> = orders
            .into_iter()
            .filter(|o| {
                after.is_none_or(|(ts, id)| (o.created_at, o.id.as_uuid()) > (ts, id.as_uuid()))
            })
            .take(page.limit() as usize + 1)
            .collect();

        Ok(OrderPage::from_rows(candidates, page.limit()))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::CustomerId;
    use domain::Item;

    fn order() -> Order {
        Order::new(
            CustomerId::new(),
            "USD",
            vec![Item {
                sku: "A".to_string(),
                quantity: 1,
                price_minor: 100,
            }],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn create_records_order_and_event() {
        let store = InMemoryOrderStore::new();
        let o = order();
        store
            .create_order(&o, NewEvent::new("order.created", serde_json::json!({})))
            .await
            .unwrap();

        assert_eq!(store.order_count().await, 1);
        let events = store.events().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "order.created");
        assert_eq!(events[0].aggregate_id, o.id.as_uuid());
    }

    #[tokio::test]
    async fn duplicate_create_is_a_conflict() {
        let store = InMemoryOrderStore::new();
        let o = order();
        let event = || NewEvent::new("order.created", serde_json::json!({}));
        store.create_order(&o, event()).await.unwrap();
        assert!(matches!(
            store.create_order(&o, event()).await,
            Err(StoreError::Conflict(_))
        ));
        assert_eq!(store.events().await.len(), 1);
    }

    #[tokio::test]
    async fn update_missing_order_is_not_found() {
        let store = InMemoryOrderStore::new();
        let err = store
            .update_order_status(
                OrderId::new(),
                Status::Paid,
                NewEvent::new("order.paid", serde_json::json!({})),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
        assert!(store.events().await.is_empty());
    }

    #[tokio::test]
    async fn list_pages_in_created_at_id_order() {
        let store = InMemoryOrderStore::new();
        for _ in 0..5 {
            store
                .create_order(&order(), NewEvent::new("order.created", serde_json::json!({})))
                .await
                .unwrap();
        }

        let first = store
            .list_orders(PageRequest::new(Some(2), None).unwrap())
            .await
            .unwrap();
        assert_eq!(first.orders.len(), 2);
        assert!(!first.next.is_empty());

        let mut seen: Vec<OrderId> = first.orders.iter().map(|o| o.id).collect();
        let mut next = first.next;
        while !next.is_empty() {
            let page = store
                .list_orders(PageRequest::new(Some(2), Some(&next)).unwrap())
                .await
                .unwrap();
            seen.extend(page.orders.iter().map(|o| o.id));
            next = page.next;
        }
        assert_eq!(seen.len(), 5);
        seen.dedup();
        assert_eq!(seen.len(), 5, "no order may appear twice");
    }
}
