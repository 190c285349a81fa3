//! PostgreSQL integration tests
//!
//! These tests run serially with a single shared PostgreSQL container.
//! The container is automatically cleaned up when the test process exits.
//!
//! Run with:
//!
//! ```bash
//! cargo test -p order-store --test postgres_integration
//! ```

use std::sync::{Arc, OnceLock};

use common::{CustomerId, OrderId};
use domain::{Item, Order, Status};
use order_store::{
    Db, IdempotencyStore, NewEvent, OrderStore, PageRequest, PostgresIdempotencyStore,
    PostgresOrderStore, StoreError,
};
use serial_test::serial;
use sqlx::{PgPool, Row};
use testcontainers::{ContainerAsync, ImageExt, core::IntoContainerPort, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Container and connection string - initialized once, lives for entire test run
struct TestContainer {
    #[allow(dead_code)] // Container must stay alive for connection to work
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

/// Global container - OnceCell ensures single async initialization
static TEST_CONTAINER: OnceCell<Arc<TestContainer>> = OnceCell::const_new();

/// Store container ID for cleanup at exit
static CONTAINER_ID: OnceLock<String> = OnceLock::new();

/// Cleanup function that runs when the test process exits
#[ctor::dtor]
fn cleanup_container() {
    if let Some(container_id) = CONTAINER_ID.get() {
        let _ = std::process::Command::new("docker")
            .args(["rm", "-f", container_id])
            .output();
    }
}

/// Get the shared container (async, initializes on first call)
async fn get_container() -> Arc<TestContainer> {
    TEST_CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default()
                .with_tag("16-alpine")
                .start()
                .await
                .expect("Failed to start PostgreSQL container");

            let container_id = container.id().to_string();
            let _ = CONTAINER_ID.set(container_id);

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432.tcp()).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let pool = PgPool::connect(&connection_string).await.unwrap();
            Db::from_pool(pool.clone()).migrate().await.unwrap();
            pool.close().await;

            Arc::new(TestContainer {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh Db with cleared tables
async fn get_test_db() -> Db {
    let container = get_container().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(std::time::Duration::from_secs(10))
        .connect(&container.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE orders, outbox, idempotency_keys, sagas, saga_steps")
        .execute(&pool)
        .await
        .unwrap();

    Db::from_pool(pool)
}

fn sample_order() -> Order {
    Order::new(
        CustomerId::new(),
        "USD",
        vec![
            Item {
                sku: "A".to_string(),
                quantity: 2,
                price_minor: 150,
            },
            Item {
                sku: "B".to_string(),
                quantity: 1,
                price_minor: 125,
            },
        ],
    )
    .unwrap()
}

fn created_event(order: &Order) -> NewEvent {
    NewEvent::new(
        "order.created",
        serde_json::to_value(order).expect("order serializes"),
    )
}

#[tokio::test]
#[serial]
async fn create_order_commits_order_and_outbox_row_together() {
    let db = get_test_db().await;
    let store = PostgresOrderStore::new(db.clone());

    let order = sample_order();
    store
        .create_order(&order, created_event(&order))
        .await
        .unwrap();

    let loaded = store.get_order(order.id).await.unwrap();
    assert_eq!(loaded.id, order.id);
    assert_eq!(loaded.total_amount, 425);
    assert_eq!(loaded.status, Status::Created);
    assert_eq!(loaded.items, order.items);

    let row = sqlx::query(
        "SELECT aggregate_id, aggregate_type, event_type, payload, published_at, fail_count \
         FROM outbox",
    )
    .fetch_one(db.pool())
    .await
    .unwrap();
    assert_eq!(
        row.get::<uuid::Uuid, _>("aggregate_id"),
        order.id.as_uuid()
    );
    assert_eq!(row.get::<String, _>("aggregate_type"), "order");
    assert_eq!(row.get::<String, _>("event_type"), "order.created");
    assert!(row.get::<Option<chrono::DateTime<chrono::Utc>>, _>("published_at").is_none());
    assert_eq!(row.get::<i32, _>("fail_count"), 0);

    let payload: serde_json::Value = row.get("payload");
    assert_eq!(payload["total_amount"], 425);
}

#[tokio::test]
#[serial]
async fn duplicate_order_id_is_a_conflict_and_rolls_back_the_event() {
    let db = get_test_db().await;
    let store = PostgresOrderStore::new(db.clone());

    let order = sample_order();
    store
        .create_order(&order, created_event(&order))
        .await
        .unwrap();
    let err = store
        .create_order(&order, created_event(&order))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));

    let events: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM outbox")
        .fetch_one(db.pool())
        .await
        .unwrap();
    assert_eq!(events, 1, "the failed create must not leave an outbox row");
}

#[tokio::test]
#[serial]
async fn update_status_appends_the_matching_event() {
    let db = get_test_db().await;
    let store = PostgresOrderStore::new(db.clone());

    let order = sample_order();
    store
        .create_order(&order, created_event(&order))
        .await
        .unwrap();

    store
        .update_order_status(
            order.id,
            Status::Paid,
            NewEvent::new(
                "order.paid",
                serde_json::json!({ "id": order.id, "status": "paid" }),
            ),
        )
        .await
        .unwrap();

    let loaded = store.get_order(order.id).await.unwrap();
    assert_eq!(loaded.status, Status::Paid);
    assert!(loaded.updated_at >= loaded.created_at);

    let types: Vec<String> =
        sqlx::query_scalar("SELECT event_type FROM outbox ORDER BY id")
            .fetch_all(db.pool())
            .await
            .unwrap();
    assert_eq!(types, vec!["order.created", "order.paid"]);
}

#[tokio::test]
#[serial]
async fn update_status_of_missing_order_is_not_found() {
    let db = get_test_db().await;
    let store = PostgresOrderStore::new(db);

    let err = store
        .update_order_status(
            OrderId::new(),
            Status::Paid,
            NewEvent::new("order.paid", serde_json::json!({})),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound));
}

#[tokio::test]
#[serial]
async fn get_missing_order_is_not_found() {
    let db = get_test_db().await;
    let store = PostgresOrderStore::new(db);

    assert!(matches!(
        store.get_order(OrderId::new()).await,
        Err(StoreError::NotFound)
    ));
}

#[tokio::test]
#[serial]
async fn list_walks_every_order_exactly_once() {
    let db = get_test_db().await;
    let store = PostgresOrderStore::new(db);

    for _ in 0..7 {
        let order = sample_order();
        store
            .create_order(&order, created_event(&order))
            .await
            .unwrap();
    }

    let mut seen = Vec::new();
    let mut cursor = String::new();
    loop {
        let page = store
            .list_orders(PageRequest::new(Some(3), Some(&cursor)).unwrap())
            .await
            .unwrap();
        seen.extend(page.orders.iter().map(|o| o.id));
        if page.next.is_empty() {
            break;
        }
        cursor = page.next;
    }

    assert_eq!(seen.len(), 7);
    let mut deduped = seen.clone();
    deduped.sort_by_key(OrderId::as_uuid);
    deduped.dedup();
    assert_eq!(deduped.len(), 7, "pagination must not repeat orders");
}

#[tokio::test]
#[serial]
async fn list_orders_by_created_at_then_id() {
    let db = get_test_db().await;
    let store = PostgresOrderStore::new(db);

    for _ in 0..4 {
        let order = sample_order();
        store
            .create_order(&order, created_event(&order))
            .await
            .unwrap();
    }

    let page = store
        .list_orders(PageRequest::new(Some(100), None).unwrap())
        .await
        .unwrap();
    assert!(page.next.is_empty());
    let keys: Vec<_> = page
        .orders
        .iter()
        .map(|o| (o.created_at, o.id.as_uuid()))
        .collect();
    let mut sorted = keys.clone();
    sorted.sort();
    assert_eq!(keys, sorted);
}

#[tokio::test]
#[serial]
async fn idempotency_key_roundtrip() {
    let db = get_test_db().await;
    let store = PostgresIdempotencyStore::new(db);

    let customer = CustomerId::new();
    let order_id = OrderId::new();
    store
        .save("k1", "POST:/api/v1/orders", customer, order_id, 201)
        .await
        .unwrap();

    let hit = store
        .get("k1", "POST:/api/v1/orders")
        .await
        .unwrap()
        .expect("key should be visible");
    assert_eq!(hit.order_id, order_id);
    assert_eq!(hit.status_code, 201);

    assert!(store.get("k1", "PATCH:/api/v1/orders").await.unwrap().is_none());
    assert!(store.get("k2", "POST:/api/v1/orders").await.unwrap().is_none());
}

#[tokio::test]
#[serial]
async fn duplicate_idempotency_save_is_a_silent_noop() {
    let db = get_test_db().await;
    let store = PostgresIdempotencyStore::new(db.clone());

    let first = OrderId::new();
    store
        .save("k1", "r", CustomerId::new(), first, 201)
        .await
        .unwrap();
    store
        .save("k1", "r", CustomerId::new(), OrderId::new(), 200)
        .await
        .unwrap();

    let hit = store.get("k1", "r").await.unwrap().unwrap();
    assert_eq!(hit.order_id, first, "the first write wins");
    assert_eq!(hit.status_code, 201);

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM idempotency_keys")
        .fetch_one(db.pool())
        .await
        .unwrap();
    assert_eq!(rows, 1);
}

#[tokio::test]
#[serial]
async fn expired_idempotency_keys_are_invisible() {
    let db = get_test_db().await;
    let store = PostgresIdempotencyStore::new(db.clone());

    store
        .save("k1", "r", CustomerId::new(), OrderId::new(), 201)
        .await
        .unwrap();
    sqlx::query("UPDATE idempotency_keys SET ttl_at = now() - interval '1 second'")
        .execute(db.pool())
        .await
        .unwrap();

    assert!(store.get("k1", "r").await.unwrap().is_none());
}
