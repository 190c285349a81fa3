//! Relay integration tests against PostgreSQL.
//!
//! These tests run serially with a single shared PostgreSQL container.
//! The container is automatically cleaned up when the test process exits.
//!
//! Run with:
//!
//! ```bash
//! cargo test -p outbox --test relay_integration
//! ```

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use common::CustomerId;
use domain::{Item, Order};
use order_store::{Db, NewEvent, OrderStore, PostgresOrderStore};
use outbox::{MockPublisher, Relay};
use serial_test::serial;
use sqlx::{PgPool, Row};
use testcontainers::{ContainerAsync, ImageExt, core::IntoContainerPort, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use uuid::Uuid;

/// Container and connection string - initialized once, lives for entire test run
struct TestContainer {
    #[allow(dead_code)] // Container must stay alive for connection to work
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static TEST_CONTAINER: OnceCell<Arc<TestContainer>> = OnceCell::const_new();
static CONTAINER_ID: OnceLock<String> = OnceLock::new();

#[ctor::dtor]
fn cleanup_container() {
    if let Some(container_id) = CONTAINER_ID.get() {
        let _ = std::process::Command::new("docker")
            .args(["rm", "-f", container_id])
            .output();
    }
}

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

async fn get_test_pool() -> PgPool {
    let container = get_container().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&container.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE orders, outbox")
        .execute(&pool)
        .await
        .unwrap();

    pool
}

fn relay(pool: PgPool, publisher: MockPublisher, batch: i64) -> Relay<MockPublisher> {
    Relay::new(pool, publisher, Duration::from_millis(10), batch)
}

async fn seed_order(pool: &PgPool) -> Order {
    let order = Order::new(
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
    .unwrap();

    let store = PostgresOrderStore::new(Db::from_pool(pool.clone()));
    store
        .create_order(
            &order,
            NewEvent::new("order.created", serde_json::to_value(&order).unwrap()),
        )
        .await
        .unwrap();

    order
}

/// Seconds until the single outbox row becomes available again.
async fn seconds_until_available(pool: &PgPool) -> f64 {
    sqlx::query_scalar("SELECT EXTRACT(EPOCH FROM (available_at - now()))::float8 FROM outbox")
        .fetch_one(pool)
        .await
        .unwrap()
}

async fn make_available_now(pool: &PgPool) {
    sqlx::query("UPDATE outbox SET available_at = now()")
        .execute(pool)
        .await
        .unwrap();
}

#[tokio::test]
#[serial]
async fn one_tick_publishes_a_committed_event() {
    let pool = get_test_pool().await;
    let order = seed_order(&pool).await;

    let publisher = MockPublisher::new();
    relay(pool.clone(), publisher.clone(), 200)
        .drain()
        .await
        .unwrap();

    let published = publisher.published().await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].key, order.id.to_string());

    let envelope: serde_json::Value = serde_json::from_slice(&published[0].value).unwrap();
    assert_eq!(envelope["type"], "order.created");
    assert_eq!(envelope["aggregate_type"], "order");
    assert_eq!(envelope["aggregate_id"], order.id.to_string());
    assert_eq!(envelope["payload"]["total_amount"], 425);

    let published_at: Option<chrono::DateTime<chrono::Utc>> =
        sqlx::query_scalar("SELECT published_at FROM outbox")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert!(published_at.is_some());
}

#[tokio::test]
#[serial]
async fn published_rows_are_never_delivered_again() {
    let pool = get_test_pool().await;
    seed_order(&pool).await;

    let publisher = MockPublisher::new();
    let relay = relay(pool.clone(), publisher.clone(), 200);
    relay.drain().await.unwrap();
    relay.drain().await.unwrap();
    relay.drain().await.unwrap();

    assert_eq!(publisher.published_count().await, 1);
}

#[tokio::test]
#[serial]
async fn empty_outbox_tick_is_a_noop() {
    let pool = get_test_pool().await;
    let publisher = MockPublisher::new();
    relay(pool.clone(), publisher.clone(), 200)
        .drain()
        .await
        .unwrap();
    assert_eq!(publisher.published_count().await, 0);
}

#[tokio::test]
#[serial]
async fn failed_publishes_back_off_exponentially_then_succeed() {
    let pool = get_test_pool().await;
    seed_order(&pool).await;

    let publisher = MockPublisher::new();
    publisher.fail_next(3).await;
    let relay = relay(pool.clone(), publisher.clone(), 200);

    for (attempt, expected_delay) in [(1_i32, 2.0_f64), (2, 4.0), (3, 8.0)] {
        relay.drain().await.unwrap();

        let row = sqlx::query("SELECT fail_count, last_error, published_at FROM outbox")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(row.get::<i32, _>("fail_count"), attempt);
        assert_eq!(
            row.get::<Option<String>, _>("last_error").as_deref(),
            Some("scripted publish failure")
        );
        assert!(
            row.get::<Option<chrono::DateTime<chrono::Utc>>, _>("published_at")
                .is_none()
        );

        let delay = seconds_until_available(&pool).await;
        assert!(
            delay > expected_delay - 2.0 && delay <= expected_delay,
            "after failure {attempt} the row should be delayed ~{expected_delay}s, got {delay}"
        );

        make_available_now(&pool).await;
    }

    // Fourth attempt succeeds; the failure counters stay as evidence.
    relay.drain().await.unwrap();
    let row = sqlx::query("SELECT fail_count, published_at FROM outbox")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(row.get::<i32, _>("fail_count"), 3);
    assert!(
        row.get::<Option<chrono::DateTime<chrono::Utc>>, _>("published_at")
            .is_some()
    );
    assert_eq!(publisher.published_count().await, 1);
}

#[tokio::test]
#[serial]
async fn backed_off_rows_are_skipped_until_available() {
    let pool = get_test_pool().await;
    seed_order(&pool).await;

    let publisher = MockPublisher::new();
    publisher.fail_next(1).await;
    let relay = relay(pool.clone(), publisher.clone(), 200);

    relay.drain().await.unwrap();
    relay.drain().await.unwrap();

    // The second tick ran before the backoff elapsed, so nothing was retried.
    assert_eq!(publisher.published_count().await, 0);
    let fail_count: i32 = sqlx::query_scalar("SELECT fail_count FROM outbox")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(fail_count, 1);
}

#[tokio::test]
#[serial]
async fn a_failing_row_does_not_abort_the_batch() {
    let pool = get_test_pool().await;
    seed_order(&pool).await;
    seed_order(&pool).await;

    let publisher = MockPublisher::new();
    publisher.fail_next(1).await;
    relay(pool.clone(), publisher.clone(), 200)
        .drain()
        .await
        .unwrap();

    // First row failed, second still went out in the same tick.
    assert_eq!(publisher.published_count().await, 1);
    let unpublished: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM outbox WHERE published_at IS NULL")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(unpublished, 1);
}

#[tokio::test]
#[serial]
async fn two_relays_deliver_five_hundred_rows_exactly_once() {
    let pool = get_test_pool().await;

    // Bare outbox rows are enough here; the relay never joins on orders.
    for _ in 0..500 {
        sqlx::query(
            "INSERT INTO outbox (aggregate_id, aggregate_type, event_type, payload) \
             VALUES ($1, 'order', 'order.created', '{}'::jsonb)",
        )
        .bind(Uuid::new_v4())
        .execute(&pool)
        .await
        .unwrap();
    }

    let publisher = MockPublisher::new();
    let relay_a = relay(pool.clone(), publisher.clone(), 50);
    let relay_b = relay(pool.clone(), publisher.clone(), 50);

    for _ in 0..20 {
        let (a, b) = tokio::join!(relay_a.drain(), relay_b.drain());
        a.unwrap();
        b.unwrap();

        let unpublished: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM outbox WHERE published_at IS NULL")
                .fetch_one(&pool)
                .await
                .unwrap();
        if unpublished == 0 {
            break;
        }
    }

    let unpublished: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM outbox WHERE published_at IS NULL")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(unpublished, 0, "every row must be published");

    let published = publisher.published().await;
    assert_eq!(published.len(), 500, "no row may be published twice");

    let mut keys: Vec<String> = published.into_iter().map(|m| m.key).collect();
    keys.sort();
    keys.dedup();
    assert_eq!(keys.len(), 500, "each aggregate published exactly once");
}

#[tokio::test]
#[serial]
async fn per_aggregate_order_follows_outbox_ids() {
    let pool = get_test_pool().await;

    let aggregate = Uuid::new_v4();
    for event_type in ["order.created", "order.paid", "order.shipped"] {
        sqlx::query(
            "INSERT INTO outbox (aggregate_id, aggregate_type, event_type, payload) \
             VALUES ($1, 'order', $2, '{}'::jsonb)",
        )
        .bind(aggregate)
        .bind(event_type)
        .execute(&pool)
        .await
        .unwrap();
    }

    let publisher = MockPublisher::new();
    relay(pool.clone(), publisher.clone(), 200)
        .drain()
        .await
        .unwrap();

    let types: Vec<String> = publisher
        .published()
        .await
        .iter()
        .map(|m| {
            let envelope: serde_json::Value = serde_json::from_slice(&m.value).unwrap();
            envelope["type"].as_str().unwrap().to_string()
        })
        .collect();
    assert_eq!(types, vec!["order.created", "order.paid", "order.shipped"]);
}
