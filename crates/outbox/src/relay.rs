//! Background loop that drains the outbox to the message bus.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::envelope::Envelope;
use crate::error::RelayError;
use crate::publisher::Publisher;

#[derive(Debug, sqlx::FromRow)]
struct OutboxRow {
    id: i64,
    event_type: String,
    aggregate_type: String,
    aggregate_id: uuid::Uuid,
    payload: serde_json::Value,
    created_at: DateTime<Utc>,
}

/// Periodically publishes unpublished outbox rows.
///
/// Safe to run in multiple replicas: candidates are taken with
/// `FOR UPDATE SKIP LOCKED`, so concurrent relays partition the working set
/// without blocking each other, and the `published_at IS NULL` predicate
/// under the row lock guarantees no row is delivered twice by a committed
/// tick. Rows whose publish fails are rescheduled with truncated exponential
/// backoff (ceiling 60 s).
pub struct Relay<P> {
    pool: PgPool,
    publisher: P,
    interval: Duration,
    batch: i64,
}

impl<P: Publisher> Relay<P> {
    pub fn new(pool: PgPool, publisher: P, interval: Duration, batch: i64) -> Self {
        Self {
            pool,
            publisher,
            interval,
            batch,
        }
    }

    /// Runs until the shutdown channel flips to `true`. Tick failures are
    /// logged and the loop continues; cancellation is not an error.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), RelayError> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("outbox relay stopped");
                        return Ok(());
                    }
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.drain().await {
                        tracing::error!(error = %err, "outbox drain failed");
                    }
                }
            }
        }
    }

    /// One relay tick. All row updates of a tick commit atomically; if the
    /// transaction aborts mid-batch the rows stay unpublished and are
    /// re-delivered later (at-least-once).
    pub async fn drain(&self) -> Result<(), RelayError> {
        let oldest: Option<DateTime<Utc>> =
            sqlx::query_scalar("SELECT MIN(created_at) FROM outbox WHERE published_at IS NULL")
                .fetch_one(&self.pool)
                .await?;
        let lag_seconds = oldest
            .map(|t| (Utc::now() - t).num_milliseconds().max(0) as f64 / 1000.0)
            .unwrap_or(0.0);
        metrics::gauge!("outbox_oldest_age_seconds").set(lag_seconds);

        let mut tx = self.pool.begin().await?;
        let rows: Vec<OutboxRow> = sqlx::query_as(
            r#"
            SELECT id, event_type, aggregate_type, aggregate_id, payload, created_at
            FROM outbox
            WHERE published_at IS NULL AND available_at <= now()
            ORDER BY id
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(self.batch)
        .fetch_all(&mut *tx)
        .await?;

        if rows.is_empty() {
            tx.commit().await?;
            return Ok(());
        }

        for row in &rows {
            let aggregate_id = row.aggregate_id.to_string();
            let envelope = Envelope {
                event_type: &row.event_type,
                aggregate_type: &row.aggregate_type,
                aggregate_id: &aggregate_id,
                payload: &row.payload,
                created_at: row.created_at,
            };
            let value = serde_json::to_vec(&envelope)?;

            match self.publisher.publish(&aggregate_id, &value).await {
                Ok(()) => {
                    metrics::counter!("outbox_events_total", "event" => row.event_type.clone())
                        .increment(1);
                    sqlx::query("UPDATE outbox SET published_at = now() WHERE id = $1")
                        .bind(row.id)
                        .execute(&mut *tx)
                        .await?;
                }
                Err(err) => {
                    metrics::counter!("outbox_publish_errors_total").increment(1);
                    tracing::warn!(id = row.id, error = %err, "outbox publish failed");
                    // fail_count on the right-hand side is the pre-increment
                    // value: the delay after the k-th failure is 2^k seconds.
                    sqlx::query(
                        r#"
                        UPDATE outbox
                        SET fail_count = fail_count + 1,
                            last_error = $2,
                            available_at = now() + make_interval(secs => LEAST(60, POW(2, fail_count + 1)))
                        WHERE id = $1
                        "#,
                    )
                    .bind(row.id)
                    .bind(err.to_string())
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }

        tx.commit().await?;
        Ok(())
    }
}
