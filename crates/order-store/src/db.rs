//! Connection pool and transaction scope.

use std::time::Duration;

use sqlx::Postgres;
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::error::Result;

/// A transaction handle.
///
/// Commit is explicit; dropping the handle on any other exit path rolls the
/// transaction back, and a rollback after commit is a silent no-op. Opening a
/// nested transaction against the same handle is not supported.
pub type Tx = sqlx::Transaction<'static, Postgres>;

/// Shared PostgreSQL connection pool.
#[derive(Clone)]
pub struct Db {
    pool: PgPool,
}

impl Db {
    /// Connects with the pool limits the service runs with.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .min_connections(2)
            .max_lifetime(Duration::from_secs(30 * 60))
            .connect(url)
            .await?;

        Ok(Self { pool })
    }

    /// Wraps an existing pool, for tests.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Opens a transaction scope. The unit of work runs against the handle
    /// and finishes with [`Tx::commit`]; every `?` exit rolls back.
    pub async fn begin(&self) -> Result<Tx> {
        Ok(self.pool.begin().await?)
    }

    /// Round-trips the connection, for readiness probes.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Applies the SQL migrations shipped with the repository.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}
