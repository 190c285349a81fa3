//! Persisted sagas and steps.

use chrono::{DateTime, Utc};
use common::SagaId;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::{Result, SagaError};
use crate::state::{SagaState, StepStatus};

/// A step definition for [`SagaStore::create`].
#[derive(Debug, Clone)]
pub struct NewStep {
    /// 1-indexed position, strictly increasing within the saga.
    pub step_no: i32,
    pub name: String,
    pub action: String,
    pub compensate: String,
    pub payload: serde_json::Value,
}

/// A step claimed for execution.
///
/// Exactly one worker holds a picked step until it is marked with a terminal
/// substatus; the claim is taken under a row lock and survives as the
/// `started` status.
#[derive(Debug, Clone)]
pub struct PickedStep {
    pub saga_id: SagaId,
    pub step_no: i32,
    pub name: String,
    /// What to dispatch: the forward action for pending steps, the
    /// compensate action when the step was picked for compensation.
    pub action: String,
    pub payload: serde_json::Value,
}

/// A saga row as read back from the store.
#[derive(Debug, Clone)]
pub struct Saga {
    pub id: SagaId,
    pub name: String,
    pub state: SagaState,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Database-backed saga persistence.
#[derive(Clone)]
pub struct SagaStore {
    pool: PgPool,
}

impl SagaStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates a saga in `pending` state together with all of its steps, in
    /// one transaction. Step numbers must be strictly increasing starting
    /// at 1.
    pub async fn create(
        &self,
        name: &str,
        steps: &[NewStep],
        data: serde_json::Value,
    ) -> Result<SagaId> {
        let mut prev = 0;
        for step in steps {
            if (prev == 0 && step.step_no != 1) || step.step_no <= prev {
                return Err(SagaError::InvalidSteps(format!(
                    "step {:?} has number {}, expected a strictly increasing sequence starting at 1",
                    step.name, step.step_no
                )));
            }
            prev = step.step_no;
        }

        let id = SagaId::new();
        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT INTO sagas (id, name, state, data) VALUES ($1, $2, 'pending', $3)")
            .bind(id.as_uuid())
            .bind(name)
            .bind(&data)
            .execute(&mut *tx)
            .await?;
        for step in steps {
            sqlx::query(
                r#"
                INSERT INTO saga_steps (saga_id, step_no, name, status, action, compensate, payload)
                VALUES ($1, $2, $3, 'pending', $4, $5, $6)
                "#,
            )
            .bind(id.as_uuid())
            .bind(step.step_no)
            .bind(&step.name)
            .bind(&step.action)
            .bind(&step.compensate)
            .bind(&step.payload)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(id)
    }

    /// Claims the next runnable forward step, if any: the lowest
    /// `(saga.created_at, step_no)` pending step of a pending saga whose
    /// earlier steps are all done. The row is taken with
    /// `FOR UPDATE SKIP LOCKED`, so competing pollers never claim the same
    /// step, and moved to `started` before the claim commits.
    pub async fn pick_next_pending(&self) -> Result<Option<PickedStep>> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            r#"
            SELECT ss.saga_id, ss.step_no, ss.name, ss.action, ss.payload
            FROM saga_steps ss
            JOIN sagas s ON s.id = ss.saga_id
            WHERE ss.status = 'pending'
              AND s.state = 'pending'
              AND NOT EXISTS (
                  SELECT 1 FROM saga_steps prior
                  WHERE prior.saga_id = ss.saga_id
                    AND prior.step_no < ss.step_no
                    AND prior.status <> 'done'
              )
            ORDER BY s.created_at, ss.step_no
            LIMIT 1
            FOR UPDATE OF ss SKIP LOCKED
            "#,
        )
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.commit().await?;
            return Ok(None);
        };
        let picked = row_to_picked(&row)?;
        sqlx::query(
            "UPDATE saga_steps SET status = 'started', started_at = now() \
             WHERE saga_id = $1 AND step_no = $2",
        )
        .bind(picked.saga_id.as_uuid())
        .bind(picked.step_no)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(Some(picked))
    }

    /// Claims the next compensation candidate: the highest done step of a
    /// compensating saga, so completed work unwinds in reverse order. The
    /// returned action is the step's compensate action.
    pub async fn pick_next_compensation(&self) -> Result<Option<PickedStep>> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            r#"
            SELECT ss.saga_id, ss.step_no, ss.name, ss.compensate AS action, ss.payload
            FROM saga_steps ss
            JOIN sagas s ON s.id = ss.saga_id
            WHERE ss.status = 'done' AND s.state = 'compensating'
            ORDER BY s.created_at, ss.step_no DESC
            LIMIT 1
            FOR UPDATE OF ss SKIP LOCKED
            "#,
        )
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.commit().await?;
            return Ok(None);
        };
        let picked = row_to_picked(&row)?;
        sqlx::query(
            "UPDATE saga_steps SET status = 'started', started_at = now() \
             WHERE saga_id = $1 AND step_no = $2",
        )
        .bind(picked.saga_id.as_uuid())
        .bind(picked.step_no)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(Some(picked))
    }

    /// Marks a claimed step with its terminal substatus and stamps
    /// `finished_at`. Empty error text is stored as NULL.
    pub async fn mark_step(
        &self,
        saga_id: SagaId,
        step_no: i32,
        status: StepStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let error = error.filter(|e| !e.is_empty());
        sqlx::query(
            "UPDATE saga_steps SET status = $3, error = $4, finished_at = now() \
             WHERE saga_id = $1 AND step_no = $2",
        )
        .bind(saga_id.as_uuid())
        .bind(step_no)
        .bind(status.as_str())
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Moves a pending saga into compensation after a step failure.
    pub async fn begin_compensation(&self, saga_id: SagaId) -> Result<()> {
        sqlx::query(
            "UPDATE sagas SET state = 'compensating', updated_at = now() \
             WHERE id = $1 AND state = 'pending'",
        )
        .bind(saga_id.as_uuid())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Completes the saga once no step remains outside done/compensated.
    pub async fn try_complete(&self, saga_id: SagaId) -> Result<()> {
        let open: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM saga_steps \
             WHERE saga_id = $1 AND status NOT IN ('done', 'compensated')",
        )
        .bind(saga_id.as_uuid())
        .fetch_one(&self.pool)
        .await?;
        if open == 0 {
            sqlx::query(
                "UPDATE sagas SET state = 'completed', updated_at = now() \
                 WHERE id = $1 AND state = 'pending'",
            )
            .bind(saga_id.as_uuid())
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }

    /// Fails a compensating saga once nothing is left to unwind.
    pub async fn try_finish_compensation(&self, saga_id: SagaId) -> Result<()> {
        let open: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM saga_steps \
             WHERE saga_id = $1 AND status IN ('done', 'started')",
        )
        .bind(saga_id.as_uuid())
        .fetch_one(&self.pool)
        .await?;
        if open == 0 {
            sqlx::query(
                "UPDATE sagas SET state = 'failed', updated_at = now() \
                 WHERE id = $1 AND state = 'compensating'",
            )
            .bind(saga_id.as_uuid())
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }

    /// Reads a saga back.
    pub async fn get(&self, saga_id: SagaId) -> Result<Option<Saga>> {
        let row = sqlx::query(
            "SELECT id, name, state, data, created_at, updated_at FROM sagas WHERE id = $1",
        )
        .bind(saga_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_saga).transpose()
    }
}

fn row_to_picked(row: &PgRow) -> Result<PickedStep> {
    Ok(PickedStep {
        saga_id: SagaId::from_uuid(row.try_get::<Uuid, _>("saga_id")?),
        step_no: row.try_get("step_no")?,
        name: row.try_get("name")?,
        action: row.try_get("action")?,
        payload: row.try_get("payload")?,
    })
}

fn row_to_saga(row: PgRow) -> Result<Saga> {
    let state: String = row.try_get("state")?;
    Ok(Saga {
        id: SagaId::from_uuid(row.try_get::<Uuid, _>("id")?),
        name: row.try_get("name")?,
        state: state.parse()?,
        data: row.try_get("data")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
