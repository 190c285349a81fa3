//! Poll loop that advances sagas.

use std::time::Duration;

use async_trait::async_trait;
use common::SagaId;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::error::Result;
use crate::state::StepStatus;
use crate::store::{PickedStep, SagaStore};

/// Dispatches saga actions to their handlers.
///
/// Implementations map `(action, payload)` to real collaborators; the manager
/// never inspects action names itself. Tests wire a table-driven fake.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(
        &self,
        saga_id: SagaId,
        action: &str,
        payload: &serde_json::Value,
    ) -> Result<()>;
}

/// Logs the dispatch and succeeds. The production default until real action
/// handlers are wired in.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopExecutor;

#[async_trait]
impl Executor for NoopExecutor {
    async fn execute(
        &self,
        saga_id: SagaId,
        action: &str,
        _payload: &serde_json::Value,
    ) -> Result<()> {
        tracing::info!(saga_id = %saga_id, action, "saga exec");
        Ok(())
    }
}

/// Drives persisted sagas: one step per tick, forward while the saga is
/// pending, unwinding in reverse order once it is compensating.
///
/// Replicas are safe to run concurrently; all coordination happens through
/// the store's skip-locked picks.
pub struct SagaManager<E> {
    store: SagaStore,
    exec: E,
    interval: Duration,
}

impl<E: Executor> SagaManager<E> {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(2);

    pub fn new(store: SagaStore, exec: E, interval: Duration) -> Self {
        Self {
            store,
            exec,
            interval,
        }
    }

    pub fn store(&self) -> &SagaStore {
        &self.store
    }

    /// Polls until the shutdown channel flips to `true`. Tick failures are
    /// logged and the loop continues; cancellation is not an error.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("saga manager stopped");
                        return Ok(());
                    }
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.tick().await {
                        tracing::error!(error = %err, "saga tick failed");
                    }
                }
            }
        }
    }

    /// One poll: a forward step if one is runnable, otherwise one
    /// compensation step. Public so tests can drive the manager without the
    /// timer.
    pub async fn tick(&self) -> Result<()> {
        if let Some(step) = self.store.pick_next_pending().await? {
            return self.run_forward(step).await;
        }
        if let Some(step) = self.store.pick_next_compensation().await? {
            return self.run_compensation(step).await;
        }

        Ok(())
    }

    async fn run_forward(&self, step: PickedStep) -> Result<()> {
        match self.exec.execute(step.saga_id, &step.action, &step.payload).await {
            Ok(()) => {
                metrics::counter!("saga_steps_total", "status" => "done").increment(1);
                self.store
                    .mark_step(step.saga_id, step.step_no, StepStatus::Done, None)
                    .await?;
                self.store.try_complete(step.saga_id).await
            }
            Err(err) => {
                metrics::counter!("saga_steps_total", "status" => "failed").increment(1);
                tracing::warn!(
                    saga_id = %step.saga_id,
                    step = step.step_no,
                    error = %err,
                    "saga step failed"
                );
                self.store
                    .mark_step(
                        step.saga_id,
                        step.step_no,
                        StepStatus::Failed,
                        Some(&err.to_string()),
                    )
                    .await?;
                self.store.begin_compensation(step.saga_id).await?;
                // A failure on the first step leaves nothing to unwind.
                self.store.try_finish_compensation(step.saga_id).await
            }
        }
    }

    async fn run_compensation(&self, step: PickedStep) -> Result<()> {
        // Best-effort, single attempt: the outcome is recorded either way.
        let error = match self.exec.execute(step.saga_id, &step.action, &step.payload).await {
            Ok(()) => None,
            Err(err) => {
                tracing::warn!(
                    saga_id = %step.saga_id,
                    step = step.step_no,
                    error = %err,
                    "compensation failed"
                );
                Some(err.to_string())
            }
        };
        metrics::counter!("saga_steps_total", "status" => "compensated").increment(1);
        self.store
            .mark_step(
                step.saga_id,
                step.step_no,
                StepStatus::Compensated,
                error.as_deref(),
            )
            .await?;
        self.store.try_finish_compensation(step.saga_id).await
    }
}
