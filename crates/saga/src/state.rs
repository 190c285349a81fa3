//! Saga and step state machines.

use serde::{Deserialize, Serialize};

use crate::error::SagaError;

/// Lifecycle state of a saga.
///
/// State transitions:
/// ```text
/// pending ──► completed                    (every step done)
/// pending ──► compensating ──► failed      (a step failed)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SagaState {
    /// Steps are still being executed.
    #[default]
    Pending,

    /// A step failed and completed steps are being unwound.
    Compensating,

    /// All steps completed successfully (terminal state).
    Completed,

    /// Compensation finished after a failure (terminal state).
    Failed,
}

impl SagaState {
    /// Returns the state name as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaState::Pending => "pending",
            SagaState::Compensating => "compensating",
            SagaState::Completed => "completed",
            SagaState::Failed => "failed",
        }
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaState::Completed | SagaState::Failed)
    }
}

impl std::fmt::Display for SagaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SagaState {
    type Err = SagaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SagaState::Pending),
            "compensating" => Ok(SagaState::Compensating),
            "completed" => Ok(SagaState::Completed),
            "failed" => Ok(SagaState::Failed),
            other => Err(SagaError::Decode(format!("unknown saga state {other:?}"))),
        }
    }
}

/// Execution status of a single step.
///
/// `started` marks the step as owned by exactly one worker, both for the
/// forward action and while its compensation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    #[default]
    Pending,
    Started,
    Done,
    Failed,
    Compensated,
}

impl StepStatus {
    /// Returns the status name as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Started => "started",
            StepStatus::Done => "done",
            StepStatus::Failed => "failed",
            StepStatus::Compensated => "compensated",
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for StepStatus {
    type Err = SagaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(StepStatus::Pending),
            "started" => Ok(StepStatus::Started),
            "done" => Ok(StepStatus::Done),
            "failed" => Ok(StepStatus::Failed),
            "compensated" => Ok(StepStatus::Compensated),
            other => Err(SagaError::Decode(format!("unknown step status {other:?}"))),
        }
    }
}
