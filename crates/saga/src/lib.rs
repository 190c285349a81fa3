//! Persisted sagas: multi-step workflows with compensation on failure.
//!
//! A saga is a sequence of steps, each carrying a forward action and a
//! compensating action. The [`SagaStore`] keeps sagas and steps in the
//! database; the [`SagaManager`] polls for runnable steps, dispatches them
//! through a pluggable [`Executor`], and unwinds completed steps in reverse
//! order when one fails. Competing manager replicas coordinate purely through
//! row locks with skip-locked semantics.

pub mod error;
pub mod manager;
pub mod state;
pub mod store;

pub use error::{Result, SagaError};
pub use manager::{Executor, NoopExecutor, SagaManager};
pub use state::{SagaState, StepStatus};
pub use store::{NewStep, PickedStep, Saga, SagaStore};
