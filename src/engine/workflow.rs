//! The contract between the engine and a workflow definition.
//!
//! A workflow is split in two halves so the engine can replay it:
//!
//! * [`Workflow::next_action`] is a **pure** function of the instance input
//!   and the recorded step outputs. Given the same history it always returns
//!   the same answer, which is what lets a restarted engine pick up at the
//!   first unrecorded step without re-running anything.
//! * [`Workflow::invoke`] performs one attempt of one step. It has side
//!   effects, may fail, and is only ever called through the retry loop.

use crate::engine::retry::RetryPolicy;
use crate::engine::state::StepRecord;
use crate::error::StepError;
use async_trait::async_trait;
use serde_json::Value;

/// The next step to dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct StepCall {
    pub name: &'static str,
    pub input: Value,
    pub policy: RetryPolicy,
}

/// What the engine should do next for an instance.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Call(StepCall),
    /// All steps are recorded; this is the instance result.
    Complete(Value),
}

/// A named, fixed sequence of steps.
#[async_trait]
pub trait Workflow: Send + Sync {
    fn name(&self) -> &str;

    /// Decide the next action from the recorded history.
    ///
    /// Returns `Err(detail)` when `completed` is not a valid prefix of this
    /// workflow's step sequence; the engine fails the instance.
    fn next_action(&self, input: &str, completed: &[StepRecord]) -> Result<Action, String>;

    /// Execute one attempt of `step`.
    async fn invoke(&self, step: &str, input: Value) -> Result<Value, StepError>;
}
