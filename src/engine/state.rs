//! Durable per-instance state.
//!
//! An [`InstanceRecord`] is everything the engine needs to resume a workflow
//! after a restart: the immutable input, the outputs of every completed step
//! (in order), and where the state machine currently stands. The transition
//! methods are the only way the engine mutates a record, so the
//! `Created → Running(k) → Completed | Failed` machine is enforced in one
//! place.

use crate::engine::retry::RetryPolicy;
use crate::error::{DocsumError, StepFailure};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Where an instance stands in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum InstanceStatus {
    /// Registered, no step dispatched yet.
    Created,
    /// Step `step` (1-indexed) is being attempted, or has just been recorded.
    Running { step: usize },
    /// Every step finished; `InstanceRecord::output` holds the result.
    Completed,
    /// A step exhausted its retries or the instance was cancelled.
    Failed,
}

impl InstanceStatus {
    /// `Completed` and `Failed` never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, InstanceStatus::Completed | InstanceStatus::Failed)
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceStatus::Created => write!(f, "Created"),
            InstanceStatus::Running { step } => write!(f, "Running(step={step})"),
            InstanceStatus::Completed => write!(f, "Completed"),
            InstanceStatus::Failed => write!(f, "Failed"),
        }
    }
}

/// The recorded output of one completed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    pub output: Value,
    /// Attempts used, including the successful one.
    pub attempts: u32,
    pub completed_at: DateTime<Utc>,
}

/// Why an instance ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Step that failed, or `None` when the failure happened between steps
    /// (e.g. corrupt history).
    pub step: Option<String>,
    pub attempts: u32,
    pub error: String,
    pub cancelled: bool,
}

impl FailureRecord {
    pub fn from_step(step: &str, failure: &StepFailure) -> Self {
        Self {
            step: Some(step.to_string()),
            attempts: failure.attempts(),
            error: failure.to_string(),
            cancelled: failure.is_cancelled(),
        }
    }

    pub fn cancelled_between_steps() -> Self {
        Self {
            step: None,
            attempts: 0,
            error: "cancelled".to_string(),
            cancelled: true,
        }
    }
}

/// One workflow instance as persisted by an [`crate::engine::InstanceStore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub id: Uuid,
    pub workflow: String,
    pub input: String,
    pub status: InstanceStatus,
    /// Outputs of completed steps, in execution order.
    pub steps: Vec<StepRecord>,
    pub output: Option<Value>,
    pub failure: Option<FailureRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InstanceRecord {
    pub fn new(workflow: impl Into<String>, input: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            workflow: workflow.into(),
            input: input.into(),
            status: InstanceStatus::Created,
            steps: Vec::new(),
            output: None,
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Enter `Running(step)`. `step` must be the one right after the last
    /// recorded step, which rules out skipping and repeating.
    pub fn begin_step(&mut self, step: usize) -> Result<(), DocsumError> {
        let expected = self.steps.len() + 1;
        if self.status.is_terminal() || step != expected {
            return Err(self.illegal(InstanceStatus::Running { step }));
        }
        self.status = InstanceStatus::Running { step };
        self.touch();
        Ok(())
    }

    /// Record the output of the step currently running.
    pub fn record_step(
        &mut self,
        name: impl Into<String>,
        output: Value,
        attempts: u32,
    ) -> Result<(), DocsumError> {
        match self.status {
            InstanceStatus::Running { step } if step == self.steps.len() + 1 => {
                self.steps.push(StepRecord {
                    name: name.into(),
                    output,
                    attempts,
                    completed_at: Utc::now(),
                });
                self.touch();
                Ok(())
            }
            _ => Err(DocsumError::InvalidTransition {
                id: self.id,
                from: self.status.to_string(),
                to: format!("record step {}", self.steps.len() + 1),
            }),
        }
    }

    pub fn complete(&mut self, output: Value) -> Result<(), DocsumError> {
        if self.status.is_terminal() {
            return Err(self.illegal(InstanceStatus::Completed));
        }
        self.status = InstanceStatus::Completed;
        self.output = Some(output);
        self.touch();
        Ok(())
    }

    pub fn fail(&mut self, failure: FailureRecord) -> Result<(), DocsumError> {
        if self.status.is_terminal() {
            return Err(self.illegal(InstanceStatus::Failed));
        }
        self.status = InstanceStatus::Failed;
        self.failure = Some(failure);
        self.touch();
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    fn illegal(&self, to: InstanceStatus) -> DocsumError {
        DocsumError::InvalidTransition {
            id: self.id,
            from: self.status.to_string(),
            to: to.to_string(),
        }
    }
}

/// One attempt to execute a named step, handed to observers.
#[derive(Debug, Clone, Copy)]
pub struct StepInvocation<'a> {
    pub instance: Uuid,
    pub step: &'a str,
    /// 1-indexed attempt number.
    pub attempt: u32,
    pub input: &'a Value,
    pub policy: &'a RetryPolicy,
}
