//! The `process_document` workflow.
//!
//! ## Data Flow
//!
//! ```text
//! source id ──▶ analyze ──▶ summarize ──▶ persist ──▶ output name
//!   (String)    (String)     (Summary)   (PersistRequest)  (String)
//! ```
//!
//! 1. [`analyze`]   — read the upload from the input container and extract
//!    its text with the layout model
//! 2. [`summarize`] — wrap the text in the fixed prompt and call the LLM
//! 3. [`persist`]   — write the summary under a dot-free derived name
//!
//! [`ProcessDocument`] ties the three adapters to the engine. Its
//! `next_action` only looks at the recorded outputs, so a resumed instance
//! continues at the first step without one.

pub mod analyze;
pub mod persist;
pub mod summarize;

pub use analyze::AnalyzeStep;
pub use persist::{output_name, Clock, PersistStep};
pub use summarize::SummarizeStep;

use crate::engine::{Action, RetryPolicy, StepCall, StepRecord, Workflow};
use crate::error::StepError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Registered workflow name.
pub const PROCESS_DOCUMENT: &str = "process_document";

pub const ANALYZE: &str = "analyze";
pub const SUMMARIZE: &str = "summarize";
pub const PERSIST: &str = "persist";

/// Step order. Recorded history must be a prefix of this.
pub const STEPS: [&str; 3] = [ANALYZE, SUMMARIZE, PERSIST];

/// Output of the summarize step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub content: String,
}

/// Input of the persist step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistRequest {
    pub source: String,
    pub summary: Summary,
}

/// Retry policy per step.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StepPolicies {
    pub analyze: RetryPolicy,
    pub summarize: RetryPolicy,
    pub persist: RetryPolicy,
}

impl StepPolicies {
    /// The same policy for all three steps.
    pub fn uniform(policy: RetryPolicy) -> Self {
        Self {
            analyze: policy,
            summarize: policy,
            persist: policy,
        }
    }
}

/// analyze → summarize → persist.
pub struct ProcessDocument {
    analyze: AnalyzeStep,
    summarize: SummarizeStep,
    persist: PersistStep,
    policies: StepPolicies,
}

impl ProcessDocument {
    pub fn new(analyze: AnalyzeStep, summarize: SummarizeStep, persist: PersistStep) -> Self {
        Self {
            analyze,
            summarize,
            persist,
            policies: StepPolicies::default(),
        }
    }

    pub fn with_policies(mut self, policies: StepPolicies) -> Self {
        self.policies = policies;
        self
    }
}

fn decode_output<T: DeserializeOwned>(record: &StepRecord) -> Result<T, String> {
    serde_json::from_value(record.output.clone())
        .map_err(|e| format!("output of step '{}' is malformed: {e}", record.name))
}

fn decode_input<T: DeserializeOwned>(step: &str, input: Value) -> Result<T, StepError> {
    serde_json::from_value(input).map_err(|e| StepError::Payload {
        step: step.to_string(),
        detail: e.to_string(),
    })
}

fn encode_output<T: Serialize>(step: &str, output: &T) -> Result<Value, StepError> {
    serde_json::to_value(output).map_err(|e| StepError::Payload {
        step: step.to_string(),
        detail: e.to_string(),
    })
}

#[async_trait]
impl Workflow for ProcessDocument {
    fn name(&self) -> &str {
        PROCESS_DOCUMENT
    }

    fn next_action(&self, input: &str, completed: &[StepRecord]) -> Result<Action, String> {
        if completed.len() > STEPS.len() {
            return Err(format!(
                "{} steps recorded, workflow has {}",
                completed.len(),
                STEPS.len()
            ));
        }
        for (i, (record, expected)) in completed.iter().zip(STEPS).enumerate() {
            if record.name != expected {
                return Err(format!(
                    "step {} is '{}', expected '{}'",
                    i + 1,
                    record.name,
                    expected
                ));
            }
        }

        let call = match completed {
            [] => StepCall {
                name: ANALYZE,
                input: Value::String(input.to_string()),
                policy: self.policies.analyze,
            },
            [analyzed] => {
                let text: String = decode_output(analyzed)?;
                StepCall {
                    name: SUMMARIZE,
                    input: Value::String(text),
                    policy: self.policies.summarize,
                }
            }
            [_, summarized] => {
                let summary: Summary = decode_output(summarized)?;
                let request = PersistRequest {
                    source: input.to_string(),
                    summary,
                };
                StepCall {
                    name: PERSIST,
                    input: serde_json::to_value(&request).map_err(|e| e.to_string())?,
                    policy: self.policies.persist,
                }
            }
            [.., persisted] => {
                let name: String = decode_output(persisted)?;
                return Ok(Action::Complete(Value::String(name)));
            }
        };
        Ok(Action::Call(call))
    }

    async fn invoke(&self, step: &str, input: Value) -> Result<Value, StepError> {
        match step {
            ANALYZE => {
                let source: String = decode_input(step, input)?;
                self.analyze.run(&source).await.map(Value::String)
            }
            SUMMARIZE => {
                let text: String = decode_input(step, input)?;
                let summary = self.summarize.run(&text).await?;
                encode_output(step, &summary)
            }
            PERSIST => {
                let request: PersistRequest = decode_input(step, input)?;
                self.persist.run(&request).await.map(Value::String)
            }
            other => Err(StepError::UnknownStep {
                step: other.to_string(),
            }),
        }
    }
}
