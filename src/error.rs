//! Error types for the edgequake-docsum library.
//!
//! Three layers of failure, each with its own type:
//!
//! * [`ClientError`] — a collaborator (storage, analysis, summarization)
//!   refused or failed a call. Returned by the traits in [`crate::clients`].
//!
//! * [`StepError`] — **Transient**: a step adapter failed. The engine feeds
//!   it to the step's retry policy. It is serialisable so the last one can be
//!   kept in the instance's failure record.
//!
//! * [`DocsumError`] — **Fatal** for the caller: bad configuration, unknown
//!   workflow or instance, store I/O, illegal state transitions. Returned as
//!   `Err(DocsumError)` from the engine and worker entry points.
//!
//! [`StepFailure`] sits between the last two: it is what the retry loop
//! returns once a step can no longer succeed. It ends the *instance*, never
//! the engine.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// All fatal errors returned by the edgequake-docsum library.
#[derive(Debug, Error)]
pub enum DocsumError {
    // ── Config errors ─────────────────────────────────────────────────────
    /// A required configuration value is absent.
    #[error("Missing required configuration '{key}'\n{hint}")]
    MissingConfig { key: &'static str, hint: String },

    /// A configuration value is present but unusable.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The requested LLM provider could not be instantiated.
    #[error("LLM provider '{provider}' is not configured\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Engine errors ─────────────────────────────────────────────────────
    /// `start` was called with a workflow name nobody registered.
    #[error("Unknown workflow '{name}'")]
    UnknownWorkflow { name: String },

    /// No record exists for the instance id.
    #[error("Workflow instance {id} not found")]
    InstanceNotFound { id: Uuid },

    /// The instance state machine refused a transition.
    #[error("Instance {id}: illegal transition from {from} to {to}")]
    InvalidTransition { id: Uuid, from: String, to: String },

    /// Recorded step outputs do not describe a valid prefix of the workflow.
    #[error("Instance {id}: recorded history is invalid: {detail}")]
    InvalidHistory { id: Uuid, detail: String },

    // ── Store errors ──────────────────────────────────────────────────────
    /// Reading or writing the instance store failed.
    #[error("Instance store I/O failed at '{path}': {source}")]
    StoreIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An instance record on disk could not be decoded.
    #[error("Instance record '{path}' is corrupt: {detail}")]
    CorruptRecord { path: PathBuf, detail: String },

    // ── Trigger errors ────────────────────────────────────────────────────
    /// Listing the watched container failed.
    #[error("Listing container '{container}' failed: {source}")]
    Listing {
        container: String,
        #[source]
        source: ClientError,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure reported by an external collaborator.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// The service answered with a non-success HTTP status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The request never produced a response (DNS, TLS, reset, timeout).
    #[error("transport error: {0}")]
    Transport(String),

    /// The named object does not exist.
    #[error("object '{container}/{name}' not found")]
    NotFound { container: String, name: String },

    /// The object name would escape its container.
    #[error("invalid object name '{0}'")]
    InvalidName(String),

    /// The response body was not what the API documents.
    #[error("unexpected response: {0}")]
    Decode(String),

    /// The service accepted the request but reported a failure.
    #[error("service reported failure: {0}")]
    Service(String),

    /// A long-running operation did not finish in time.
    #[error("operation did not complete after {polls} polls")]
    Timeout { polls: u32 },

    /// Local I/O failed (file-backed storage).
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        ClientError::Transport(e.to_string())
    }
}

/// A single failed attempt of a step.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum StepError {
    /// Fetching the source document failed.
    #[error("reading '{container}/{name}' failed: {detail}")]
    StorageRead {
        container: String,
        name: String,
        detail: String,
    },

    /// Writing the summary failed.
    #[error("writing '{container}/{name}' failed: {detail}")]
    StorageWrite {
        container: String,
        name: String,
        detail: String,
    },

    /// The layout-analysis call failed.
    #[error("document analysis failed: {detail}")]
    Analysis { detail: String },

    /// The summarization service answered with a non-success status.
    #[error("summarization call failed: HTTP {status} - {body}")]
    SummarizeStatus { status: u16, body: String },

    /// The summarization call failed without a status.
    #[error("summarization failed: {detail}")]
    Summarize { detail: String },

    /// The step input could not be decoded into the step's payload type.
    #[error("step '{step}' received an invalid payload: {detail}")]
    Payload { step: String, detail: String },

    /// The workflow has no step by this name.
    #[error("no step named '{step}'")]
    UnknownStep { step: String },

    /// The instance was cancelled while the attempt was in flight.
    #[error("cancelled")]
    Cancelled,
}

/// Terminal outcome of a step whose attempts are used up.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepFailure {
    /// Every attempt allowed by the retry policy failed.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetryExhausted { attempts: u32, last: StepError },

    /// Cancellation arrived before an attempt succeeded.
    #[error("cancelled during attempt {attempts}")]
    Cancelled { attempts: u32 },
}

impl StepFailure {
    /// Number of attempts that were started before the step gave up.
    pub fn attempts(&self) -> u32 {
        match self {
            StepFailure::RetryExhausted { attempts, .. } | StepFailure::Cancelled { attempts } => {
                *attempts
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, StepFailure::Cancelled { .. })
    }
}
