//! Observer trait for per-instance workflow events.
//!
//! Inject an [`Arc<dyn WorkflowObserver>`] via
//! [`crate::engine::EngineBuilder::observer`] to receive events as instances
//! move through their steps.
//!
//! # Why callbacks instead of channels?
//!
//! The callback approach is the least-invasive integration point: hosts can
//! forward events to metrics, a status page or a test counter without the
//! engine knowing how they communicate. The trait is `Send + Sync` because
//! every instance runs on its own tokio task and events from different
//! instances arrive concurrently.
//!
//! # Example
//!
//! ```rust
//! use edgequake_docsum::progress::WorkflowObserver;
//! use edgequake_docsum::engine::FailureRecord;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use uuid::Uuid;
//!
//! #[derive(Default)]
//! struct FailureCounter {
//!     failed: AtomicUsize,
//! }
//!
//! impl WorkflowObserver for FailureCounter {
//!     fn on_instance_failed(&self, id: Uuid, failure: &FailureRecord) {
//!         self.failed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{id} failed: {}", failure.error);
//!     }
//! }
//! ```

use crate::engine::state::{FailureRecord, StepInvocation};
use crate::error::StepError;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Called by the engine as it drives each instance.
///
/// All methods have default no-op implementations so implementors only
/// override what they care about.
///
/// # Thread safety
///
/// Events for different instances may be delivered concurrently from
/// different worker threads. Events for one instance are always sequential.
pub trait WorkflowObserver: Send + Sync {
    /// Called when an instance is scheduled, both on `start` and on recovery.
    fn on_instance_start(&self, id: Uuid, workflow: &str, input: &str) {
        let _ = (id, workflow, input);
    }

    /// Called before every attempt of a step.
    fn on_step_start(&self, invocation: &StepInvocation<'_>) {
        let _ = invocation;
    }

    /// Called after a failed attempt that will be retried.
    fn on_step_retry(&self, invocation: &StepInvocation<'_>, error: &StepError, delay: Duration) {
        let _ = (invocation, error, delay);
    }

    /// Called once a step's output has been durably recorded.
    fn on_step_complete(&self, id: Uuid, step: &str, attempts: u32) {
        let _ = (id, step, attempts);
    }

    /// Called when an instance reaches `Completed`.
    fn on_instance_complete(&self, id: Uuid, output: &Value) {
        let _ = (id, output);
    }

    /// Called when an instance reaches `Failed`.
    fn on_instance_failed(&self, id: Uuid, failure: &FailureRecord) {
        let _ = (id, failure);
    }
}

/// A no-op implementation; the default when no observer is configured.
pub struct NoopObserver;

impl WorkflowObserver for NoopObserver {}

/// Convenience alias matching the type stored in [`crate::engine::Engine`].
pub type Observer = Arc<dyn WorkflowObserver>;
