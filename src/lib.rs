//! # edgequake-docsum
//!
//! Summarize uploaded PDF documents with a durable three-step workflow.
//!
//! ## Why a workflow engine?
//!
//! Every step is a remote call (OCR, LLM, storage) that can fail or time out,
//! and a worker can be restarted at any moment. Recording each step's output
//! before the next one is dispatched means a transient failure costs one
//! retry, and a restart costs nothing: completed steps are replayed from the
//! instance record, never repeated.
//!
//! ## Pipeline Overview
//!
//! ```text
//! upload (input/<name>)
//!  │
//!  ├─ Trigger   one `process_document` instance per new input
//!  ├─ 1. analyze    read the PDF, extract text with the layout model
//!  ├─ 2. summarize  "Can you explain what the following text is about?"
//!  ├─ 3. persist    write output/<name>-<timestamp>.txt (dots → dashes)
//!  └─ Completed     result = the output object name
//! ```
//!
//! Each step runs under its own [`RetryPolicy`] (default: 3 attempts, 5 s
//! apart). A step that exhausts its attempts fails the instance; later steps
//! never run and other instances are unaffected.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_docsum::{Worker, WorkerConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // BLOB_STORAGE_ENDPOINT, COGNITIVE_SERVICES_ENDPOINT, AZURE_OPENAI_* …
//!     let config = WorkerConfig::from_env()?;
//!     let worker = Worker::from_config(&config).await?;
//!     worker
//!         .run(Duration::from_secs(10), async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docsum` worker binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when embedding the engine as a library:
//! ```toml
//! edgequake-docsum = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod clients;
pub mod config;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod trigger;
pub mod worker;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use clients::{AnalyzedPage, DocumentAnalyzer, ObjectStore, Summarizer, SummaryRequest};
pub use config::{SummarizerConfig, WorkerConfig, WorkerConfigBuilder};
pub use engine::{
    Engine, EngineBuilder, FailureRecord, InstanceRecord, InstanceStatus, InstanceStore,
    JsonFileStore, MemoryStore, RetryPolicy, StepRecord, Workflow,
};
pub use error::{ClientError, DocsumError, StepError, StepFailure};
pub use pipeline::{PersistRequest, ProcessDocument, StepPolicies, Summary, PROCESS_DOCUMENT};
pub use progress::{NoopObserver, Observer, WorkflowObserver};
pub use trigger::{source_identifier, Trigger};
pub use worker::{Clients, Worker};
