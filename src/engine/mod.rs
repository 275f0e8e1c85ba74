//! Durable workflow engine.
//!
//! ## Execution model
//!
//! ```text
//! start(workflow, input)
//!   │  save InstanceRecord { status: Created }
//!   └─ tokio::spawn ──▶ drive(id)
//!                         loop:
//!                           next_action(input, recorded steps)   (pure)
//!                           ├─ Complete(out) → save Completed, stop
//!                           └─ Call(step)    → save Running(k)
//!                                              run_with_retry(step)
//!                                              ├─ Ok  → record output, save
//!                                              └─ Err → save Failed, stop
//! ```
//!
//! Every instance runs on its own task; steps within an instance never
//! overlap. Because a step's output is saved before the next step is chosen,
//! [`Engine::recover`] can resume any non-terminal record from the store and
//! replay, not re-execute, the steps that already finished.

pub mod retry;
pub mod state;
pub mod store;
pub mod workflow;

pub use retry::{run_with_retry, RetryPolicy, MAX_RETRY_DELAY};
pub use state::{FailureRecord, InstanceRecord, InstanceStatus, StepInvocation, StepRecord};
pub use store::{InstanceStore, JsonFileStore, MemoryStore};
pub use workflow::{Action, StepCall, Workflow};

use crate::error::DocsumError;
use crate::progress::{NoopObserver, Observer};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Cancellation and completion signals of a scheduled instance.
struct RunHandle {
    cancel: watch::Sender<bool>,
    done: watch::Receiver<bool>,
}

struct EngineInner {
    store: Arc<dyn InstanceStore>,
    workflows: HashMap<String, Arc<dyn Workflow>>,
    observer: Observer,
    running: Mutex<HashMap<Uuid, RunHandle>>,
}

/// Schedules and drives workflow instances. Cheap to clone.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

/// Builder for [`Engine`].
pub struct EngineBuilder {
    store: Arc<dyn InstanceStore>,
    workflows: HashMap<String, Arc<dyn Workflow>>,
    observer: Option<Observer>,
}

impl EngineBuilder {
    /// Register a workflow under [`Workflow::name`]. A later registration with
    /// the same name replaces the earlier one.
    pub fn workflow(mut self, workflow: Arc<dyn Workflow>) -> Self {
        self.workflows.insert(workflow.name().to_string(), workflow);
        self
    }

    pub fn observer(mut self, observer: Observer) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn build(self) -> Engine {
        Engine {
            inner: Arc::new(EngineInner {
                store: self.store,
                workflows: self.workflows,
                observer: self.observer.unwrap_or_else(|| Arc::new(NoopObserver)),
                running: Mutex::new(HashMap::new()),
            }),
        }
    }
}

impl Engine {
    pub fn builder(store: Arc<dyn InstanceStore>) -> EngineBuilder {
        EngineBuilder {
            store,
            workflows: HashMap::new(),
            observer: None,
        }
    }

    pub fn store(&self) -> &Arc<dyn InstanceStore> {
        &self.inner.store
    }

    /// Register a new instance of `workflow` and schedule it.
    ///
    /// Returns as soon as the `Created` record is saved; the steps run on a
    /// background task. Must be called from within a tokio runtime.
    pub async fn start(&self, workflow: &str, input: impl Into<String>) -> Result<Uuid, DocsumError> {
        let wf = self
            .inner
            .workflows
            .get(workflow)
            .cloned()
            .ok_or_else(|| DocsumError::UnknownWorkflow {
                name: workflow.to_string(),
            })?;

        let record = InstanceRecord::new(workflow, input);
        self.inner.store.save(&record).await?;
        info!(
            "Instance {}: started '{}' for '{}'",
            record.id, record.workflow, record.input
        );

        self.schedule(&record, wf).await;
        Ok(record.id)
    }

    /// Re-schedule every non-terminal instance in the store.
    ///
    /// Call at process start, and again whenever instances may have been left
    /// behind by a store error. Instances already running and instances whose
    /// workflow is not registered are left untouched. Returns the ids that were scheduled.
    pub async fn recover(&self) -> Result<Vec<Uuid>, DocsumError> {
        let mut resumed = Vec::new();
        for record in self.inner.store.list().await? {
            if record.status.is_terminal() {
                continue;
            }
            let Some(wf) = self.inner.workflows.get(&record.workflow).cloned() else {
                warn!(
                    "Instance {}: workflow '{}' is not registered, not recovering",
                    record.id, record.workflow
                );
                continue;
            };
            if self.schedule(&record, wf).await {
                info!(
                    "Instance {}: recovering at {} with {} recorded step(s)",
                    record.id,
                    record.status,
                    record.steps.len()
                );
                resumed.push(record.id);
            }
        }
        Ok(resumed)
    }

    /// Current persisted state of an instance.
    pub async fn status(&self, id: Uuid) -> Result<InstanceRecord, DocsumError> {
        self.inner
            .store
            .load(id)
            .await?
            .ok_or(DocsumError::InstanceNotFound { id })
    }

    pub async fn instances(&self) -> Result<Vec<InstanceRecord>, DocsumError> {
        self.inner.store.list().await
    }

    /// Wait until the instance's task finishes, then return its record.
    ///
    /// For an instance that is not scheduled the stored record is returned
    /// as-is (it may be non-terminal if it still awaits [`Engine::recover`]).
    pub async fn wait(&self, id: Uuid) -> Result<InstanceRecord, DocsumError> {
        let done = self
            .inner
            .running
            .lock()
            .await
            .get(&id)
            .map(|h| h.done.clone());
        if let Some(mut done) = done {
            let _ = done.wait_for(|d| *d).await;
        }
        self.status(id).await
    }

    /// Wait until no instance is scheduled.
    pub async fn wait_idle(&self) {
        loop {
            let pending: Vec<watch::Receiver<bool>> = self
                .inner
                .running
                .lock()
                .await
                .values()
                .map(|h| h.done.clone())
                .collect();
            if pending.is_empty() {
                return;
            }
            for mut done in pending {
                let _ = done.wait_for(|d| *d).await;
            }
        }
    }

    /// Best-effort cancellation.
    ///
    /// A scheduled instance is signalled and ends `Failed` as soon as its
    /// current step call or retry delay is interrupted. An unscheduled,
    /// non-terminal instance is marked `Failed` directly. Returns `false` if
    /// the instance had already finished.
    pub async fn cancel(&self, id: Uuid) -> Result<bool, DocsumError> {
        if let Some(handle) = self.inner.running.lock().await.get(&id) {
            info!("Instance {}: cancellation requested", id);
            let _ = handle.cancel.send(true);
            return Ok(true);
        }

        let mut record = self.status(id).await?;
        if record.status.is_terminal() {
            return Ok(false);
        }
        self.finish_failed(&mut record, FailureRecord::cancelled_between_steps())
            .await?;
        Ok(true)
    }

    /// Spawn the driver task. Returns `false` if `record` is already running.
    async fn schedule(&self, record: &InstanceRecord, workflow: Arc<dyn Workflow>) -> bool {
        let id = record.id;
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (done_tx, done_rx) = watch::channel(false);
        {
            let mut running = self.inner.running.lock().await;
            if running.contains_key(&id) {
                debug!("Instance {}: already scheduled", id);
                return false;
            }
            running.insert(
                id,
                RunHandle {
                    cancel: cancel_tx,
                    done: done_rx,
                },
            );
        }

        self.inner
            .observer
            .on_instance_start(id, &record.workflow, &record.input);

        let engine = self.clone();
        tokio::spawn(async move {
            let driver = {
                let engine = engine.clone();
                tokio::spawn(async move { engine.drive(id, workflow, cancel_rx).await })
            };
            match driver.await {
                Ok(Ok(())) => {}
                // Record stays non-terminal; the next `recover` resumes it.
                Ok(Err(e)) => error!("Instance {}: engine error: {}", id, e),
                Err(e) => {
                    let reason = panic_message(e);
                    error!("Instance {}: driver task aborted: {}", id, reason);
                    if let Err(e) = engine.fail_aborted(id, &reason).await {
                        error!("Instance {}: could not record failure: {}", id, e);
                    }
                }
            }
            engine.inner.running.lock().await.remove(&id);
            let _ = done_tx.send(true);
        });
        true
    }

    /// Mark an instance whose driver task died as `Failed`.
    async fn fail_aborted(&self, id: Uuid, reason: &str) -> Result<(), DocsumError> {
        let mut record = self.status(id).await?;
        if record.status.is_terminal() {
            return Ok(());
        }
        let failure = FailureRecord {
            step: None,
            attempts: 0,
            error: format!("driver task aborted at {}: {}", record.status, reason),
            cancelled: false,
        };
        self.finish_failed(&mut record, failure).await
    }

    /// Advance one instance until it is terminal.
    async fn drive(
        &self,
        id: Uuid,
        workflow: Arc<dyn Workflow>,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<(), DocsumError> {
        let store = &self.inner.store;
        let observer = self.inner.observer.as_ref();
        let mut record = store
            .load(id)
            .await?
            .ok_or(DocsumError::InstanceNotFound { id })?;

        loop {
            if record.status.is_terminal() {
                return Ok(());
            }
            if *cancel.borrow() {
                return self
                    .finish_failed(&mut record, FailureRecord::cancelled_between_steps())
                    .await;
            }

            let action = match workflow.next_action(&record.input, &record.steps) {
                Ok(action) => action,
                Err(detail) => {
                    let err = DocsumError::InvalidHistory { id, detail };
                    let failure = FailureRecord {
                        step: None,
                        attempts: 0,
                        error: err.to_string(),
                        cancelled: false,
                    };
                    return self.finish_failed(&mut record, failure).await;
                }
            };

            let call = match action {
                Action::Complete(output) => {
                    record.complete(output)?;
                    store.save(&record).await?;
                    info!("Instance {}: completed", id);
                    if let Some(ref output) = record.output {
                        observer.on_instance_complete(id, output);
                    }
                    return Ok(());
                }
                Action::Call(call) => call,
            };

            let step_index = record.steps.len() + 1;
            if record.status != (InstanceStatus::Running { step: step_index }) {
                record.begin_step(step_index)?;
                store.save(&record).await?;
            }
            info!("Instance {}: step {} '{}'", id, step_index, call.name);

            let name = call.name;
            let wf: &dyn Workflow = workflow.as_ref();
            let outcome = run_with_retry(
                id,
                name,
                &call.input,
                &call.policy,
                &mut cancel,
                observer,
                move |input| wf.invoke(name, input),
            )
            .await;

            match outcome {
                Ok((output, attempts)) => {
                    record.record_step(name, output, attempts)?;
                    store.save(&record).await?;
                    debug!(
                        "Instance {}: step '{}' recorded after {} attempt(s)",
                        id, name, attempts
                    );
                    observer.on_step_complete(id, name, attempts);
                }
                Err(failure) => {
                    let failure = FailureRecord::from_step(name, &failure);
                    return self.finish_failed(&mut record, failure).await;
                }
            }
        }
    }

    async fn finish_failed(
        &self,
        record: &mut InstanceRecord,
        failure: FailureRecord,
    ) -> Result<(), DocsumError> {
        error!(
            "Instance {}: failed at step {}: {}",
            record.id,
            failure.step.as_deref().unwrap_or("-"),
            failure.error
        );
        record.fail(failure)?;
        self.inner.store.save(record).await?;
        if let Some(ref failure) = record.failure {
            self.inner.observer.on_instance_failed(record.id, failure);
        }
        Ok(())
    }
}

fn panic_message(err: tokio::task::JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}
