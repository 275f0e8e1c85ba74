//! Process assembly: configuration → clients → engine → trigger.
//!
//! ## Why a separate worker type?
//!
//! The engine and trigger are plain library values that tests build around
//! in-process fakes. [`Worker`] is the one place that knows how to turn a
//! [`WorkerConfig`] into real HTTP clients and a JSON state directory, and
//! how to keep polling until the host asks it to stop. The `docsum` binary is
//! a thin shim over it.

use crate::clients::analysis::LayoutAnalysisClient;
use crate::clients::summarizer::{AzureChatClient, ProviderSummarizer};
use crate::clients::{http_client, storage, DocumentAnalyzer, ObjectStore, Summarizer};
use crate::config::{SummarizerConfig, WorkerConfig};
use crate::engine::{Engine, InstanceStore, JsonFileStore};
use crate::error::DocsumError;
use crate::pipeline::{AnalyzeStep, PersistStep, ProcessDocument, StepPolicies, SummarizeStep};
use crate::progress::Observer;
use crate::trigger::Trigger;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// The three collaborators the pipeline talks to.
#[derive(Clone)]
pub struct Clients {
    pub storage: Arc<dyn ObjectStore>,
    pub analyzer: Arc<dyn DocumentAnalyzer>,
    pub summarizer: Arc<dyn Summarizer>,
}

impl Clients {
    /// Build the real clients, sharing one HTTP client between them.
    pub fn from_config(config: &WorkerConfig) -> Result<Self, DocsumError> {
        let http = http_client(config.http_timeout)?;
        let storage = storage::connect(&config.storage_endpoint, http.clone())?;
        let analyzer: Arc<dyn DocumentAnalyzer> = Arc::new(LayoutAnalysisClient::new(
            http.clone(),
            config.analysis_endpoint.clone(),
            config.analysis_key.clone(),
        ));
        let summarizer = resolve_summarizer(&config.summarizer, http)?;
        Ok(Self {
            storage,
            analyzer,
            summarizer,
        })
    }
}

/// Instantiate the configured summarization backend.
///
/// 1. **Named provider** (`DOCSUM_LLM_PROVIDER` + `DOCSUM_LLM_MODEL`): built by
///    `edgequake-llm`, which reads that provider's API key from the
///    environment (`OPENAI_API_KEY`, `ANTHROPIC_API_KEY`, …).
/// 2. **Azure OpenAI deployment**: the REST client, which keeps the HTTP
///    status and body of refused calls.
///
/// A caller that needs something else entirely builds [`Clients`] by hand.
pub fn resolve_summarizer(
    config: &SummarizerConfig,
    http: reqwest::Client,
) -> Result<Arc<dyn Summarizer>, DocsumError> {
    match config {
        SummarizerConfig::Provider { provider, model } => {
            info!("Summarizer: edgequake-llm provider '{}' ({})", provider, model);
            Ok(Arc::new(ProviderSummarizer::from_name(provider, model)?))
        }
        SummarizerConfig::AzureOpenAi {
            endpoint,
            api_key,
            deployment,
            api_version,
        } => {
            info!("Summarizer: Azure OpenAI deployment '{}'", deployment);
            Ok(Arc::new(
                AzureChatClient::new(http, endpoint.clone(), api_key.clone(), deployment.clone())
                    .with_api_version(api_version.clone()),
            ))
        }
    }
}

/// A running document-summarization worker.
pub struct Worker {
    engine: Engine,
    trigger: Trigger,
}

impl Worker {
    /// Build clients and the JSON instance store from `config`.
    pub async fn from_config(config: &WorkerConfig) -> Result<Self, DocsumError> {
        let clients = Clients::from_config(config)?;
        let store = JsonFileStore::open(&config.state_dir).await?;
        info!("Instance state in {}", store.dir().display());
        Self::new(config, clients, Arc::new(store), None).await
    }

    /// Assemble a worker around explicit clients and store.
    pub async fn new(
        config: &WorkerConfig,
        clients: Clients,
        store: Arc<dyn InstanceStore>,
        observer: Option<Observer>,
    ) -> Result<Self, DocsumError> {
        let workflow = ProcessDocument::new(
            AnalyzeStep::new(
                Arc::clone(&clients.storage),
                clients.analyzer,
                config.input_container.clone(),
            )
            .with_locale(config.locale.clone()),
            SummarizeStep::new(clients.summarizer),
            PersistStep::new(Arc::clone(&clients.storage), config.output_container.clone()),
        )
        .with_policies(StepPolicies::uniform(config.retry));

        let mut builder = Engine::builder(store).workflow(Arc::new(workflow));
        if let Some(observer) = observer {
            builder = builder.observer(observer);
        }
        let engine = builder.build();
        let trigger = Trigger::new(
            engine.clone(),
            clients.storage,
            config.input_container.clone(),
        )
        .await?;

        Ok(Self { engine, trigger })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn trigger(&self) -> &Trigger {
        &self.trigger
    }

    /// Resume every unfinished instance left by a previous run.
    pub async fn recover(&self) -> Result<Vec<Uuid>, DocsumError> {
        let resumed = self.engine.recover().await?;
        if !resumed.is_empty() {
            info!("Resumed {} unfinished instance(s)", resumed.len());
        }
        Ok(resumed)
    }

    /// One listing of the input container.
    pub async fn poll_once(&self) -> Result<Vec<Uuid>, DocsumError> {
        let started = self.trigger.poll().await?;
        if !started.is_empty() {
            info!(
                "Started {} instance(s) from '{}'",
                started.len(),
                self.trigger.container()
            );
        }
        Ok(started)
    }

    /// Recover, then poll every `interval` until `shutdown` resolves.
    ///
    /// Every tick also re-schedules unfinished instances that are not
    /// running. A failed listing is logged and retried on the next tick. Instances
    /// still running at shutdown keep their persisted progress and resume on
    /// the next start.
    pub async fn run<F>(&self, interval: Duration, shutdown: F) -> Result<(), DocsumError>
    where
        F: Future<Output = ()>,
    {
        self.recover().await?;

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested; unfinished instances resume on next start");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    // Picks up instances whose driver stopped on a store error.
                    if let Err(e) = self.engine.recover().await {
                        warn!("Recovering unfinished instances failed: {}", e);
                    }
                    if let Err(e) = self.poll_once().await {
                        warn!("Polling '{}' failed: {}", self.trigger.container(), e);
                    }
                }
            }
        }
    }
}
