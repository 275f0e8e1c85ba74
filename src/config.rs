//! Worker configuration.
//!
//! Everything the worker needs is collected in [`WorkerConfig`], built via
//! [`WorkerConfigBuilder`] or read from the process environment with
//! [`WorkerConfig::from_env`]. Validation happens once, in `build()`, so a
//! missing endpoint or key is reported before any instance is scheduled.
//!
//! | Variable | Required | Default |
//! |----------|----------|---------|
//! | `BLOB_STORAGE_ENDPOINT` | yes | |
//! | `COGNITIVE_SERVICES_ENDPOINT` | yes | |
//! | `COGNITIVE_SERVICES_KEY` | no | |
//! | `AZURE_OPENAI_ENDPOINT` | unless `DOCSUM_LLM_PROVIDER` | |
//! | `AZURE_OPENAI_KEY` | unless `DOCSUM_LLM_PROVIDER` | |
//! | `CHAT_MODEL_DEPLOYMENT_NAME` | unless `DOCSUM_LLM_PROVIDER` | |
//! | `AZURE_OPENAI_API_VERSION` | no | `2025-01-01-preview` |
//! | `DOCSUM_LLM_PROVIDER` / `DOCSUM_LLM_MODEL` | no | |
//! | `DOCSUM_INPUT_CONTAINER` | no | `input` |
//! | `DOCSUM_OUTPUT_CONTAINER` | no | `output` |
//! | `DOCSUM_RETRY_INITIAL_DELAY_MS` | no | `5000` |
//! | `DOCSUM_RETRY_MAX_ATTEMPTS` | no | `3` |
//! | `DOCSUM_RETRY_BACKOFF` | no | `1.0` |
//! | `DOCSUM_STATE_DIR` | no | `.docsum/state` |

use crate::clients::summarizer::DEFAULT_API_VERSION;
use crate::engine::RetryPolicy;
use crate::error::DocsumError;
use crate::pipeline::analyze::DEFAULT_LOCALE;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Environment variable names.
pub mod env {
    pub const BLOB_STORAGE_ENDPOINT: &str = "BLOB_STORAGE_ENDPOINT";
    pub const COGNITIVE_SERVICES_ENDPOINT: &str = "COGNITIVE_SERVICES_ENDPOINT";
    pub const COGNITIVE_SERVICES_KEY: &str = "COGNITIVE_SERVICES_KEY";
    pub const AZURE_OPENAI_ENDPOINT: &str = "AZURE_OPENAI_ENDPOINT";
    pub const AZURE_OPENAI_KEY: &str = "AZURE_OPENAI_KEY";
    pub const CHAT_MODEL_DEPLOYMENT_NAME: &str = "CHAT_MODEL_DEPLOYMENT_NAME";
    pub const AZURE_OPENAI_API_VERSION: &str = "AZURE_OPENAI_API_VERSION";
    pub const LLM_PROVIDER: &str = "DOCSUM_LLM_PROVIDER";
    pub const LLM_MODEL: &str = "DOCSUM_LLM_MODEL";
    pub const INPUT_CONTAINER: &str = "DOCSUM_INPUT_CONTAINER";
    pub const OUTPUT_CONTAINER: &str = "DOCSUM_OUTPUT_CONTAINER";
    pub const RETRY_INITIAL_DELAY_MS: &str = "DOCSUM_RETRY_INITIAL_DELAY_MS";
    pub const RETRY_MAX_ATTEMPTS: &str = "DOCSUM_RETRY_MAX_ATTEMPTS";
    pub const RETRY_BACKOFF: &str = "DOCSUM_RETRY_BACKOFF";
    pub const STATE_DIR: &str = "DOCSUM_STATE_DIR";
}

/// Model used with `DOCSUM_LLM_PROVIDER` when `DOCSUM_LLM_MODEL` is unset.
pub const DEFAULT_LLM_MODEL: &str = "gpt-4.1-nano";

/// Which backend produces summaries.
#[derive(Clone, PartialEq, Eq)]
pub enum SummarizerConfig {
    /// An Azure OpenAI chat deployment, called over REST.
    AzureOpenAi {
        endpoint: String,
        api_key: String,
        deployment: String,
        api_version: String,
    },
    /// A provider built by `edgequake-llm` (API key read from its own env vars).
    Provider { provider: String, model: String },
}

impl fmt::Debug for SummarizerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SummarizerConfig::AzureOpenAi {
                endpoint,
                deployment,
                api_version,
                ..
            } => f
                .debug_struct("AzureOpenAi")
                .field("endpoint", endpoint)
                .field("api_key", &"<redacted>")
                .field("deployment", deployment)
                .field("api_version", api_version)
                .finish(),
            SummarizerConfig::Provider { provider, model } => f
                .debug_struct("Provider")
                .field("provider", provider)
                .field("model", model)
                .finish(),
        }
    }
}

/// Validated worker configuration.
#[derive(Clone)]
pub struct WorkerConfig {
    /// Blob account URL (with SAS), SAS connection string, or local directory.
    pub storage_endpoint: String,

    /// Document-analysis resource endpoint.
    pub analysis_endpoint: String,

    /// Subscription key for the analysis resource. Omitted from requests when `None`.
    pub analysis_key: Option<String>,

    pub summarizer: SummarizerConfig,

    /// Container watched for uploads. Default: `input`.
    pub input_container: String,

    /// Container summaries are written to. Default: `output`.
    pub output_container: String,

    /// Applied to every step. Default: 5 s constant delay, 3 attempts.
    pub retry: RetryPolicy,

    /// Locale passed to the layout model. Default: `en-US`.
    pub locale: String,

    /// Directory holding one JSON record per workflow instance.
    pub state_dir: PathBuf,

    /// Timeout for every outbound HTTP request. Default: 120 s.
    pub http_timeout: Duration,
}

impl fmt::Debug for WorkerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerConfig")
            .field("storage_endpoint", &redact_query(&self.storage_endpoint))
            .field("analysis_endpoint", &self.analysis_endpoint)
            .field("analysis_key", &self.analysis_key.as_ref().map(|_| "<redacted>"))
            .field("summarizer", &self.summarizer)
            .field("input_container", &self.input_container)
            .field("output_container", &self.output_container)
            .field("retry", &self.retry)
            .field("locale", &self.locale)
            .field("state_dir", &self.state_dir)
            .field("http_timeout", &self.http_timeout)
            .finish()
    }
}

/// Strip SAS tokens and connection-string secrets before logging.
fn redact_query(endpoint: &str) -> String {
    if let Some((base, _)) = endpoint.split_once('?') {
        format!("{base}?<redacted>")
    } else if endpoint.contains("SharedAccessSignature=") || endpoint.contains("AccountKey=") {
        "<connection string>".to_string()
    } else {
        endpoint.to_string()
    }
}

impl WorkerConfig {
    pub fn builder() -> WorkerConfigBuilder {
        WorkerConfigBuilder::default()
    }

    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self, DocsumError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through `lookup`; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, DocsumError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut b = WorkerConfigBuilder::default();

        if let Some(v) = get(env::BLOB_STORAGE_ENDPOINT) {
            b = b.storage_endpoint(v);
        }
        if let Some(v) = get(env::COGNITIVE_SERVICES_ENDPOINT) {
            b = b.analysis_endpoint(v);
        }
        if let Some(v) = get(env::COGNITIVE_SERVICES_KEY) {
            b = b.analysis_key(v);
        }
        if let Some(v) = get(env::AZURE_OPENAI_ENDPOINT) {
            b = b.azure_openai_endpoint(v);
        }
        if let Some(v) = get(env::AZURE_OPENAI_KEY) {
            b = b.azure_openai_key(v);
        }
        if let Some(v) = get(env::CHAT_MODEL_DEPLOYMENT_NAME) {
            b = b.chat_deployment(v);
        }
        if let Some(v) = get(env::AZURE_OPENAI_API_VERSION) {
            b = b.azure_openai_api_version(v);
        }
        if let Some(v) = get(env::LLM_PROVIDER) {
            b = b.llm_provider(v);
        }
        if let Some(v) = get(env::LLM_MODEL) {
            b = b.llm_model(v);
        }
        if let Some(v) = get(env::INPUT_CONTAINER) {
            b = b.input_container(v);
        }
        if let Some(v) = get(env::OUTPUT_CONTAINER) {
            b = b.output_container(v);
        }
        if let Some(v) = get(env::RETRY_INITIAL_DELAY_MS) {
            b = b.retry_initial_delay(Duration::from_millis(parse(env::RETRY_INITIAL_DELAY_MS, &v)?));
        }
        if let Some(v) = get(env::RETRY_MAX_ATTEMPTS) {
            b = b.retry_max_attempts(parse(env::RETRY_MAX_ATTEMPTS, &v)?);
        }
        if let Some(v) = get(env::RETRY_BACKOFF) {
            b = b.retry_backoff(parse(env::RETRY_BACKOFF, &v)?);
        }
        if let Some(v) = get(env::STATE_DIR) {
            b = b.state_dir(v);
        }
        b.build()
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, DocsumError>
where
    T::Err: fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| DocsumError::InvalidConfig(format!("{key}={value:?}: {e}")))
}

/// Builder for [`WorkerConfig`].
#[derive(Clone)]
pub struct WorkerConfigBuilder {
    storage_endpoint: Option<String>,
    analysis_endpoint: Option<String>,
    analysis_key: Option<String>,
    azure_endpoint: Option<String>,
    azure_key: Option<String>,
    azure_deployment: Option<String>,
    azure_api_version: String,
    llm_provider: Option<String>,
    llm_model: Option<String>,
    input_container: String,
    output_container: String,
    retry_initial_delay: Duration,
    retry_max_attempts: u32,
    retry_backoff: f64,
    locale: String,
    state_dir: PathBuf,
    http_timeout: Duration,
}

impl Default for WorkerConfigBuilder {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            storage_endpoint: None,
            analysis_endpoint: None,
            analysis_key: None,
            azure_endpoint: None,
            azure_key: None,
            azure_deployment: None,
            azure_api_version: DEFAULT_API_VERSION.to_string(),
            llm_provider: None,
            llm_model: None,
            input_container: "input".to_string(),
            output_container: "output".to_string(),
            retry_initial_delay: retry.initial_delay,
            retry_max_attempts: retry.max_attempts,
            retry_backoff: retry.backoff_coefficient,
            locale: DEFAULT_LOCALE.to_string(),
            state_dir: PathBuf::from(".docsum/state"),
            http_timeout: Duration::from_secs(120),
        }
    }
}

impl WorkerConfigBuilder {
    pub fn storage_endpoint(mut self, v: impl Into<String>) -> Self {
        self.storage_endpoint = Some(v.into());
        self
    }

    pub fn analysis_endpoint(mut self, v: impl Into<String>) -> Self {
        self.analysis_endpoint = Some(v.into());
        self
    }

    pub fn analysis_key(mut self, v: impl Into<String>) -> Self {
        self.analysis_key = Some(v.into());
        self
    }

    pub fn azure_openai_endpoint(mut self, v: impl Into<String>) -> Self {
        self.azure_endpoint = Some(v.into());
        self
    }

    pub fn azure_openai_key(mut self, v: impl Into<String>) -> Self {
        self.azure_key = Some(v.into());
        self
    }

    pub fn chat_deployment(mut self, v: impl Into<String>) -> Self {
        self.azure_deployment = Some(v.into());
        self
    }

    pub fn azure_openai_api_version(mut self, v: impl Into<String>) -> Self {
        self.azure_api_version = v.into();
        self
    }

    /// Summarize through an `edgequake-llm` provider instead of Azure OpenAI.
    pub fn llm_provider(mut self, v: impl Into<String>) -> Self {
        self.llm_provider = Some(v.into());
        self
    }

    pub fn llm_model(mut self, v: impl Into<String>) -> Self {
        self.llm_model = Some(v.into());
        self
    }

    pub fn input_container(mut self, v: impl Into<String>) -> Self {
        self.input_container = v.into();
        self
    }

    pub fn output_container(mut self, v: impl Into<String>) -> Self {
        self.output_container = v.into();
        self
    }

    pub fn retry_initial_delay(mut self, d: Duration) -> Self {
        self.retry_initial_delay = d;
        self
    }

    pub fn retry_max_attempts(mut self, n: u32) -> Self {
        self.retry_max_attempts = n;
        self
    }

    pub fn retry_backoff(mut self, coefficient: f64) -> Self {
        self.retry_backoff = coefficient;
        self
    }

    pub fn locale(mut self, v: impl Into<String>) -> Self {
        self.locale = v.into();
        self
    }

    pub fn state_dir(mut self, v: impl Into<PathBuf>) -> Self {
        self.state_dir = v.into();
        self
    }

    pub fn http_timeout(mut self, d: Duration) -> Self {
        self.http_timeout = d;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<WorkerConfig, DocsumError> {
        let storage_endpoint = required(
            self.storage_endpoint,
            env::BLOB_STORAGE_ENDPOINT,
            "Set it to a blob account URL with a SAS token, a SAS connection string, \
             or a local directory.",
        )?;
        let analysis_endpoint = required(
            self.analysis_endpoint,
            env::COGNITIVE_SERVICES_ENDPOINT,
            "Set it to the document-analysis resource endpoint, \
             e.g. https://<name>.cognitiveservices.azure.com/",
        )?;

        let summarizer = match self.llm_provider {
            Some(provider) => SummarizerConfig::Provider {
                provider,
                model: self
                    .llm_model
                    .unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string()),
            },
            None => {
                const HINT: &str =
                    "Azure OpenAI needs AZURE_OPENAI_ENDPOINT, AZURE_OPENAI_KEY and \
                     CHAT_MODEL_DEPLOYMENT_NAME; or set DOCSUM_LLM_PROVIDER to use \
                     another provider.";
                SummarizerConfig::AzureOpenAi {
                    endpoint: required(self.azure_endpoint, env::AZURE_OPENAI_ENDPOINT, HINT)?,
                    api_key: required(self.azure_key, env::AZURE_OPENAI_KEY, HINT)?,
                    deployment: required(
                        self.azure_deployment,
                        env::CHAT_MODEL_DEPLOYMENT_NAME,
                        HINT,
                    )?,
                    api_version: self.azure_api_version,
                }
            }
        };

        for (what, name) in [
            ("input container", &self.input_container),
            ("output container", &self.output_container),
        ] {
            if name.trim().is_empty() || name.contains('/') {
                return Err(DocsumError::InvalidConfig(format!(
                    "{what} must be a single non-empty name, got {name:?}"
                )));
            }
        }
        if self.retry_max_attempts == 0 {
            return Err(DocsumError::InvalidConfig(
                "Retry max attempts must be ≥ 1".into(),
            ));
        }
        if !self.retry_backoff.is_finite() || self.retry_backoff < 1.0 {
            return Err(DocsumError::InvalidConfig(format!(
                "Retry backoff coefficient must be ≥ 1.0, got {}",
                self.retry_backoff
            )));
        }

        Ok(WorkerConfig {
            storage_endpoint,
            analysis_endpoint,
            analysis_key: self.analysis_key,
            summarizer,
            input_container: self.input_container,
            output_container: self.output_container,
            retry: RetryPolicy::new(self.retry_initial_delay, self.retry_max_attempts)
                .with_backoff(self.retry_backoff),
            locale: self.locale,
            state_dir: self.state_dir,
            http_timeout: self.http_timeout,
        })
    }
}

fn required(value: Option<String>, key: &'static str, hint: &str) -> Result<String, DocsumError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| DocsumError::MissingConfig {
            key,
            hint: hint.to_string(),
        })
}
