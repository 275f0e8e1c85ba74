//! Narrow interfaces to the external collaborators.
//!
//! The pipeline only ever talks to these traits. Concrete clients are built
//! once per process and shared as `Arc<dyn …>` handles, which keeps every
//! step adapter testable with in-process fakes.
//!
//! | Trait | Implementations |
//! |-------|-----------------|
//! | [`ObjectStore`] | [`storage::FsObjectStore`], [`storage::BlobObjectStore`] |
//! | [`DocumentAnalyzer`] | [`analysis::LayoutAnalysisClient`] |
//! | [`Summarizer`] | [`summarizer::AzureChatClient`], [`summarizer::ProviderSummarizer`] |

pub mod analysis;
pub mod storage;
pub mod summarizer;

use crate::error::{ClientError, DocsumError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Named byte objects grouped in containers.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn read(&self, container: &str, name: &str) -> Result<Vec<u8>, ClientError>;

    /// Create or overwrite `container/name`.
    async fn write(&self, container: &str, name: &str, bytes: Vec<u8>) -> Result<(), ClientError>;

    /// Object names in `container`, sorted.
    async fn list(&self, container: &str) -> Result<Vec<String>, ClientError>;
}

/// One page of layout-analysis output, lines in reading order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzedPage {
    pub page_number: u32,
    pub lines: Vec<String>,
}

/// OCR / layout analysis of a whole document.
#[async_trait]
pub trait DocumentAnalyzer: Send + Sync {
    /// Pages in document order.
    async fn analyze(&self, document: &[u8], locale: &str) -> Result<Vec<AnalyzedPage>, ClientError>;
}

/// A single summarization request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRequest {
    /// The full user prompt, document text included.
    pub prompt: String,
    pub max_tokens: usize,
    pub temperature: f32,
}

/// LLM chat completion reduced to text in, text out.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, request: &SummaryRequest) -> Result<String, ClientError>;
}

/// Shared HTTP client for every remote collaborator.
pub fn http_client(timeout: std::time::Duration) -> Result<reqwest::Client, DocsumError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| DocsumError::Internal(format!("Failed to build HTTP client: {e}")))
}
