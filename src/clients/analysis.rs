//! Layout analysis over the Document Intelligence REST API.
//!
//! Analysis is a long-running operation: the submit call answers `202` with an
//! `Operation-Location` header, which is then polled until the operation
//! reports `succeeded` or `failed`. Only page lines are extracted; tables,
//! figures and styles in the result are ignored.

use crate::clients::{AnalyzedPage, DocumentAnalyzer};
use crate::error::ClientError;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

/// Prebuilt model that extracts text lines in reading order.
pub const LAYOUT_MODEL: &str = "prebuilt-layout";

/// REST API version of the analysis service.
pub const DEFAULT_API_VERSION: &str = "2024-11-30";

const KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

/// Client for `prebuilt-layout` analysis.
#[derive(Debug, Clone)]
pub struct LayoutAnalysisClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    api_version: String,
    poll_interval: Duration,
    max_polls: u32,
}

impl LayoutAnalysisClient {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key,
            api_version: DEFAULT_API_VERSION.to_string(),
            poll_interval: Duration::from_secs(1),
            max_polls: 120,
        }
    }

    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into();
        self
    }

    /// Interval between status polls and the number of polls before giving up.
    pub fn with_polling(mut self, interval: Duration, max_polls: u32) -> Self {
        self.poll_interval = interval;
        self.max_polls = max_polls.max(1);
        self
    }

    fn analyze_url(&self, locale: &str) -> String {
        format!(
            "{}/documentintelligence/documentModels/{}:analyze?api-version={}&locale={}",
            self.endpoint, LAYOUT_MODEL, self.api_version, locale
        )
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.api_key {
            Some(ref key) => req.header(KEY_HEADER, key),
            None => req,
        }
    }

    async fn submit(&self, document: &[u8], locale: &str) -> Result<String, ClientError> {
        let body = serde_json::json!({ "base64Source": STANDARD.encode(document) });
        let response = self
            .authorize(self.client.post(self.analyze_url(locale)))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .headers()
            .get("operation-location")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| ClientError::Decode("analyze response has no Operation-Location".into()))
    }

    async fn poll(&self, operation: &str) -> Result<AnalyzeResult, ClientError> {
        for poll in 1..=self.max_polls {
            let response = self.authorize(self.client.get(operation)).send().await?;
            let status = response.status();
            let body = response.text().await?;
            if !status.is_success() {
                return Err(ClientError::Status {
                    status: status.as_u16(),
                    body,
                });
            }

            let op: AnalyzeOperation = serde_json::from_str(&body)
                .map_err(|e| ClientError::Decode(format!("analyze operation: {e}")))?;
            match op.status.as_str() {
                "succeeded" => {
                    debug!("Analysis succeeded after {} poll(s)", poll);
                    return op
                        .analyze_result
                        .ok_or_else(|| ClientError::Decode("succeeded without analyzeResult".into()));
                }
                "failed" | "canceled" => {
                    let detail = op
                        .error
                        .map(|e| format!("{}: {}", e.code, e.message))
                        .unwrap_or_else(|| op.status.clone());
                    return Err(ClientError::Service(detail));
                }
                _ => tokio::time::sleep(self.poll_interval).await,
            }
        }
        Err(ClientError::Timeout {
            polls: self.max_polls,
        })
    }
}

#[async_trait]
impl DocumentAnalyzer for LayoutAnalysisClient {
    async fn analyze(&self, document: &[u8], locale: &str) -> Result<Vec<AnalyzedPage>, ClientError> {
        info!(
            "Analyzing {} byte document with {} ({})",
            document.len(),
            LAYOUT_MODEL,
            locale
        );
        let operation = self.submit(document, locale).await?;
        let result = self.poll(&operation).await?;
        Ok(pages_from_result(result))
    }
}

// ── Wire types ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeOperation {
    status: String,
    analyze_result: Option<AnalyzeResult>,
    error: Option<ServiceError>,
}

#[derive(Debug, Deserialize)]
struct ServiceError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Default, Deserialize)]
struct AnalyzeResult {
    #[serde(default)]
    pages: Vec<Page>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Page {
    page_number: u32,
    #[serde(default)]
    lines: Vec<Line>,
}

#[derive(Debug, Deserialize)]
struct Line {
    content: String,
}

/// Pages sorted by page number, lines kept in service order.
fn pages_from_result(result: AnalyzeResult) -> Vec<AnalyzedPage> {
    let mut pages: Vec<AnalyzedPage> = result
        .pages
        .into_iter()
        .map(|p| AnalyzedPage {
            page_number: p.page_number,
            lines: p.lines.into_iter().map(|l| l.content).collect(),
        })
        .collect();
    pages.sort_by_key(|p| p.page_number);
    pages
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analyze_url_carries_model_version_and_locale() {
        let c = LayoutAnalysisClient::new(
            reqwest::Client::new(),
            "https://docs.cognitiveservices.azure.com/",
            None,
        );
        assert_eq!(
            c.analyze_url("en-US"),
            "https://docs.cognitiveservices.azure.com/documentintelligence/documentModels/prebuilt-layout:analyze?api-version=2024-11-30&locale=en-US"
        );
    }

    #[test]
    fn parses_succeeded_operation() {
        let body = r#"{
            "status": "succeeded",
            "analyzeResult": {
                "apiVersion": "2024-11-30",
                "pages": [
                    {"pageNumber": 2, "lines": [{"content": "Total: 40", "polygon": []}]},
                    {"pageNumber": 1, "lines": [{"content": "Invoice #12"}, {"content": "Due: May"}]},
                    {"pageNumber": 3}
                ]
            }
        }"#;
        let op: AnalyzeOperation = serde_json::from_str(body).unwrap();
        assert_eq!(op.status, "succeeded");
        let pages = pages_from_result(op.analyze_result.unwrap());
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[0].page_number, 1);
        assert_eq!(pages[0].lines, ["Invoice #12", "Due: May"]);
        assert_eq!(pages[1].lines, ["Total: 40"]);
        assert!(pages[2].lines.is_empty());
    }

    #[test]
    fn parses_failed_operation_error() {
        let body = r#"{"status":"failed","error":{"code":"InvalidContent","message":"corrupted"}}"#;
        let op: AnalyzeOperation = serde_json::from_str(body).unwrap();
        let err = op.error.unwrap();
        assert_eq!(err.code, "InvalidContent");
        assert_eq!(err.message, "corrupted");
    }
}
