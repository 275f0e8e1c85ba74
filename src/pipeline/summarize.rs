//! Step 2: ask the LLM what the document is about.

use crate::clients::{Summarizer, SummaryRequest};
use crate::error::{ClientError, StepError};
use crate::pipeline::Summary;
use crate::prompts::summary_prompt;
use std::sync::Arc;
use tracing::{debug, error};

pub const DEFAULT_MAX_TOKENS: usize = 200;
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// `text → Summary`.
#[derive(Clone)]
pub struct SummarizeStep {
    summarizer: Arc<dyn Summarizer>,
    max_tokens: usize,
    temperature: f32,
}

impl SummarizeStep {
    pub fn new(summarizer: Arc<dyn Summarizer>) -> Self {
        Self {
            summarizer,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
        }
    }

    pub fn request(&self, text: &str) -> SummaryRequest {
        SummaryRequest {
            prompt: summary_prompt(text),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }

    pub async fn run(&self, text: &str) -> Result<Summary, StepError> {
        let request = self.request(text);
        match self.summarizer.summarize(&request).await {
            Ok(content) => {
                debug!("Summary: {}", content);
                Ok(Summary { content })
            }
            Err(ClientError::Status { status, body }) => {
                error!("Summarization call failed: {} - {}", status, body);
                Err(StepError::SummarizeStatus { status, body })
            }
            Err(e) => {
                error!("Summarization call failed: {}", e);
                Err(StepError::Summarize {
                    detail: e.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Fixed(Result<String, ClientError>);

    #[async_trait]
    impl Summarizer for Fixed {
        async fn summarize(&self, _request: &SummaryRequest) -> Result<String, ClientError> {
            self.0.clone()
        }
    }

    #[test]
    fn request_uses_fixed_options() {
        let step = SummarizeStep::new(Arc::new(Fixed(Ok(String::new()))));
        let req = step.request("hello");
        assert_eq!(
            req.prompt,
            "Can you explain what the following text is about? hello"
        );
        assert_eq!(req.max_tokens, 200);
        assert!((req.temperature - 0.7).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn status_failure_keeps_status_and_body() {
        let step = SummarizeStep::new(Arc::new(Fixed(Err(ClientError::Status {
            status: 429,
            body: "Too Many Requests".into(),
        }))));
        let err = step.run("text").await.unwrap_err();
        assert_eq!(
            err,
            StepError::SummarizeStatus {
                status: 429,
                body: "Too Many Requests".into()
            }
        );
    }

    #[tokio::test]
    async fn transport_failure_is_summarize_error() {
        let step = SummarizeStep::new(Arc::new(Fixed(Err(ClientError::Transport(
            "connection reset".into(),
        )))));
        let err = step.run("text").await.unwrap_err();
        assert!(matches!(err, StepError::Summarize { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn success_wraps_content() {
        let step = SummarizeStep::new(Arc::new(Fixed(Ok("A $500 invoice.".into()))));
        let summary = step.run("Invoice for $500").await.unwrap();
        assert_eq!(summary.content, "A $500 invoice.");
    }
}
