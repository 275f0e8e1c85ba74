//! Step 1: fetch the uploaded document and extract its text.

use crate::clients::{AnalyzedPage, DocumentAnalyzer, ObjectStore};
use crate::error::StepError;
use std::sync::Arc;
use tracing::{debug, info};

/// Locale passed to the layout model.
pub const DEFAULT_LOCALE: &str = "en-US";

/// `source → text`.
#[derive(Clone)]
pub struct AnalyzeStep {
    storage: Arc<dyn ObjectStore>,
    analyzer: Arc<dyn DocumentAnalyzer>,
    container: String,
    locale: String,
}

impl AnalyzeStep {
    pub fn new(
        storage: Arc<dyn ObjectStore>,
        analyzer: Arc<dyn DocumentAnalyzer>,
        container: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            analyzer,
            container: container.into(),
            locale: DEFAULT_LOCALE.to_string(),
        }
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = locale.into();
        self
    }

    pub async fn run(&self, source: &str) -> Result<String, StepError> {
        let bytes = self
            .storage
            .read(&self.container, source)
            .await
            .map_err(|e| StepError::StorageRead {
                container: self.container.clone(),
                name: source.to_string(),
                detail: e.to_string(),
            })?;
        debug!("Read {}/{} ({} bytes)", self.container, source, bytes.len());

        let pages = self
            .analyzer
            .analyze(&bytes, &self.locale)
            .await
            .map_err(|e| StepError::Analysis {
                detail: e.to_string(),
            })?;

        let text = concat_lines(&pages);
        info!(
            "Analyzed '{}': {} page(s), {} chars",
            source,
            pages.len(),
            text.len()
        );
        Ok(text)
    }
}

/// Every line of every page, in order, joined without a separator.
pub fn concat_lines(pages: &[AnalyzedPage]) -> String {
    pages
        .iter()
        .flat_map(|p| p.lines.iter())
        .map(String::as_str)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(n: u32, lines: &[&str]) -> AnalyzedPage {
        AnalyzedPage {
            page_number: n,
            lines: lines.iter().map(|l| l.to_string()).collect(),
        }
    }

    #[test]
    fn lines_concatenate_in_page_then_line_order() {
        let pages = [page(1, &["Invoice ", "for "]), page(2, &["$500"])];
        assert_eq!(concat_lines(&pages), "Invoice for $500");
    }

    #[test]
    fn no_separator_between_lines() {
        let pages = [page(1, &["a", "b"]), page(2, &[]), page(3, &["c"])];
        assert_eq!(concat_lines(&pages), "abc");
        assert_eq!(concat_lines(&[]), "");
    }
}
