//! Turns uploads into workflow instances.
//!
//! Arrivals come in two shapes: a pushed storage path (`input/a.pdf`, as an
//! event notification would deliver it) or a periodic listing of the input
//! container. Both end in [`Trigger::submit`], which starts exactly one
//! `process_document` instance per source identifier. Identifiers that
//! already have an instance in the store, in any state, are skipped, so
//! restarting the worker never re-processes old uploads.

use crate::clients::ObjectStore;
use crate::engine::Engine;
use crate::error::DocsumError;
use crate::pipeline::PROCESS_DOCUMENT;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

/// Source identifier for a storage `path`, or `None` if the path is not an
/// object inside `container`.
///
/// The leading container segment is removed; nested paths keep their
/// remaining segments (`input/2024/a.pdf` → `2024/a.pdf`).
pub fn source_identifier(path: &str, container: &str) -> Option<String> {
    let path = path.trim_start_matches('/');
    let (first, rest) = path.split_once('/')?;
    if first != container || rest.is_empty() || rest.ends_with('/') {
        return None;
    }
    Some(rest.to_string())
}

/// Starts one instance per new input.
pub struct Trigger {
    engine: Engine,
    storage: Arc<dyn ObjectStore>,
    container: String,
    seen: Mutex<HashSet<String>>,
}

impl Trigger {
    /// Create a trigger that already knows every input with an instance.
    pub async fn new(
        engine: Engine,
        storage: Arc<dyn ObjectStore>,
        container: impl Into<String>,
    ) -> Result<Self, DocsumError> {
        let seen: HashSet<String> = engine
            .instances()
            .await?
            .into_iter()
            .filter(|r| r.workflow == PROCESS_DOCUMENT)
            .map(|r| r.input)
            .collect();
        debug!("Trigger: {} input(s) already have an instance", seen.len());
        Ok(Self {
            engine,
            storage,
            container: container.into(),
            seen: Mutex::new(seen),
        })
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    /// Handle a pushed storage path. Paths outside the watched container are ignored.
    pub async fn on_arrival(&self, path: &str) -> Result<Option<Uuid>, DocsumError> {
        match source_identifier(path, &self.container) {
            Some(source) => self.submit(&source).await,
            None => {
                debug!("Trigger: ignoring '{}'", path);
                Ok(None)
            }
        }
    }

    /// Start an instance for `source` unless one already exists.
    pub async fn submit(&self, source: &str) -> Result<Option<Uuid>, DocsumError> {
        let mut seen = self.seen.lock().await;
        if seen.contains(source) {
            return Ok(None);
        }
        let id = self.engine.start(PROCESS_DOCUMENT, source).await?;
        seen.insert(source.to_string());
        info!("Trigger: '{}' → instance {}", source, id);
        Ok(Some(id))
    }

    /// List the watched container and submit every object. Returns the new instance ids.
    pub async fn poll(&self) -> Result<Vec<Uuid>, DocsumError> {
        let names = self
            .storage
            .list(&self.container)
            .await
            .map_err(|source| DocsumError::Listing {
                container: self.container.clone(),
                source,
            })?;

        let mut started = Vec::new();
        for name in names {
            if let Some(id) = self.submit(&name).await? {
                started.push(id);
            }
        }
        Ok(started)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_container_segment() {
        assert_eq!(source_identifier("input/a.pdf", "input").as_deref(), Some("a.pdf"));
        assert_eq!(
            source_identifier("/input/2024/q1.pdf", "input").as_deref(),
            Some("2024/q1.pdf")
        );
    }

    #[test]
    fn rejects_other_containers_and_bare_names() {
        assert_eq!(source_identifier("output/a.txt", "input"), None);
        assert_eq!(source_identifier("a.pdf", "input"), None);
        assert_eq!(source_identifier("input/", "input"), None);
        assert_eq!(source_identifier("input/dir/", "input"), None);
    }
}
