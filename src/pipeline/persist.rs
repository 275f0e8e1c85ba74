//! Step 3: write the summary next to the other results.
//!
//! ## Why replace dots?
//!
//! Downstream consumers split object names on `.` to find the suffix, so the
//! base name (source identifier plus timestamp) must be dot-free before the
//! single `.txt` suffix is appended.

use crate::clients::ObjectStore;
use crate::error::StepError;
use crate::pipeline::PersistRequest;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;

/// Source of the timestamp embedded in output names.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// `{source, summary} → output name`.
#[derive(Clone)]
pub struct PersistStep {
    storage: Arc<dyn ObjectStore>,
    container: String,
    clock: Clock,
}

impl PersistStep {
    pub fn new(storage: Arc<dyn ObjectStore>, container: impl Into<String>) -> Self {
        Self {
            storage,
            container: container.into(),
            clock: Arc::new(Utc::now),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Write the summary and return the name it was written under.
    pub async fn run(&self, request: &PersistRequest) -> Result<String, StepError> {
        let name = output_name(&request.source, (self.clock)());
        self.storage
            .write(
                &self.container,
                &name,
                request.summary.content.clone().into_bytes(),
            )
            .await
            .map_err(|e| StepError::StorageWrite {
                container: self.container.clone(),
                name: name.clone(),
                detail: e.to_string(),
            })?;
        info!("Wrote summary of '{}' to {}/{}", request.source, self.container, name);
        Ok(name)
    }
}

/// `"{source}-{timestamp}"` with every `.` replaced by `-`, then `.txt`.
///
/// The timestamp is `%Y-%m-%dT%H:%M:%S`, followed by fractional seconds only
/// when they are non-zero.
pub fn output_name(source: &str, at: DateTime<Utc>) -> String {
    let base = format!("{}-{}", source, at.format("%Y-%m-%dT%H:%M:%S%.f"));
    format!("{}.txt", base.replace('.', "-"))
}
