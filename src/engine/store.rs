//! Durable storage for [`InstanceRecord`]s.
//!
//! The engine saves a record after every state change, and always before it
//! dispatches the next step, so whatever a store returns after a crash is a
//! consistent point to resume from.
//!
//! Two implementations:
//! * [`MemoryStore`] — process-local; tests and one-shot runs.
//! * [`JsonFileStore`] — one pretty-printed `<uuid>.json` per instance in a
//!   state directory. Writes go to a temp file that is then renamed over the
//!   record, so a crash mid-write leaves the previous version intact.

use crate::engine::state::InstanceRecord;
use crate::error::DocsumError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

/// Persistence backend for workflow instances.
#[async_trait]
pub trait InstanceStore: Send + Sync {
    /// Insert or replace the record with `record.id`.
    async fn save(&self, record: &InstanceRecord) -> Result<(), DocsumError>;

    async fn load(&self, id: Uuid) -> Result<Option<InstanceRecord>, DocsumError>;

    /// All records, oldest first.
    async fn list(&self) -> Result<Vec<InstanceRecord>, DocsumError>;
}

/// In-memory store.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<Uuid, InstanceRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InstanceStore for MemoryStore {
    async fn save(&self, record: &InstanceRecord) -> Result<(), DocsumError> {
        self.records.lock().await.insert(record.id, record.clone());
        Ok(())
    }

    async fn load(&self, id: Uuid) -> Result<Option<InstanceRecord>, DocsumError> {
        Ok(self.records.lock().await.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<InstanceRecord>, DocsumError> {
        let mut all: Vec<InstanceRecord> = self.records.lock().await.values().cloned().collect();
        all.sort_by_key(|r| r.created_at);
        Ok(all)
    }
}

/// Directory of JSON records.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    /// Open (and create if needed) the state directory.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, DocsumError> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| DocsumError::StoreIo {
                path: dir.clone(),
                source: e,
            })?;
        debug!("Instance store at {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    async fn read_record(path: &Path) -> Result<InstanceRecord, DocsumError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| DocsumError::StoreIo {
                path: path.to_path_buf(),
                source: e,
            })?;
        serde_json::from_slice(&bytes).map_err(|e| DocsumError::CorruptRecord {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })
    }
}

#[async_trait]
impl InstanceStore for JsonFileStore {
    async fn save(&self, record: &InstanceRecord) -> Result<(), DocsumError> {
        let path = self.record_path(record.id);
        let json = serde_json::to_vec_pretty(record)
            .map_err(|e| DocsumError::Internal(format!("serialise instance record: {e}")))?;

        // Atomic write: write to temp, then rename
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &json)
            .await
            .map_err(|e| DocsumError::StoreIo {
                path: tmp_path.clone(),
                source: e,
            })?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| DocsumError::StoreIo {
                path: path.clone(),
                source: e,
            })?;
        Ok(())
    }

    async fn load(&self, id: Uuid) -> Result<Option<InstanceRecord>, DocsumError> {
        let path = self.record_path(id);
        match tokio::fs::metadata(&path).await {
            Ok(_) => Self::read_record(&path).await.map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(DocsumError::StoreIo { path, source: e }),
        }
    }

    async fn list(&self) -> Result<Vec<InstanceRecord>, DocsumError> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| DocsumError::StoreIo {
                path: self.dir.clone(),
                source: e,
            })?;

        let mut all = Vec::new();
        loop {
            let entry = entries
                .next_entry()
                .await
                .map_err(|e| DocsumError::StoreIo {
                    path: self.dir.clone(),
                    source: e,
                })?;
            let Some(entry) = entry else { break };
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read_record(&path).await {
                Ok(record) => all.push(record),
                // One unreadable record must not hide the others.
                Err(e) => warn!("Skipping instance record: {}", e),
            }
        }
        all.sort_by_key(|r| r.created_at);
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::state::InstanceStatus;
    use serde_json::json;

    #[tokio::test]
    async fn memory_store_roundtrip() {
        let store = MemoryStore::new();
        let mut r = InstanceRecord::new("wf", "a.pdf");
        store.save(&r).await.unwrap();

        r.begin_step(1).unwrap();
        store.save(&r).await.unwrap();

        let loaded = store.load(r.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, InstanceStatus::Running { step: 1 });
        assert_eq!(store.list().await.unwrap().len(), 1);
        assert!(store.load(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn json_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let mut r = InstanceRecord::new("process_document", "report.pdf");
        r.begin_step(1).unwrap();
        r.record_step("analyze", json!("some text"), 2).unwrap();

        {
            let store = JsonFileStore::open(dir.path()).await.unwrap();
            store.save(&r).await.unwrap();
        }

        let reopened = JsonFileStore::open(dir.path()).await.unwrap();
        let loaded = reopened.load(r.id).await.unwrap().expect("record persisted");
        assert_eq!(loaded, r);
        assert_eq!(reopened.list().await.unwrap().len(), 1);
        assert!(
            !dir.path().join(format!("{}.json.tmp", r.id)).exists(),
            "temp file must be renamed away"
        );
    }

    #[tokio::test]
    async fn json_store_skips_corrupt_records_in_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();
        let r = InstanceRecord::new("wf", "ok.pdf");
        store.save(&r).await.unwrap();
        tokio::fs::write(dir.path().join("garbage.json"), b"{not json")
            .await
            .unwrap();

        let all = store.list().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, r.id);
    }

    #[tokio::test]
    async fn json_store_load_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path().join("nested/state")).await.unwrap();
        assert!(store.load(Uuid::new_v4()).await.unwrap().is_none());
    }
}
