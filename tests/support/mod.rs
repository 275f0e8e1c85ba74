//! In-process fakes for the three collaborators.
//!
//! Each fake counts its calls and can be scripted to fail its first N calls,
//! which is all the engine tests need to exercise retry, exhaustion and
//! recovery without any network.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use edgequake_docsum::clients::{AnalyzedPage, DocumentAnalyzer, ObjectStore, Summarizer, SummaryRequest};
use edgequake_docsum::engine::{Engine, InstanceStore, MemoryStore, RetryPolicy, Workflow};
use edgequake_docsum::error::ClientError;
use edgequake_docsum::pipeline::{
    AnalyzeStep, Clock, PersistStep, ProcessDocument, StepPolicies, SummarizeStep,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Storage ──────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeStorage {
    objects: Mutex<BTreeMap<(String, String), Vec<u8>>>,
    pub reads: AtomicU32,
    pub writes: AtomicU32,
    pub fail_writes: AtomicU32,
    pub fail_list: Mutex<bool>,
}

impl FakeStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn put(&self, container: &str, name: &str, bytes: &[u8]) {
        self.objects
            .lock()
            .unwrap()
            .insert((container.into(), name.into()), bytes.to_vec());
    }

    pub fn get(&self, container: &str, name: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(&(container.to_string(), name.to_string()))
            .cloned()
    }

    pub fn names(&self, container: &str) -> Vec<String> {
        self.objects
            .lock()
            .unwrap()
            .keys()
            .filter(|(c, _)| c == container)
            .map(|(_, n)| n.clone())
            .collect()
    }
}

#[async_trait]
impl ObjectStore for FakeStorage {
    async fn read(&self, container: &str, name: &str) -> Result<Vec<u8>, ClientError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.get(container, name).ok_or_else(|| ClientError::NotFound {
            container: container.into(),
            name: name.into(),
        })
    }

    async fn write(&self, container: &str, name: &str, bytes: Vec<u8>) -> Result<(), ClientError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.fail_writes) {
            return Err(ClientError::Status {
                status: 503,
                body: "storage unavailable".into(),
            });
        }
        self.put(container, name, &bytes);
        Ok(())
    }

    async fn list(&self, container: &str) -> Result<Vec<String>, ClientError> {
        if *self.fail_list.lock().unwrap() {
            return Err(ClientError::Transport("listing refused".into()));
        }
        Ok(self.names(container))
    }
}

/// Consume one scripted failure, if any remain.
fn take_failure(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

// ── Analyzer ─────────────────────────────────────────────────────────────────

/// Treats the document bytes as UTF-8 text on a single page.
#[derive(Default)]
pub struct FakeAnalyzer {
    pub calls: AtomicU32,
    pub failures: AtomicU32,
    pub delay: Mutex<Option<Duration>>,
}

impl FakeAnalyzer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing(n: u32) -> Arc<Self> {
        let a = Self::default();
        a.failures.store(n, Ordering::SeqCst);
        Arc::new(a)
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        let a = Self::default();
        *a.delay.lock().unwrap() = Some(delay);
        Arc::new(a)
    }
}

#[async_trait]
impl DocumentAnalyzer for FakeAnalyzer {
    async fn analyze(&self, document: &[u8], locale: &str) -> Result<Vec<AnalyzedPage>, ClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(locale, "en-US");
        let delay = *self.delay.lock().unwrap();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        if take_failure(&self.failures) {
            return Err(ClientError::Service("layout model overloaded".into()));
        }
        // One line per word; concatenating them restores the document text.
        let text = String::from_utf8_lossy(document);
        Ok(vec![AnalyzedPage {
            page_number: 1,
            lines: text.split_inclusive(' ').map(str::to_string).collect(),
        }])
    }
}

// ── Summarizer ───────────────────────────────────────────────────────────────

pub struct FakeSummarizer {
    pub reply: String,
    pub calls: AtomicU32,
    pub failures: AtomicU32,
    pub prompts: Mutex<Vec<String>>,
}

impl FakeSummarizer {
    pub fn replying(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.into(),
            calls: AtomicU32::new(0),
            failures: AtomicU32::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(reply: &str, n: u32) -> Arc<Self> {
        let s = Self::replying(reply);
        s.failures.store(n, Ordering::SeqCst);
        s
    }
}

#[async_trait]
impl Summarizer for FakeSummarizer {
    async fn summarize(&self, request: &SummaryRequest) -> Result<String, ClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(request.prompt.clone());
        assert_eq!(request.max_tokens, 200);
        if take_failure(&self.failures) {
            return Err(ClientError::Status {
                status: 429,
                body: "Too Many Requests".into(),
            });
        }
        Ok(self.reply.clone())
    }
}

// ── Assembly ─────────────────────────────────────────────────────────────────

pub fn fast_policy() -> RetryPolicy {
    RetryPolicy::new(Duration::from_millis(1), 3)
}

pub fn fixed_clock() -> Clock {
    Arc::new(|| Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
}

pub struct Harness {
    pub storage: Arc<FakeStorage>,
    pub analyzer: Arc<FakeAnalyzer>,
    pub summarizer: Arc<FakeSummarizer>,
}

impl Harness {
    pub fn new(analyzer: Arc<FakeAnalyzer>, summarizer: Arc<FakeSummarizer>) -> Self {
        Self {
            storage: FakeStorage::new(),
            analyzer,
            summarizer,
        }
    }

    pub fn workflow(&self) -> Arc<dyn Workflow> {
        let storage: Arc<dyn ObjectStore> = self.storage.clone();
        Arc::new(
            ProcessDocument::new(
                AnalyzeStep::new(Arc::clone(&storage), self.analyzer.clone(), "input"),
                SummarizeStep::new(self.summarizer.clone()),
                PersistStep::new(storage, "output").with_clock(fixed_clock()),
            )
            .with_policies(StepPolicies::uniform(fast_policy())),
        )
    }

    pub fn engine(&self, store: Arc<dyn InstanceStore>) -> Engine {
        Engine::builder(store).workflow(self.workflow()).build()
    }

    pub fn memory_engine(&self) -> (Engine, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (self.engine(store.clone()), store)
    }
}
