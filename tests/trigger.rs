//! Upload detection and worker assembly.

mod support;

use edgequake_docsum::engine::{InstanceRecord, InstanceStatus, InstanceStore, MemoryStore};
use edgequake_docsum::{Clients, DocsumError, Trigger, Worker, WorkerConfig, PROCESS_DOCUMENT};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use support::{FakeAnalyzer, FakeSummarizer, Harness};
use tokio_test::{assert_err, assert_ok};

fn harness() -> Harness {
    let h = Harness::new(FakeAnalyzer::new(), FakeSummarizer::replying("summary"));
    h.storage.put("input", "a.pdf", b"first document");
    h.storage.put("input", "b.pdf", b"second document");
    h.storage.put("output", "old.txt", b"unrelated");
    h
}

async fn trigger_for(h: &Harness, engine: &edgequake_docsum::Engine) -> Trigger {
    assert_ok!(Trigger::new(engine.clone(), h.storage.clone(), "input").await)
}

#[tokio::test]
async fn poll_starts_one_instance_per_object() {
    let h = harness();
    let (engine, _) = h.memory_engine();
    let trigger = trigger_for(&h, &engine).await;

    let started = assert_ok!(trigger.poll().await);
    assert_eq!(started.len(), 2);
    engine.wait_idle().await;

    let again = assert_ok!(trigger.poll().await);
    assert!(again.is_empty(), "second listing starts nothing");

    let mut inputs: Vec<String> = engine
        .instances()
        .await
        .unwrap()
        .into_iter()
        .map(|r| {
            assert_eq!(r.status, InstanceStatus::Completed);
            r.input
        })
        .collect();
    inputs.sort();
    assert_eq!(inputs, ["a.pdf", "b.pdf"]);
    assert_eq!(h.storage.names("output").len(), 3);
}

#[tokio::test]
async fn new_trigger_skips_inputs_with_instances() {
    let h = harness();
    let store = Arc::new(MemoryStore::new());

    {
        let engine = h.engine(store.clone());
        let trigger = trigger_for(&h, &engine).await;
        trigger.poll().await.unwrap();
        engine.wait_idle().await;
    }

    // A fresh process over the same store.
    let engine = h.engine(store.clone());
    let trigger = trigger_for(&h, &engine).await;
    assert!(trigger.poll().await.unwrap().is_empty());

    h.storage.put("input", "c.pdf", b"third document");
    let started = trigger.poll().await.unwrap();
    assert_eq!(started.len(), 1);
    engine.wait_idle().await;
    assert_eq!(store.list().await.unwrap().len(), 3);
    assert_eq!(h.analyzer.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn failed_inputs_are_not_resubmitted() {
    let h = Harness::new(FakeAnalyzer::new(), FakeSummarizer::failing("x", 100));
    h.storage.put("input", "a.pdf", b"doc");
    let (engine, _) = h.memory_engine();
    let trigger = trigger_for(&h, &engine).await;

    let id = trigger.poll().await.unwrap()[0];
    let record = engine.wait(id).await.unwrap();
    assert_eq!(record.status, InstanceStatus::Failed);

    assert!(trigger.poll().await.unwrap().is_empty());
}

#[tokio::test]
async fn arrival_paths_are_filtered_and_deduplicated() {
    let h = harness();
    let (engine, _) = h.memory_engine();
    let trigger = trigger_for(&h, &engine).await;

    assert!(trigger.on_arrival("output/a.pdf").await.unwrap().is_none());
    assert!(trigger.on_arrival("a.pdf").await.unwrap().is_none());

    let id = assert_ok!(trigger.on_arrival("input/a.pdf").await).expect("started");
    assert!(trigger.on_arrival("/input/a.pdf").await.unwrap().is_none());
    assert!(trigger.submit("a.pdf").await.unwrap().is_none());

    let record = engine.wait(id).await.unwrap();
    assert_eq!(record.input, "a.pdf");
    assert_eq!(record.status, InstanceStatus::Completed);
}

#[tokio::test]
async fn concurrent_arrivals_start_one_instance() {
    let h = harness();
    let (engine, store) = h.memory_engine();
    let trigger = Arc::new(trigger_for(&h, &engine).await);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let t = Arc::clone(&trigger);
            tokio::spawn(async move { t.on_arrival("input/b.pdf").await })
        })
        .collect();
    let mut started = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap().is_some() {
            started += 1;
        }
    }
    engine.wait_idle().await;

    assert_eq!(started, 1);
    assert_eq!(store.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn listing_failure_is_reported() {
    let h = harness();
    *h.storage.fail_list.lock().unwrap() = true;
    let (engine, store) = h.memory_engine();
    let trigger = trigger_for(&h, &engine).await;

    let err = assert_err!(trigger.poll().await);
    match err {
        DocsumError::Listing { container, .. } => assert_eq!(container, "input"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(store.list().await.unwrap().is_empty());
}

// ── Worker ───────────────────────────────────────────────────────────────────

fn worker_config() -> WorkerConfig {
    assert_ok!(WorkerConfig::builder()
        .storage_endpoint("unused")
        .analysis_endpoint("https://unused.example")
        .llm_provider("mock")
        .retry_initial_delay(Duration::from_millis(1))
        .build())
}

fn fake_clients(h: &Harness) -> Clients {
    Clients {
        storage: h.storage.clone(),
        analyzer: h.analyzer.clone(),
        summarizer: h.summarizer.clone(),
    }
}

#[tokio::test]
async fn worker_processes_inputs_and_resumes() {
    let h = harness();
    let store: Arc<dyn InstanceStore> = Arc::new(MemoryStore::new());
    let config = worker_config();

    let worker = assert_ok!(Worker::new(&config, fake_clients(&h), store.clone(), None).await);
    assert!(assert_ok!(worker.recover().await).is_empty());
    let started = assert_ok!(worker.poll_once().await);
    assert_eq!(started.len(), 2);
    worker.engine().wait_idle().await;

    let outputs: Vec<String> = h
        .storage
        .names("output")
        .into_iter()
        .filter(|n| n != "old.txt")
        .collect();
    assert_eq!(outputs.len(), 2);
    for name in &outputs {
        assert!(name.ends_with(".txt"));
        assert_eq!(name.matches('.').count(), 1, "{name}");
        assert!(name.starts_with("a-pdf-") || name.starts_with("b-pdf-"), "{name}");
        assert_eq!(h.storage.get("output", name).unwrap(), b"summary");
    }

    // A second worker over the same store has nothing to do.
    let worker = Worker::new(&config, fake_clients(&h), store, None)
        .await
        .unwrap();
    assert!(worker.poll_once().await.unwrap().is_empty());
}

#[tokio::test]
async fn worker_run_stops_on_shutdown() {
    let h = harness();
    let store: Arc<dyn InstanceStore> = Arc::new(MemoryStore::new());
    let worker = Worker::new(&worker_config(), fake_clients(&h), store, None)
        .await
        .unwrap();

    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let run = worker.run(Duration::from_millis(5), async {
        let _ = rx.await;
    });
    let stop = async {
        while h.analyzer.calls.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        let _ = tx.send(());
    };

    let (result, ()) = tokio::time::timeout(Duration::from_secs(5), async {
        tokio::join!(run, stop)
    })
    .await
    .expect("worker stops after shutdown");
    assert_ok!(result);
    worker.engine().wait_idle().await;
    assert_eq!(worker.engine().instances().await.unwrap().len(), 2);
}

#[tokio::test]
async fn worker_run_resumes_orphaned_instances_on_tick() {
    let h = harness();
    let store: Arc<dyn InstanceStore> = Arc::new(MemoryStore::new());
    let worker = Worker::new(&worker_config(), fake_clients(&h), store.clone(), None)
        .await
        .unwrap();

    // Left non-terminal by a driver that stopped after the worker started.
    let mut orphan = InstanceRecord::new(PROCESS_DOCUMENT, "a.pdf");
    orphan.begin_step(1).unwrap();

    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let run = worker.run(Duration::from_millis(5), async {
        let _ = rx.await;
    });
    let stop = async {
        // Let the startup recovery pass before the orphan appears.
        tokio::time::sleep(Duration::from_millis(20)).await;
        store.save(&orphan).await.unwrap();
        loop {
            let status = worker.engine().status(orphan.id).await.unwrap().status;
            if status == InstanceStatus::Completed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        let _ = tx.send(());
    };

    let (result, ()) = tokio::time::timeout(Duration::from_secs(5), async {
        tokio::join!(run, stop)
    })
    .await
    .expect("orphaned instance is picked up by a later tick");
    assert_ok!(result);
}
