//! End-to-end tests for the receive → resolve → execute → reconcile path,
//! including the full scheduler-to-agent flow.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use rusqlite::Connection;
use tokio::sync::watch;

use conductor_agent::{
    AgentWorker, EntryPoint, EntryPointFactory, EntryPointFault, EntryPointRegistry,
    ExecutionContext, ExecutionEngine,
};
use conductor_core::config::{AgentConfig, SchedulerConfig};
use conductor_packages::{
    Dependency, FsPackageStore, NoRestorer, PackageResolver, PackageStore, ResolvedPackage,
    Restorer,
};
use conductor_queue::{LeaseQueue, QueueMessage, SqliteLeaseQueue};
use conductor_scheduler::SchedulerEngine;
use conductor_store::MetadataStore;

fn build_archive(entries: &[(&str, &str)]) -> Vec<u8> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (path, contents) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, path, contents.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

struct Fixture {
    store: Arc<MetadataStore>,
    queue: Arc<SqliteLeaseQueue>,
    packages: tempfile::TempDir,
    config: AgentConfig,
}

impl Fixture {
    fn new() -> Self {
        let store = Arc::new(MetadataStore::new(Connection::open_in_memory().unwrap()).unwrap());
        let queue =
            Arc::new(SqliteLeaseQueue::new(Connection::open_in_memory().unwrap()).unwrap());
        let packages = tempfile::tempdir().unwrap();
        let config = AgentConfig {
            receive_poll_secs: 1,
            ..AgentConfig::default()
        };
        Self {
            store,
            queue,
            packages,
            config,
        }
    }

    fn put_archive(&self, key: &str, entries: &[(&str, &str)]) {
        FsPackageStore::new(self.packages.path())
            .put(key, &build_archive(entries))
            .unwrap();
    }

    fn engine(&self, registry: EntryPointRegistry) -> ExecutionEngine {
        let resolver = PackageResolver::new(
            Arc::new(FsPackageStore::new(self.packages.path())),
            Arc::new(NoRestorer),
            "py312",
        );
        ExecutionEngine::new(self.store.clone(), resolver, registry, self.config.clone())
    }

    fn worker(&self, registry: EntryPointRegistry) -> AgentWorker {
        AgentWorker::new(
            self.queue.clone(),
            self.engine(registry),
            self.config.clone(),
        )
    }

    /// Seed one enabled job with an in-process instance, as the scheduler
    /// would leave them, and return the matching queue message.
    fn seed_dispatched_job(&self, artifact_key: &str) -> QueueMessage {
        let job = self
            .store
            .create_job("etl", true, None, Some(artifact_key))
            .unwrap();
        let sched = self
            .store
            .create_schedule(job.id, true, [true; 7], None, None, None)
            .unwrap();
        let now = Utc::now();
        let instance_id = self.store.create_instance(sched.id, now, "Scheduler").unwrap();
        let msg = QueueMessage {
            job_instance_id: instance_id,
            job_id: job.id,
            queued_at: now,
            job_environment: None,
            job_queue_name: Some("jobs".into()),
        };
        self.queue.enqueue("jobs", &msg).unwrap();
        msg
    }
}

/// Wait for `predicate` to hold, failing the test after five seconds.
async fn wait_until(mut predicate: impl FnMut() -> bool) {
    for _ in 0..100 {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("condition not reached within deadline");
}

struct FakeEntryPoint {
    lines: Vec<String>,
}

#[async_trait]
impl EntryPoint for FakeEntryPoint {
    async fn run(&self, _ctx: &ExecutionContext) -> Result<Vec<String>, EntryPointFault> {
        Ok(self.lines.clone())
    }
}

struct FakeFactory {
    lines: Vec<String>,
}

impl EntryPointFactory for FakeFactory {
    fn locate(&self, _package: &ResolvedPackage) -> Option<Arc<dyn EntryPoint>> {
        Some(Arc::new(FakeEntryPoint {
            lines: self.lines.clone(),
        }))
    }
}

fn fake_registry(lines: &[&str]) -> EntryPointRegistry {
    let mut registry = EntryPointRegistry::new();
    registry.register(
        conductor_packages::Language::Python,
        Arc::new(FakeFactory {
            lines: lines.iter().map(|s| s.to_string()).collect(),
        }),
    );
    registry
}

const PYTHON_MANIFEST: &str = r#"{"id":"demo","version":"1.0.0","language":"python"}"#;

#[tokio::test]
async fn successful_run_completes_instance_and_deletes_message() {
    let f = Fixture::new();
    f.put_archive(
        "demo.tar.gz",
        &[
            ("manifest.json", PYTHON_MANIFEST),
            ("code_python/main.py", "print('hi')"),
        ],
    );
    let msg = f.seed_dispatched_job("demo.tar.gz");

    let outcome = f
        .engine(fake_registry(&["step one", "step two"]))
        .process(&msg)
        .await
        .unwrap();

    assert!(outcome.success);
    assert!(outcome.logs.contains(&"step one".to_string()));

    let instance = f.store.get_instance(msg.job_instance_id).unwrap().unwrap();
    assert!(instance.is_terminal());
    assert!(!instance.has_error);
    assert_eq!(instance.updated_by.as_deref(), Some("JobExecutor"));

    let job = f.store.get_job(msg.job_id).unwrap().unwrap();
    assert!(!job.queued && !job.in_process && !job.has_error);
}

#[tokio::test]
async fn missing_entry_point_is_reported_and_message_still_deleted() {
    let f = Fixture::new();
    // Code folder exists but the conventional entry file does not.
    f.put_archive(
        "broken.tar.gz",
        &[
            ("manifest.json", PYTHON_MANIFEST),
            ("code_python/helper.py", "pass"),
        ],
    );
    let msg = f.seed_dispatched_job("broken.tar.gz");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = f.worker(EntryPointRegistry::with_defaults());
    let task = tokio::spawn(worker.run(shutdown_rx));

    let store = f.store.clone();
    let instance_id = msg.job_instance_id;
    wait_until(move || {
        store
            .get_instance(instance_id)
            .unwrap()
            .unwrap()
            .is_terminal()
    })
    .await;

    let instance = f.store.get_instance(msg.job_instance_id).unwrap().unwrap();
    assert!(instance.has_error);
    assert!(f.store.get_job(msg.job_id).unwrap().unwrap().has_error);
    // Deterministic defect: the message must not come back.
    assert_eq!(f.queue.depth("jobs").unwrap(), 0);

    shutdown_tx.send(true).unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn missing_entry_point_log_names_the_entry_point() {
    let f = Fixture::new();
    f.put_archive(
        "broken.tar.gz",
        &[
            ("manifest.json", PYTHON_MANIFEST),
            ("code_python/helper.py", "pass"),
        ],
    );
    let msg = f.seed_dispatched_job("broken.tar.gz");

    let outcome = f
        .engine(EntryPointRegistry::with_defaults())
        .process(&msg)
        .await
        .unwrap();

    assert!(!outcome.success);
    assert!(outcome
        .logs
        .iter()
        .any(|l| l.contains("entry point 'execute_job' not found")));
}

#[tokio::test]
async fn misrouted_message_is_rerouted_not_executed() {
    let f = Fixture::new();
    f.put_archive(
        "demo.tar.gz",
        &[
            ("manifest.json", PYTHON_MANIFEST),
            ("code_python/main.py", "print('hi')"),
        ],
    );
    let mut msg = f.seed_dispatched_job("demo.tar.gz");

    // Re-tag the enqueued copy for a different physical queue.
    let (received, handle) = f
        .queue
        .receive("jobs", Duration::from_secs(60))
        .unwrap()
        .unwrap();
    f.queue.delete(&handle).unwrap();
    msg.job_queue_name = Some("etl-heavy".into());
    assert_eq!(received.job_instance_id, msg.job_instance_id);
    f.queue.enqueue("jobs", &msg).unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = f.worker(fake_registry(&[]));
    let task = tokio::spawn(worker.run(shutdown_rx));

    let queue = f.queue.clone();
    wait_until(move || queue.depth("etl-heavy").unwrap() == 1).await;
    assert_eq!(f.queue.depth("jobs").unwrap(), 0);

    // Never executed here, so the instance is still in process.
    let instance = f.store.get_instance(msg.job_instance_id).unwrap().unwrap();
    assert!(instance.in_process);

    shutdown_tx.send(true).unwrap();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn execution_deadline_is_an_execution_fault() {
    struct StallingEntryPoint;

    #[async_trait]
    impl EntryPoint for StallingEntryPoint {
        async fn run(&self, _ctx: &ExecutionContext) -> Result<Vec<String>, EntryPointFault> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Vec::new())
        }
    }

    struct StallingFactory;

    impl EntryPointFactory for StallingFactory {
        fn locate(&self, _package: &ResolvedPackage) -> Option<Arc<dyn EntryPoint>> {
            Some(Arc::new(StallingEntryPoint))
        }
    }

    let f = Fixture::new();
    f.put_archive(
        "slow.tar.gz",
        &[
            ("manifest.json", PYTHON_MANIFEST),
            ("code_python/main.py", "print('hi')"),
        ],
    );
    let msg = f.seed_dispatched_job("slow.tar.gz");

    let mut registry = EntryPointRegistry::new();
    registry.register(conductor_packages::Language::Python, Arc::new(StallingFactory));

    let outcome = f.engine(registry).process(&msg).await.unwrap();

    assert!(!outcome.success);
    assert!(outcome.logs.iter().any(|l| l.contains("deadline")));
    let instance = f.store.get_instance(msg.job_instance_id).unwrap().unwrap();
    assert!(instance.has_error && instance.is_terminal());
}

#[tokio::test(start_paused = true)]
async fn hung_dependency_restore_hits_the_execution_deadline() {
    struct HangingRestorer;

    #[async_trait]
    impl Restorer for HangingRestorer {
        async fn restore(
            &self,
            _deps: &[Dependency],
            _work_dir: &Path,
        ) -> conductor_packages::Result<Vec<PathBuf>> {
            std::future::pending().await
        }
    }

    let f = Fixture::new();
    f.put_archive(
        "stuck.tar.gz",
        &[
            (
                "manifest.json",
                r#"{"id":"stuck","version":"1.0.0","language":"python",
                   "dependencies":[{"id":"requests","version":"2.32"}]}"#,
            ),
            ("code_python/main.py", "print('hi')"),
        ],
    );
    let msg = f.seed_dispatched_job("stuck.tar.gz");

    let resolver = PackageResolver::new(
        Arc::new(FsPackageStore::new(f.packages.path())),
        Arc::new(HangingRestorer),
        "py312",
    );
    let engine = ExecutionEngine::new(
        f.store.clone(),
        resolver,
        EntryPointRegistry::with_defaults(),
        f.config.clone(),
    );

    let outcome = engine.process(&msg).await.unwrap();

    assert!(!outcome.success);
    assert!(outcome.logs.iter().any(|l| l.contains("deadline")));
    let instance = f.store.get_instance(msg.job_instance_id).unwrap().unwrap();
    assert!(instance.has_error && instance.is_terminal());
}

#[tokio::test]
async fn scheduler_to_agent_round_trip() {
    let f = Fixture::new();
    f.put_archive(
        "demo.tar.gz",
        &[
            ("manifest.json", PYTHON_MANIFEST),
            ("code_python/main.py", "print('hi')"),
        ],
    );
    let job = f
        .store
        .create_job("etl", true, None, Some("demo.tar.gz"))
        .unwrap();
    f.store
        .create_schedule(job.id, true, [true; 7], None, None, None)
        .unwrap();

    let scheduler = SchedulerEngine::new(
        f.store.clone(),
        f.queue.clone(),
        SchedulerConfig::default(),
    );
    // 2025-06-02 is a Monday.
    let now = Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap();
    let report = scheduler.tick(now).unwrap();
    assert_eq!(report.dispatched, 1);
    assert_eq!(f.queue.depth("jobs").unwrap(), 1);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = f.worker(fake_registry(&["done"]));
    let task = tokio::spawn(worker.run(shutdown_rx));

    let queue = f.queue.clone();
    wait_until(move || queue.depth("jobs").unwrap() == 0).await;

    let store = f.store.clone();
    wait_until(move || !store.get_job(job.id).unwrap().unwrap().queued).await;

    let job = f.store.get_job(job.id).unwrap().unwrap();
    assert!(!job.in_process && !job.has_error);
    // The dispatched instance is the schedule's only one, now completed.
    let instance = f.store.get_instance(1).unwrap().unwrap();
    assert!(instance.is_terminal() && !instance.has_error);

    shutdown_tx.send(true).unwrap();
    task.await.unwrap();
}
