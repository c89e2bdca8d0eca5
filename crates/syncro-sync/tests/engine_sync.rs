//! Integration test: local directory → SyncEngine → transfer chain → MemoryStore
//!
//! Drives the engine with real filesystem events in a temporary directory
//! and checks that the in-memory remote store ends up mirroring them.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use syncro_core::config::{CoalescePolicy, ConfigBuilder};
use syncro_core::domain::RemoteLayout;
use syncro_core::ports::IHandlerProvider;
use syncro_remote::{ConnectionPool, MemorySessionFactory, MemoryStore, PoolSettings};
use syncro_sync::SyncEngine;
use syncro_transfer::{HandlerSettings, TransferHandlerFactory};

async fn transfer_stack(store: &MemoryStore, scratch: &Path) -> Arc<TransferHandlerFactory> {
    let pool = Arc::new(ConnectionPool::new(
        PoolSettings {
            host: "memory".into(),
            port: 21,
            user: "u".into(),
            password: "p".into(),
            max_sessions: 4,
            connect_timeout: Duration::from_secs(5),
        },
        Arc::new(MemorySessionFactory::new(store.clone(), "u", "p")),
        Arc::new(RemoteLayout::default()),
    ));
    let factory = Arc::new(TransferHandlerFactory::new(
        pool,
        HandlerSettings {
            encryption_password: None,
            scratch_dir: scratch.to_path_buf(),
            acquire_timeout_secs: 5,
            history_dir: "history".into(),
        },
    ));
    factory.initialize_remote().await.unwrap();
    factory
}

async fn eventually(what: &str, check: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

struct Running {
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<anyhow::Result<()>>,
}

async fn start(
    root: PathBuf,
    coalesce: CoalescePolicy,
    factory: Arc<TransferHandlerFactory>,
) -> Running {
    let config = ConfigBuilder::new()
        .sync_root(root)
        .sync_workers(4)
        .sync_coalesce(coalesce)
        .build();
    let engine = Arc::new(SyncEngine::new(
        &config.sync,
        factory as Arc<dyn IHandlerProvider>,
    ));
    let cancel = CancellationToken::new();
    let watching = engine.watching();
    let task = {
        let engine = Arc::clone(&engine);
        let cancel = cancel.clone();
        tokio::spawn(async move { engine.run(cancel).await })
    };
    watching.cancelled().await;
    Running { cancel, task }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_local_changes_are_mirrored() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("syncro");
    std::fs::create_dir(&root).unwrap();

    let store = MemoryStore::new();
    let factory = transfer_stack(&store, &dir.path().join("scratch")).await;
    let running = start(root.clone(), CoalescePolicy::ByKind, Arc::clone(&factory)).await;

    // moved in from outside the watched directory: a single creation event
    let staged = dir.path().join("notes.txt");
    std::fs::write(&staged, b"first draft").unwrap();
    std::fs::rename(&staged, root.join("notes.txt")).unwrap();
    eventually("upload", || {
        store.file("/notes.txt").as_deref() == Some(&b"first draft"[..])
    })
    .await;

    std::fs::write(root.join(".DS_Store"), b"finder junk").unwrap();

    std::fs::remove_file(root.join("notes.txt")).unwrap();
    eventually("delete", || !store.contains_file("/notes.txt")).await;
    assert!(!store.contains_file("/.DS_Store"));

    running.cancel.cancel();
    running.task.await.unwrap().unwrap();
    assert_eq!(factory.pool().stats().available_permits, 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_by_file_policy_mirrors_every_file() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("syncro");
    std::fs::create_dir(&root).unwrap();

    let store = MemoryStore::new();
    let factory = transfer_stack(&store, &dir.path().join("scratch")).await;
    let running = start(root.clone(), CoalescePolicy::ByFile, factory).await;

    for i in 0..5 {
        std::fs::write(root.join(format!("batch-{i}.txt")), format!("{i}")).unwrap();
    }
    eventually("all uploads", || {
        (0..5).all(|i| store.contains_file(&format!("/batch-{i}.txt")))
    })
    .await;

    running.cancel.cancel();
    running.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_missing_root_fails_and_closes_workers() {
    let dir = tempfile::tempdir().unwrap();
    let store = MemoryStore::new();
    let factory = transfer_stack(&store, &dir.path().join("scratch")).await;

    let config = ConfigBuilder::new()
        .sync_root(dir.path().join("does-not-exist"))
        .build();
    let engine = SyncEngine::new(&config.sync, factory as Arc<dyn IHandlerProvider>);

    assert!(engine.run(CancellationToken::new()).await.is_err());
    assert!(engine.workers().is_closed());
    assert!(!engine.watching().is_cancelled());
}
