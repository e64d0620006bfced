//! Server lifecycle against real backends

use simplekv_core::{KvError, KvResult, RecordSnapshot, ServerState, VersionSelector};
use simplekv_durability::{DriverKind, MemoryBackend, PersistenceBackend};
use simplekv_engine::{KvConfig, KvServer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

fn file_config(driver: DriverKind, dir: &TempDir, file: &str) -> KvConfig {
    KvConfig {
        driver,
        location: Some(dir.path().join(file)),
        ..KvConfig::default()
    }
}

/// Memory backend whose `load` and `write` can be switched to fail
#[derive(Default)]
struct BrokenBackend {
    inner: MemoryBackend,
    fail_load: AtomicBool,
    fail_write: AtomicBool,
}

impl PersistenceBackend for BrokenBackend {
    fn name(&self) -> &'static str {
        "broken"
    }

    fn write(&self, record: &RecordSnapshot) -> KvResult<()> {
        if self.fail_write.load(Ordering::SeqCst) {
            return Err(KvError::backend("disk full"));
        }
        self.inner.write(record)
    }

    fn read(&self, key: &str) -> KvResult<RecordSnapshot> {
        self.inner.read(key)
    }

    fn delete(&self, key: &str) -> KvResult<()> {
        self.inner.delete(key)
    }

    fn load(&self) -> KvResult<Vec<RecordSnapshot>> {
        if self.fail_load.load(Ordering::SeqCst) {
            return Err(KvError::backend("disk unavailable"));
        }
        self.inner.load()
    }
}

async fn restart_round_trip(driver: DriverKind, file: &str) {
    let dir = TempDir::new().unwrap();
    {
        let server = KvServer::new(file_config(driver, &dir, file)).unwrap();
        server.start().await.unwrap();
        server.set("apple", "red").unwrap();
        server.set("apple", "green").unwrap();
        server.set("banana", "yellow").unwrap();
        server.set_metadata("apple", "origin", "kent").unwrap();
        server.stop().await.unwrap();
    }

    let server = KvServer::new(file_config(driver, &dir, file)).unwrap();
    server.start().await.unwrap();
    assert_eq!(server.get("apple").unwrap(), b"green");
    assert_eq!(
        server.get_version("apple", VersionSelector::At(0)).unwrap(),
        b"red"
    );
    assert_eq!(server.get_metadata("apple", "origin").unwrap(), "kent");
    assert_eq!(server.get_metadata("apple", "Version").unwrap(), "3");
    assert_eq!(server.find("").unwrap(), vec!["apple", "banana"]);
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_log_backend_restart() {
    restart_round_trip(DriverKind::Log, "kv.log").await;
}

#[tokio::test]
async fn test_sqlite_backend_restart() {
    restart_round_trip(DriverKind::Sqlite, "kv.db").await;
}

#[tokio::test]
async fn test_deletes_survive_restart() {
    let dir = TempDir::new().unwrap();
    {
        let server = KvServer::new(file_config(DriverKind::Log, &dir, "kv.log")).unwrap();
        server.start().await.unwrap();
        server.set("a", "1").unwrap();
        server.set("b", "2").unwrap();
        server.sync_now().await.unwrap();
        server.delete("a").unwrap();
        server.stop().await.unwrap();
    }
    let server = KvServer::new(file_config(DriverKind::Log, &dir, "kv.log")).unwrap();
    server.start().await.unwrap();
    assert_eq!(server.find("").unwrap(), vec!["b"]);
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_load_failure_enters_error() {
    let backend = Arc::new(BrokenBackend::default());
    backend.fail_load.store(true, Ordering::SeqCst);
    let server = KvServer::with_backend(KvConfig::default(), backend);

    assert!(matches!(server.start().await, Err(KvError::BackendIo { .. })));
    assert_eq!(server.status(), ServerState::Error);
    assert!(matches!(server.get("k"), Err(KvError::NotRunning { .. })));
    // Error is terminal
    assert!(server.start().await.is_err());
}

#[tokio::test]
async fn test_final_sync_failure_enters_error() {
    let backend = Arc::new(BrokenBackend::default());
    let server = KvServer::with_backend(KvConfig::default(), backend.clone());
    server.start().await.unwrap();
    server.set("k", "v").unwrap();

    backend.fail_write.store(true, Ordering::SeqCst);
    let err = server.stop().await.unwrap_err();
    assert!(matches!(err, KvError::PartialSyncFailure { .. }));
    assert_eq!(server.status(), ServerState::Error);
}

#[tokio::test]
async fn test_periodic_failure_keeps_serving() {
    let backend = Arc::new(BrokenBackend::default());
    backend.fail_write.store(true, Ordering::SeqCst);
    let server = KvServer::with_backend(KvConfig::default(), backend.clone());
    server.start().await.unwrap();
    server.set("k", "v").unwrap();

    assert!(server.sync_now().await.is_err());
    assert_eq!(server.status(), ServerState::Running);
    assert_eq!(server.get("k").unwrap(), b"v");

    backend.fail_write.store(false, Ordering::SeqCst);
    server.stop().await.unwrap();
    assert!(backend.inner.read("k").is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sets_same_key_keep_every_version() {
    let server = Arc::new(KvServer::with_backend(
        KvConfig::default(),
        Arc::new(MemoryBackend::new()),
    ));
    server.start().await.unwrap();

    let writers = 16;
    let per_writer = 50;
    std::thread::scope(|scope| {
        for w in 0..writers {
            let server = Arc::clone(&server);
            scope.spawn(move || {
                for i in 0..per_writer {
                    server.set("hot", format!("{}-{}", w, i)).unwrap();
                }
            });
        }
    });

    let expected = (writers * per_writer) as u64;
    let last = expected - 1;
    assert!(server.get_version("hot", VersionSelector::At(last)).is_ok());
    assert!(matches!(
        server.get_version("hot", VersionSelector::At(expected)),
        Err(KvError::OutOfRange { .. })
    ));
    assert_eq!(
        server.get_metadata("hot", "Version").unwrap(),
        expected.to_string()
    );
    server.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sets_distinct_keys() {
    let server = Arc::new(KvServer::with_backend(
        KvConfig::default(),
        Arc::new(MemoryBackend::new()),
    ));
    server.start().await.unwrap();

    std::thread::scope(|scope| {
        for t in 0..8 {
            let server = Arc::clone(&server);
            scope.spawn(move || {
                for i in 0..100 {
                    server.set(&format!("k-{}-{}", t, i), "v").unwrap();
                }
            });
        }
    });

    assert_eq!(server.record_count(), 800);
    assert_eq!(server.find("k-3-").unwrap().len(), 100);
    server.stop().await.unwrap();
}
