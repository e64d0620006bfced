//! Restart and reconciliation across backends

use crate::test_utils::file_config;
use simplekv::{
    DriverKind, KvConfig, KvServer, MemoryBackend, PersistenceBackend, ServerState,
    VersionSelector,
};
use std::sync::Arc;
use tempfile::TempDir;

#[tokio::test]
async fn test_memory_backend_converges_on_stop() {
    let backend = Arc::new(MemoryBackend::new());
    backend.populate(2).unwrap();
    let server = KvServer::with_backend(KvConfig::default(), backend.clone());
    server.start().await.unwrap();

    // memory {key-1, k1}, backend {key-0, key-1}
    server.delete("key-0").unwrap();
    server.set("k1", "new").unwrap();
    server.stop().await.unwrap();

    let mut keys = backend.keys().unwrap();
    keys.sort();
    assert_eq!(keys, vec!["k1", "key-1"]);
}

#[tokio::test]
async fn test_history_survives_restart_on_every_file_driver() {
    for (driver, file) in [(DriverKind::Log, "kv.log"), (DriverKind::Sqlite, "kv.db")] {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(file);
        {
            let server = KvServer::new(file_config(driver, &path)).unwrap();
            server.start().await.unwrap();
            for i in 0..5 {
                server.set("k", format!("v{}", i)).unwrap();
            }
            server.set_metadata("k", "tag", "t").unwrap();
            server.stop().await.unwrap();
            assert_eq!(server.status(), ServerState::Stopped);
        }

        let server = KvServer::new(file_config(driver, &path)).unwrap();
        server.start().await.unwrap();
        assert_eq!(server.get("k").unwrap(), b"v4", "{}", driver);
        assert_eq!(
            server.get_version("k", VersionSelector::At(2)).unwrap(),
            b"v2"
        );
        assert_eq!(server.get_metadata("k", "tag").unwrap(), "t");
        // the counter keeps rising from where it left off
        server.set("k", "v5").unwrap();
        assert_eq!(server.get_metadata("k", "Version").unwrap(), "7");
        server.stop().await.unwrap();
    }
}

#[tokio::test]
async fn test_none_driver_forgets() {
    let config = KvConfig {
        driver: DriverKind::None,
        ..KvConfig::default()
    };
    let server = KvServer::new(config.clone()).unwrap();
    server.start().await.unwrap();
    server.set("k", "v").unwrap();
    server.stop().await.unwrap();

    let server = KvServer::new(config).unwrap();
    server.start().await.unwrap();
    assert_eq!(server.record_count(), 0);
    server.stop().await.unwrap();
}
