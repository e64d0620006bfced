//! Shared helpers

use simplekv::{DriverKind, KvConfig, KvServer, MemoryBackend};
use std::path::Path;
use std::sync::Arc;

/// Running server over a fresh memory backend
pub async fn memory_server() -> (KvServer, Arc<MemoryBackend>) {
    let backend = Arc::new(MemoryBackend::new());
    let server = KvServer::with_backend(KvConfig::default(), backend.clone());
    server.start().await.unwrap();
    (server, backend)
}

/// Config for a file-backed driver at `path`
pub fn file_config(driver: DriverKind, path: &Path) -> KvConfig {
    KvConfig {
        driver,
        location: Some(path.to_path_buf()),
        ..KvConfig::default()
    }
}
