//! Reconciliation of a backend against an in-memory snapshot
//!
//! A pass makes the backend hold exactly the snapshot's key set:
//!
//! 1. read the backend key list
//! 2. delete every backend key missing from the snapshot
//! 3. write every snapshot record
//! 4. flush
//!
//! The first failing backend operation ends the pass. Nothing is rolled
//! back; the next full pass repairs whatever was left behind.

use crate::backend::PersistenceBackend;
use simplekv_core::{KvError, KvResult, RecordSnapshot, SyncPhase};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared flag that asks a running pass to stop
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// A flag that is not set
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Clear the flag
    pub fn reset(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Outcome of a completed pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    /// Stale backend keys removed
    pub deleted: usize,
    /// Records written
    pub written: usize,
    /// Wall time of the pass
    pub elapsed: Duration,
}

/// Drives reconciliation passes against one backend
#[derive(Clone)]
pub struct Synchronizer {
    backend: Arc<dyn PersistenceBackend>,
}

impl std::fmt::Debug for Synchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Synchronizer")
            .field("backend", &self.backend.name())
            .finish()
    }
}

impl Synchronizer {
    /// Create a synchronizer for `backend`
    pub fn new(backend: Arc<dyn PersistenceBackend>) -> Self {
        Self { backend }
    }

    /// The backend being reconciled
    pub fn backend(&self) -> &Arc<dyn PersistenceBackend> {
        &self.backend
    }

    /// Run one full pass
    ///
    /// # Errors
    ///
    /// - `BackendIo` if the backend key list cannot be read
    /// - `PartialSyncFailure` if a delete, write or flush fails
    /// - `SyncCancelled` if `cancel` is set between backend operations
    pub fn sync(&self, snapshot: &[RecordSnapshot], cancel: &CancelFlag) -> KvResult<SyncReport> {
        let started = Instant::now();
        let mut deleted = 0usize;
        let mut written = 0usize;

        tracing::debug!(
            target: "simplekv::sync",
            backend = self.backend.name(),
            records = snapshot.len(),
            "sync pass starting"
        );

        let disk_keys = self.backend.keys().map_err(|e| match e {
            KvError::BackendIo { .. } => e,
            other => KvError::backend(other.to_string()),
        })?;

        let live: HashSet<&str> = snapshot.iter().map(|r| r.key.as_str()).collect();
        let stale: Vec<&String> = disk_keys
            .iter()
            .filter(|k| !live.contains(k.as_str()))
            .collect();

        for key in stale {
            if cancel.is_cancelled() {
                return Err(cancelled(SyncPhase::ApplyDeletes, deleted, written));
            }
            if let Err(e) = self.backend.delete(key) {
                return Err(partial(SyncPhase::ApplyDeletes, deleted, written, e));
            }
            tracing::trace!(target: "simplekv::sync", key = %key, "deleted stale record");
            deleted += 1;
        }

        for record in snapshot {
            if cancel.is_cancelled() {
                return Err(cancelled(SyncPhase::WriteAll, deleted, written));
            }
            if let Err(e) = self.backend.write(record) {
                return Err(partial(SyncPhase::WriteAll, deleted, written, e));
            }
            written += 1;
        }

        if let Err(e) = self.backend.flush() {
            return Err(partial(SyncPhase::WriteAll, deleted, written, e));
        }

        let report = SyncReport {
            deleted,
            written,
            elapsed: started.elapsed(),
        };
        tracing::debug!(
            target: "simplekv::sync",
            backend = self.backend.name(),
            deleted,
            written,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "sync pass complete"
        );
        Ok(report)
    }
}

fn partial(phase: SyncPhase, deleted: usize, written: usize, err: KvError) -> KvError {
    KvError::PartialSyncFailure {
        phase,
        deleted,
        written,
        reason: err.to_string(),
    }
}

fn cancelled(phase: SyncPhase, deleted: usize, written: usize) -> KvError {
    tracing::info!(target: "simplekv::sync", %phase, deleted, written, "sync pass cancelled");
    KvError::SyncCancelled {
        phase,
        deleted,
        written,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use simplekv_core::Record;

    fn snapshot(key: &str, value: &str) -> RecordSnapshot {
        Record::new(key, value.as_bytes().to_vec()).unwrap().snapshot()
    }

    #[test]
    fn test_sync_converges() {
        let backend = Arc::new(MemoryBackend::new());
        backend.write(&snapshot("k2", "old")).unwrap();
        backend.write(&snapshot("k3", "gone")).unwrap();

        let memory = vec![snapshot("k1", "a"), snapshot("k2", "b")];
        let sync = Synchronizer::new(backend.clone());
        let report = sync.sync(&memory, &CancelFlag::new()).unwrap();

        assert_eq!((report.deleted, report.written), (1, 2));
        let mut keys = backend.keys().unwrap();
        keys.sort();
        assert_eq!(keys, vec!["k1", "k2"]);
        for record in &memory {
            assert!(backend.compare(record).unwrap());
        }
    }

    #[test]
    fn test_empty_snapshot_clears_backend() {
        let backend = Arc::new(MemoryBackend::new());
        backend.populate(5).unwrap();
        let sync = Synchronizer::new(backend.clone());
        let report = sync.sync(&[], &CancelFlag::new()).unwrap();
        assert_eq!(report.deleted, 5);
        assert!(backend.is_empty());
    }

    #[test]
    fn test_cancelled_before_first_write() {
        let backend = Arc::new(MemoryBackend::new());
        let sync = Synchronizer::new(backend.clone());
        let cancel = CancelFlag::new();
        cancel.cancel();

        let err = sync.sync(&[snapshot("k", "v")], &cancel).unwrap_err();
        assert_eq!(
            err,
            KvError::SyncCancelled {
                phase: SyncPhase::WriteAll,
                deleted: 0,
                written: 0
            }
        );
        assert!(backend.is_empty());

        cancel.reset();
        sync.sync(&[snapshot("k", "v")], &cancel).unwrap();
        assert_eq!(backend.len(), 1);
    }

    /// Memory backend that raises `cancel` once, after its first delete
    struct CancelAfterDelete {
        inner: MemoryBackend,
        cancel: CancelFlag,
        fired: AtomicBool,
    }

    impl PersistenceBackend for CancelAfterDelete {
        fn name(&self) -> &'static str {
            "cancel-after-delete"
        }

        fn write(&self, record: &RecordSnapshot) -> KvResult<()> {
            self.inner.write(record)
        }

        fn read(&self, key: &str) -> KvResult<RecordSnapshot> {
            self.inner.read(key)
        }

        fn delete(&self, key: &str) -> KvResult<()> {
            self.inner.delete(key)?;
            if !self.fired.swap(true, Ordering::SeqCst) {
                self.cancel.cancel();
            }
            Ok(())
        }

        fn load(&self) -> KvResult<Vec<RecordSnapshot>> {
            self.inner.load()
        }
    }

    #[test]
    fn test_cancelled_between_deletes() {
        let cancel = CancelFlag::new();
        let backend = Arc::new(CancelAfterDelete {
            inner: MemoryBackend::new(),
            cancel: cancel.clone(),
            fired: AtomicBool::new(false),
        });
        backend.inner.populate(3).unwrap();
        let sync = Synchronizer::new(backend.clone());
        let memory = vec![snapshot("k", "v")];

        let err = sync.sync(&memory, &cancel).unwrap_err();
        assert_eq!(
            err,
            KvError::SyncCancelled {
                phase: SyncPhase::ApplyDeletes,
                deleted: 1,
                written: 0
            }
        );
        assert_eq!(backend.inner.len(), 2);
        assert!(backend.inner.read("k").is_err());

        // the next pass picks up where the cancelled one stopped
        cancel.reset();
        let report = sync.sync(&memory, &cancel).unwrap();
        assert_eq!((report.deleted, report.written), (2, 1));
        assert_eq!(backend.keys().unwrap(), vec!["k"]);
        assert!(backend.compare(&memory[0]).unwrap());
    }
}
