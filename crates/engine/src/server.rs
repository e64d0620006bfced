//! Record store server
//!
//! [`KvServer`] wires the in-process [`RecordContainer`] to a persistence
//! backend and owns the lifecycle:
//!
//! - `start`: load every persisted record, then accept requests and begin
//!   periodic sync passes
//! - `stop`: refuse new requests, wait for in-flight ones, stop the periodic
//!   task (cancelling a pass in progress) and run one final pass
//!
//! Request methods are synchronous; only lifecycle and `sync_now` await.

use crate::config::KvConfig;
use parking_lot::Mutex;
use simplekv_core::{
    validate_key, KvError, KvResult, Record, ServerState, ServerStateCell, VersionSelector,
};
use simplekv_durability::{open_backend, CancelFlag, PersistenceBackend, SyncReport, Synchronizer};
use simplekv_storage::RecordContainer;
use std::cell::Cell;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Poll period while waiting for in-flight requests to finish
const DRAIN_POLL: Duration = Duration::from_millis(1);

// ============================================================================
// Sync worker
// ============================================================================

/// Everything a sync pass needs, cheap to clone into the periodic task
#[derive(Clone, Debug)]
struct SyncWorker {
    container: Arc<RecordContainer>,
    synchronizer: Synchronizer,
    cancel: CancelFlag,
    /// Serializes passes so an older snapshot never lands after a newer one
    pass_lock: Arc<tokio::sync::Mutex<()>>,
}

impl SyncWorker {
    async fn run_pass(&self) -> KvResult<SyncReport> {
        let _pass = self.pass_lock.lock().await;
        let container = Arc::clone(&self.container);
        let synchronizer = self.synchronizer.clone();
        let cancel = self.cancel.clone();
        tokio::task::spawn_blocking(move || {
            let snapshot = container.snapshot();
            synchronizer.sync(&snapshot, &cancel)
        })
        .await
        .map_err(|e| KvError::backend(format!("sync pass aborted: {}", e)))?
    }
}

struct SyncTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

fn spawn_sync_task(
    worker: SyncWorker,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick fires immediately; the initial load already matches disk
        tick.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tick.tick() => match worker.run_pass().await {
                    Ok(report) => tracing::debug!(
                        target: "simplekv::sync",
                        deleted = report.deleted,
                        written = report.written,
                        "periodic sync complete"
                    ),
                    Err(KvError::SyncCancelled { .. }) => break,
                    Err(e) => tracing::warn!(
                        target: "simplekv::sync",
                        error = %e,
                        "periodic sync failed, retrying next cycle"
                    ),
                },
            }
        }
        tracing::debug!(target: "simplekv::sync", "periodic sync task exiting");
    })
}

// ============================================================================
// In-flight tracking
// ============================================================================

/// Counts a request for the drain in `stop`
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Server
// ============================================================================

/// Concurrent versioned record store with periodic persistence
pub struct KvServer {
    config: KvConfig,
    container: Arc<RecordContainer>,
    backend: Arc<dyn PersistenceBackend>,
    worker: SyncWorker,
    state: ServerStateCell,
    in_flight: AtomicUsize,
    task: Mutex<Option<SyncTask>>,
}

impl std::fmt::Debug for KvServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvServer")
            .field("state", &self.state.get())
            .field("backend", &self.backend.name())
            .field("records", &self.container.len())
            .finish()
    }
}

impl KvServer {
    /// Open the configured backend and build a server in `Unknown` state
    pub fn new(config: KvConfig) -> KvResult<Self> {
        let backend = open_backend(config.driver, config.location.as_deref())?;
        Ok(Self::with_backend(config, backend))
    }

    /// Build a server over an already-open backend
    pub fn with_backend(config: KvConfig, backend: Arc<dyn PersistenceBackend>) -> Self {
        let container = Arc::new(RecordContainer::new());
        let worker = SyncWorker {
            container: Arc::clone(&container),
            synchronizer: Synchronizer::new(Arc::clone(&backend)),
            cancel: CancelFlag::new(),
            pass_lock: Arc::new(tokio::sync::Mutex::new(())),
        };
        Self {
            config,
            container,
            backend,
            worker,
            state: ServerStateCell::new(),
            in_flight: AtomicUsize::new(0),
            task: Mutex::new(None),
        }
    }

    /// Active configuration
    pub fn config(&self) -> &KvConfig {
        &self.config
    }

    /// The persistence backend
    pub fn backend(&self) -> &Arc<dyn PersistenceBackend> {
        &self.backend
    }

    /// Current lifecycle state
    pub fn status(&self) -> ServerState {
        self.state.get()
    }

    /// Number of records held in memory
    pub fn record_count(&self) -> usize {
        self.container.len()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Load persisted records and begin serving
    ///
    /// Allowed from `Unknown` or `Stopped`. A load failure leaves the server
    /// in `Error`.
    pub async fn start(&self) -> KvResult<()> {
        self.state.transition_from_any(
            &[ServerState::Unknown, ServerState::Stopped],
            ServerState::Starting,
        )?;
        tracing::info!(
            target: "simplekv::server",
            backend = self.backend.name(),
            sync_interval_secs = self.config.sync_interval.as_secs(),
            "starting"
        );

        let loaded = match self.load().await {
            Ok(loaded) => loaded,
            Err(e) => {
                tracing::error!(target: "simplekv::server", error = %e, "failed to load persisted records");
                self.state.transition(ServerState::Starting, ServerState::Error)?;
                return Err(e);
            }
        };

        self.worker.cancel.reset();
        self.state.transition(ServerState::Starting, ServerState::Running)?;

        let (shutdown, rx) = watch::channel(false);
        let handle = spawn_sync_task(self.worker.clone(), self.config.sync_interval, rx);
        *self.task.lock() = Some(SyncTask { shutdown, handle });

        tracing::info!(target: "simplekv::server", records = loaded, "running");
        Ok(())
    }

    /// Replace the container contents with the backend's records. A backend
    /// that retains nothing leaves the container as it is, so a restart
    /// under the `none` driver keeps what the previous run held.
    async fn load(&self) -> KvResult<usize> {
        if !self.backend.retains_records() {
            return Ok(self.container.len());
        }
        let backend = Arc::clone(&self.backend);
        let snapshots = tokio::task::spawn_blocking(move || backend.load())
            .await
            .map_err(|e| KvError::backend(format!("load task failed: {}", e)))??;
        self.container.clear();
        self.container.bulk_load(snapshots)
    }

    /// Drain requests, stop the periodic task and run a final sync
    ///
    /// Ends in `Stopped`, or in `Error` if the final sync fails.
    pub async fn stop(&self) -> KvResult<SyncReport> {
        self.state
            .transition(ServerState::Running, ServerState::Stopping)?;
        tracing::info!(target: "simplekv::server", "stopping");

        while self.in_flight.load(Ordering::SeqCst) > 0 {
            tokio::time::sleep(DRAIN_POLL).await;
        }

        let task = self.task.lock().take();
        if let Some(task) = task {
            self.worker.cancel.cancel();
            let _ = task.shutdown.send(true);
            if let Err(e) = task.handle.await {
                tracing::warn!(target: "simplekv::server", error = %e, "sync task ended abnormally");
            }
            self.worker.cancel.reset();
        }

        match self.worker.run_pass().await {
            Ok(report) => {
                self.state
                    .transition(ServerState::Stopping, ServerState::Stopped)?;
                tracing::info!(
                    target: "simplekv::server",
                    deleted = report.deleted,
                    written = report.written,
                    "stopped"
                );
                Ok(report)
            }
            Err(e) => {
                tracing::error!(target: "simplekv::server", error = %e, "final sync failed");
                self.state
                    .transition(ServerState::Stopping, ServerState::Error)?;
                Err(e)
            }
        }
    }

    /// Run a sync pass now instead of waiting for the next tick
    pub async fn sync_now(&self) -> KvResult<SyncReport> {
        let _op = self.enter()?;
        self.worker.run_pass().await
    }

    fn enter(&self) -> KvResult<InFlight<'_>> {
        // count first so a concurrent stop either sees us or we see it
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let guard = InFlight(&self.in_flight);
        match self.state.get() {
            ServerState::Running => Ok(guard),
            state => Err(KvError::NotRunning {
                state: state.to_string(),
            }),
        }
    }

    // ========================================================================
    // Values
    // ========================================================================

    /// Current value of `key`
    pub fn get(&self, key: &str) -> KvResult<Vec<u8>> {
        self.get_version(key, VersionSelector::Latest)
    }

    /// Value of `key` at `version`
    pub fn get_version(&self, key: &str, version: VersionSelector) -> KvResult<Vec<u8>> {
        let _op = self.enter()?;
        let result = validate_key(key).and_then(|()| {
            self.container
                .get(key)
                .ok_or_else(|| KvError::key_not_found(key))?
                .value_at(version)
        });
        observe("get", key, result)
    }

    /// Store `value` as the newest version of `key`, creating the record if
    /// needed. Returns the version index written.
    pub fn set(&self, key: &str, value: impl Into<Vec<u8>>) -> KvResult<u64> {
        let _op = self.enter()?;
        // exactly one of the two closures takes it
        let value = Cell::new(Some(value.into()));
        let result = self.container.update_or_insert(
            key,
            || {
                let record = Record::new(key, value.take().unwrap_or_default())?;
                Ok((record, 0))
            },
            |record| Ok(record.update_value(value.take().unwrap_or_default())),
        );
        let version = observe("set", key, result)?;
        tracing::debug!(target: "simplekv::server", key = %key, version, "set");
        Ok(version)
    }

    /// Remove `key` and its whole history
    pub fn delete(&self, key: &str) -> KvResult<()> {
        let _op = self.enter()?;
        let result = validate_key(key).and_then(|()| {
            if self.container.delete(key) {
                tracing::debug!(target: "simplekv::server", key = %key, "deleted");
                Ok(())
            } else {
                Err(KvError::key_not_found(key))
            }
        });
        observe("delete", key, result)
    }

    // ========================================================================
    // Metadata
    // ========================================================================

    /// Set one metadata entry on an existing record
    pub fn set_metadata(&self, key: &str, metadata_key: &str, value: &str) -> KvResult<u64> {
        let _op = self.enter()?;
        let result = self
            .container
            .update(key, |record| record.set_metadata(metadata_key, value));
        observe("set_metadata", key, result)
    }

    /// Read one metadata entry
    pub fn get_metadata(&self, key: &str, metadata_key: &str) -> KvResult<String> {
        let _op = self.enter()?;
        let result = validate_key(key).and_then(|()| {
            self.container
                .get(key)
                .ok_or_else(|| KvError::key_not_found(key))?
                .get_metadata(metadata_key)
        });
        observe("get_metadata", key, result)
    }

    /// Remove one metadata entry
    pub fn delete_metadata(&self, key: &str, metadata_key: &str) -> KvResult<u64> {
        let _op = self.enter()?;
        let result = self
            .container
            .update(key, |record| record.delete_metadata(metadata_key));
        observe("delete_metadata", key, result)
    }

    /// Every metadata entry of `key`, including `Version`
    pub fn list_metadata(&self, key: &str) -> KvResult<BTreeMap<String, String>> {
        let _op = self.enter()?;
        let result = validate_key(key).and_then(|()| {
            self.container
                .get(key)
                .map(|record| record.list_metadata())
                .ok_or_else(|| KvError::key_not_found(key))
        });
        observe("list_metadata", key, result)
    }

    // ========================================================================
    // Search
    // ========================================================================

    /// Keys beginning with `prefix`, sorted
    pub fn find(&self, prefix: &str) -> KvResult<Vec<String>> {
        let _op = self.enter()?;
        Ok(self.container.find(prefix))
    }

    /// Keys whose metadata satisfies every `field:operator:value` clause
    pub fn find_by_metadata(&self, query: &str) -> KvResult<Vec<String>> {
        let _op = self.enter()?;
        observe("find_by_metadata", query, self.container.find_by_metadata(query))
    }
}

// ============================================================================
// Request failure logging
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Failure {
    /// Bad caller input
    Rejected,
    /// Lookup found nothing
    Missing,
    /// Anything else; worth an operator's attention
    Fault,
}

fn classify(err: &KvError) -> Failure {
    if err.is_validation() {
        Failure::Rejected
    } else if err.is_not_found() {
        Failure::Missing
    } else {
        Failure::Fault
    }
}

fn observe<T>(op: &'static str, key: &str, result: KvResult<T>) -> KvResult<T> {
    if let Err(e) = &result {
        match classify(e) {
            Failure::Rejected => {
                tracing::debug!(target: "simplekv::server", op, key = %key, error = %e, "request rejected")
            }
            Failure::Missing => {
                tracing::trace!(target: "simplekv::server", op, key = %key, error = %e, "not found")
            }
            Failure::Fault => {
                tracing::warn!(target: "simplekv::server", op, key = %key, error = %e, "request failed")
            }
        }
    }
    result
}

impl Drop for KvServer {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.handle.abort();
        }
    }
}
