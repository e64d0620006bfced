//! Persistence contract
//!
//! Every backing store implements [`PersistenceBackend`]. The core only
//! needs four operations (`write`, `read`, `delete`, `load`); the provided
//! methods derive the rest from them and backends override them when they
//! can do better.

use simplekv_core::{KvError, KvResult, RecordSnapshot};

/// Storage contract consumed by the synchronizer and the server
///
/// # Contract
///
/// - `write` stores the full record state atomically, replacing any
///   previous state for the same key
/// - `read` fails with `KeyNotFound` for an absent key
/// - `delete` of an absent key succeeds
/// - `load` returns every stored record
pub trait PersistenceBackend: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Store a record, overwriting any existing entry
    fn write(&self, record: &RecordSnapshot) -> KvResult<()>;

    /// Read a record by key
    fn read(&self, key: &str) -> KvResult<RecordSnapshot>;

    /// Remove a record by key
    fn delete(&self, key: &str) -> KvResult<()>;

    /// Read every stored record
    fn load(&self) -> KvResult<Vec<RecordSnapshot>>;

    /// Every stored key
    fn keys(&self) -> KvResult<Vec<String>> {
        Ok(self.load()?.into_iter().map(|r| r.key).collect())
    }

    /// Whether the stored record has the same current value and metadata
    /// as `record`. An absent key compares unequal.
    fn compare(&self, record: &RecordSnapshot) -> KvResult<bool> {
        match self.read(&record.key) {
            Ok(stored) => Ok(stored.same_state(record)),
            Err(KvError::KeyNotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Make completed writes durable. Called at the end of a sync pass.
    fn flush(&self) -> KvResult<()> {
        Ok(())
    }

    /// Whether `load` can return what earlier passes wrote. A backend that
    /// returns `false` is never used to replace in-memory records.
    fn retains_records(&self) -> bool {
        true
    }
}
