//! Sharded record container
//!
//! The authoritative in-process collection of every [`Record`], keyed by
//! record key.
//!
//! # Design
//!
//! - DashMap: 16-way sharded by default, each shard behind its own lock
//! - FxHash: fast non-crypto hashing of string keys
//! - Records are shared as `Arc<Record>` and mutated through their own locks
//!
//! # Thread Safety
//!
//! - get(): read-locks one shard only
//! - set()/delete(): write-lock one shard only
//! - update_or_insert()/update(): hold the key's shard write lock for the
//!   whole read-modify-write, so two writers to the same key never lose an
//!   update
//! - snapshot(): copy-on-read, shard by shard; may be stale by the time it
//!   is used, which is fine for reconciliation

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rustc_hash::FxHasher;
use simplekv_core::{validate_key, KvError, KvResult, Record, RecordSnapshot};
use std::hash::BuildHasherDefault;
use std::sync::Arc;

use crate::query::MetadataQuery;

type FxBuild = BuildHasherDefault<FxHasher>;

/// Concurrent map from key to [`Record`]
pub struct RecordContainer {
    records: DashMap<String, Arc<Record>, FxBuild>,
}

impl RecordContainer {
    /// Create an empty container
    pub fn new() -> Self {
        Self {
            records: DashMap::with_hasher(FxBuild::default()),
        }
    }

    /// Create with room for `capacity` records
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: DashMap::with_capacity_and_hasher(capacity, FxBuild::default()),
        }
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the container is empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Check if a key exists
    #[inline]
    pub fn contains(&self, key: &str) -> bool {
        self.records.contains_key(key)
    }

    // ========================================================================
    // Get/Set/Delete
    // ========================================================================

    /// Get a record by key
    #[inline]
    pub fn get(&self, key: &str) -> Option<Arc<Record>> {
        self.records.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Unconditional upsert.
    ///
    /// The caller is responsible for building the right record; combining
    /// a separate `get` with `set` is not atomic. Use
    /// [`update_or_insert`](Self::update_or_insert) for read-modify-write.
    pub fn set(&self, key: &str, record: Record) -> KvResult<()> {
        validate_key(key)?;
        if record.key() != key {
            return Err(KvError::KeyMismatch {
                key: key.to_string(),
                record_key: record.key().to_string(),
            });
        }
        self.records.insert(key.to_string(), Arc::new(record));
        Ok(())
    }

    /// Remove a key, returning the removed record if it existed
    #[inline]
    pub fn remove(&self, key: &str) -> Option<Arc<Record>> {
        self.records.remove(key).map(|(_, record)| record)
    }

    /// Remove a key. Absent keys are not an error.
    pub fn delete(&self, key: &str) -> bool {
        self.remove(key).is_some()
    }

    /// Atomic read-modify-write of one key.
    ///
    /// Runs `update` on the existing record, or stores the record built by
    /// `insert` if the key is absent. The key's shard stays write-locked
    /// for the whole call, so no other writer can interleave.
    pub fn update_or_insert<T>(
        &self,
        key: &str,
        insert: impl FnOnce() -> KvResult<(Record, T)>,
        update: impl FnOnce(&Record) -> KvResult<T>,
    ) -> KvResult<T> {
        validate_key(key)?;
        match self.records.entry(key.to_string()) {
            Entry::Occupied(entry) => update(entry.get().as_ref()),
            Entry::Vacant(entry) => {
                let (record, out) = insert()?;
                if record.key() != key {
                    return Err(KvError::KeyMismatch {
                        key: key.to_string(),
                        record_key: record.key().to_string(),
                    });
                }
                entry.insert(Arc::new(record));
                Ok(out)
            }
        }
    }

    /// Mutate an existing record under its shard lock.
    ///
    /// Fails with `KeyNotFound` if the key is absent.
    pub fn update<T>(&self, key: &str, f: impl FnOnce(&Record) -> KvResult<T>) -> KvResult<T> {
        validate_key(key)?;
        match self.records.get_mut(key) {
            Some(entry) => f(entry.value().as_ref()),
            None => Err(KvError::key_not_found(key)),
        }
    }

    // ========================================================================
    // Search
    // ========================================================================

    /// Keys starting with `prefix`, sorted.
    ///
    /// Keys shorter than `prefix` simply do not match.
    pub fn find(&self, prefix: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .records
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }

    /// Keys whose metadata satisfies every clause of `query`, sorted
    pub fn find_by_metadata(&self, query: &str) -> KvResult<Vec<String>> {
        let query = MetadataQuery::parse(query)?;
        let mut keys: Vec<String> = self
            .records
            .iter()
            .filter(|entry| query.matches(entry.value()))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    /// Every key, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.records.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    // ========================================================================
    // Bulk operations
    // ========================================================================

    /// Insert a batch of persisted records.
    ///
    /// Stops at the first record that cannot be rebuilt; records inserted
    /// before it stay in place. Returns the number inserted.
    pub fn bulk_load(
        &self,
        snapshots: impl IntoIterator<Item = RecordSnapshot>,
    ) -> KvResult<usize> {
        let mut loaded = 0usize;
        for snapshot in snapshots {
            let record = Record::from_snapshot(snapshot)?;
            let key = record.key().to_string();
            self.records.insert(key, Arc::new(record));
            loaded += 1;
        }
        tracing::debug!(target: "simplekv::storage", loaded, "bulk load complete");
        Ok(loaded)
    }

    /// Owned copy of every record, sorted by key
    pub fn snapshot(&self) -> Vec<RecordSnapshot> {
        let mut records: Vec<RecordSnapshot> = self
            .records
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect();
        records.sort_by(|a, b| a.key.cmp(&b.key));
        records
    }

    /// Remove every record
    pub fn clear(&self) {
        self.records.clear();
    }
}

impl Default for RecordContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RecordContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordContainer")
            .field("records", &self.len())
            .finish()
    }
}
