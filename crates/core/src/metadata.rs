//! Per-record string metadata
//!
//! A [`MetadataMap`] holds arbitrary string pairs plus the reserved
//! [`VERSION_KEY`] entry. The reserved entry is a decimal mutation counter
//! that starts at `1` and advances by exactly one on every successful
//! mutation of the owning record.

use crate::error::{KvError, KvResult};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Reserved metadata key holding the record's mutation counter
pub const VERSION_KEY: &str = "Version";

#[derive(Debug, Clone)]
struct Inner {
    entries: BTreeMap<String, String>,
    version: u64,
}

/// Lockable string-to-string map with a reserved mutation counter.
#[derive(Debug)]
pub struct MetadataMap {
    inner: RwLock<Inner>,
}

impl MetadataMap {
    /// Create an empty map with `Version = 1`
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                entries: BTreeMap::new(),
                version: 1,
            }),
        }
    }

    /// Rebuild a map from persisted entries.
    ///
    /// The `Version` entry, if present and numeric, restores the counter;
    /// otherwise the counter restarts at 1.
    pub fn from_entries(mut entries: BTreeMap<String, String>) -> Self {
        let version = entries
            .remove(VERSION_KEY)
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(1);
        Self {
            inner: RwLock::new(Inner { entries, version }),
        }
    }

    /// Insert or overwrite an entry, returning the new counter value
    pub fn set(&self, key: &str, value: &str) -> KvResult<u64> {
        validate_entry(key, value)?;
        let mut inner = self.inner.write();
        inner.entries.insert(key.to_string(), value.to_string());
        inner.version += 1;
        Ok(inner.version)
    }

    /// Look up an entry. The reserved `Version` key is readable.
    pub fn get(&self, key: &str) -> Option<String> {
        let inner = self.inner.read();
        if key == VERSION_KEY {
            return Some(inner.version.to_string());
        }
        inner.entries.get(key).cloned()
    }

    /// Remove an entry, returning the new counter value, or `None` if absent
    pub fn delete(&self, key: &str) -> KvResult<Option<u64>> {
        if key.is_empty() {
            return Err(KvError::EmptyKey);
        }
        if key == VERSION_KEY {
            return Err(KvError::ReservedMetadataKey {
                metadata_key: key.to_string(),
            });
        }
        let mut inner = self.inner.write();
        if inner.entries.remove(key).is_none() {
            return Ok(None);
        }
        inner.version += 1;
        Ok(Some(inner.version))
    }

    /// Advance the counter without touching entries (value append)
    pub fn bump_version(&self) -> u64 {
        let mut inner = self.inner.write();
        inner.version += 1;
        inner.version
    }

    /// Current counter value
    pub fn version(&self) -> u64 {
        self.inner.read().version
    }

    /// Snapshot copy of every entry, including `Version`
    pub fn list_all(&self) -> BTreeMap<String, String> {
        let inner = self.inner.read();
        let mut all = inner.entries.clone();
        all.insert(VERSION_KEY.to_string(), inner.version.to_string());
        all
    }

    /// Number of entries, including `Version`
    pub fn len(&self) -> usize {
        self.inner.read().entries.len() + 1
    }

    /// Never true: the reserved entry is always present
    pub fn is_empty(&self) -> bool {
        false
    }
}

impl Default for MetadataMap {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MetadataMap {
    fn clone(&self) -> Self {
        Self {
            inner: RwLock::new(self.inner.read().clone()),
        }
    }
}

/// Validate a metadata pair supplied by a caller
pub fn validate_entry(key: &str, value: &str) -> KvResult<()> {
    if key.is_empty() {
        return Err(KvError::EmptyKey);
    }
    if value.is_empty() {
        return Err(KvError::EmptyValue);
    }
    if key == VERSION_KEY {
        return Err(KvError::ReservedMetadataKey {
            metadata_key: key.to_string(),
        });
    }
    Ok(())
}
