//! In-memory backend
//!
//! Keeps records in a map. Used for tests and for running without disk.

use crate::backend::PersistenceBackend;
use parking_lot::RwLock;
use simplekv_core::{KvError, KvResult, Record, RecordSnapshot};
use std::collections::HashMap;

/// Mock backend holding records in memory
#[derive(Debug, Default)]
pub struct MemoryBackend {
    records: RwLock<HashMap<String, RecordSnapshot>>,
}

impl MemoryBackend {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed `count` records named `key-{i}` with value `value-{i}`
    pub fn populate(&self, count: usize) -> KvResult<()> {
        let mut records = self.records.write();
        for i in 0..count {
            let key = format!("key-{}", i);
            let record = Record::new(key.clone(), format!("value-{}", i).into_bytes())?;
            records.insert(key, record.snapshot());
        }
        Ok(())
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Check if nothing is stored
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl PersistenceBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn write(&self, record: &RecordSnapshot) -> KvResult<()> {
        tracing::trace!(target: "simplekv::durability", key = %record.key, "memory write");
        self.records
            .write()
            .insert(record.key.clone(), record.clone());
        Ok(())
    }

    fn read(&self, key: &str) -> KvResult<RecordSnapshot> {
        self.records
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| KvError::key_not_found(key))
    }

    fn delete(&self, key: &str) -> KvResult<()> {
        self.records.write().remove(key);
        Ok(())
    }

    fn load(&self) -> KvResult<Vec<RecordSnapshot>> {
        Ok(self.records.read().values().cloned().collect())
    }

    fn keys(&self) -> KvResult<Vec<String>> {
        Ok(self.records.read().keys().cloned().collect())
    }
}
