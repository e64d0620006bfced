//! Backend that persists nothing

use crate::backend::PersistenceBackend;
use simplekv_core::{KvError, KvResult, RecordSnapshot};

/// Accepts every write and stores nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBackend;

impl NoopBackend {
    /// Create the backend
    pub fn new() -> Self {
        NoopBackend
    }
}

impl PersistenceBackend for NoopBackend {
    fn name(&self) -> &'static str {
        "none"
    }

    fn write(&self, _record: &RecordSnapshot) -> KvResult<()> {
        Ok(())
    }

    fn read(&self, key: &str) -> KvResult<RecordSnapshot> {
        Err(KvError::key_not_found(key))
    }

    fn delete(&self, _key: &str) -> KvResult<()> {
        Ok(())
    }

    fn load(&self) -> KvResult<Vec<RecordSnapshot>> {
        Ok(Vec::new())
    }

    fn keys(&self) -> KvResult<Vec<String>> {
        Ok(Vec::new())
    }

    fn retains_records(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simplekv_core::Record;

    #[test]
    fn test_noop_stores_nothing() {
        let backend = NoopBackend::new();
        let record = Record::new("k", b"v".to_vec()).unwrap().snapshot();
        backend.write(&record).unwrap();
        assert!(backend.load().unwrap().is_empty());
        assert!(backend.read("k").is_err());
        assert!(!backend.compare(&record).unwrap());
        assert!(!backend.retains_records());
    }
}
