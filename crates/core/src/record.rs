//! Records and their persisted form
//!
//! A [`Record`] is the unit of storage for one key: an identity, the key,
//! the value history and the metadata map. Records are mutated in place
//! through their internal locks, so a container can hand out shared
//! references and still serialize writers per record.
//!
//! [`RecordSnapshot`] is the owned, serializable copy used by the
//! persistence contract and the synchronizer.

use crate::error::{KvError, KvResult};
use crate::history::{ValueHistory, VersionSelector};
use crate::metadata::{validate_entry, MetadataMap, VERSION_KEY};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// One logical key-value entry
#[derive(Debug, Clone)]
pub struct Record {
    id: Uuid,
    key: String,
    history: ValueHistory,
    metadata: MetadataMap,
}

impl Record {
    /// Create a record with `value` as version 0 and `Version = 1`
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>) -> KvResult<Self> {
        let key = key.into();
        validate_key(&key)?;
        Ok(Self {
            id: Uuid::new_v4(),
            key,
            history: ValueHistory::new(value.into()),
            metadata: MetadataMap::new(),
        })
    }

    /// Rebuild a record from its persisted form
    pub fn from_snapshot(snapshot: RecordSnapshot) -> KvResult<Self> {
        validate_key(&snapshot.key)?;
        let history = ValueHistory::from_values(snapshot.values).ok_or_else(|| {
            KvError::corruption(format!("record '{}' has no values", snapshot.key))
        })?;
        Ok(Self {
            id: snapshot.id,
            key: snapshot.key,
            history,
            metadata: MetadataMap::from_entries(snapshot.metadata),
        })
    }

    /// Audit identity
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Lookup key
    pub fn key(&self) -> &str {
        &self.key
    }

    // ========================================================================
    // Values
    // ========================================================================

    /// Append a new value and return its version.
    ///
    /// Also advances the metadata mutation counter.
    pub fn update_value(&self, value: impl Into<Vec<u8>>) -> u64 {
        let version = self.history.append(value.into());
        self.metadata.bump_version();
        version
    }

    /// The current value
    pub fn current_value(&self) -> Vec<u8> {
        self.history.latest()
    }

    /// The value selected by `selector`
    pub fn value_at(&self, selector: VersionSelector) -> KvResult<Vec<u8>> {
        self.history.get(selector)
    }

    /// Version of the current value
    pub fn current_version(&self) -> u64 {
        self.history.current_version()
    }

    /// Number of stored versions
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    // ========================================================================
    // Metadata
    // ========================================================================

    /// Set a metadata entry, returning the new mutation counter
    pub fn set_metadata(&self, metadata_key: &str, value: &str) -> KvResult<u64> {
        validate_entry(metadata_key, value)?;
        self.metadata.set(metadata_key, value)
    }

    /// Read a metadata entry
    pub fn get_metadata(&self, metadata_key: &str) -> KvResult<String> {
        if metadata_key.is_empty() {
            return Err(KvError::EmptyKey);
        }
        self.metadata
            .get(metadata_key)
            .ok_or_else(|| KvError::metadata_not_found(&self.key, metadata_key))
    }

    /// Remove a metadata entry, returning the new mutation counter
    pub fn delete_metadata(&self, metadata_key: &str) -> KvResult<u64> {
        if metadata_key.is_empty() {
            return Err(KvError::EmptyKey);
        }
        if metadata_key == VERSION_KEY {
            return Err(KvError::ReservedMetadataKey {
                metadata_key: metadata_key.to_string(),
            });
        }
        self.metadata
            .delete(metadata_key)?
            .ok_or_else(|| KvError::metadata_not_found(&self.key, metadata_key))
    }

    /// Copy of every metadata entry, including `Version`
    pub fn list_metadata(&self) -> BTreeMap<String, String> {
        self.metadata.list_all()
    }

    /// Look up a metadata entry without producing an error
    pub fn metadata_value(&self, metadata_key: &str) -> Option<String> {
        self.metadata.get(metadata_key)
    }

    /// Current metadata mutation counter
    pub fn metadata_version(&self) -> u64 {
        self.metadata.version()
    }

    /// Owned copy suitable for persistence
    pub fn snapshot(&self) -> RecordSnapshot {
        RecordSnapshot {
            id: self.id,
            key: self.key.clone(),
            values: self.history.to_vec(),
            metadata: self.metadata.list_all(),
        }
    }
}

/// Reject empty record keys
pub fn validate_key(key: &str) -> KvResult<()> {
    if key.is_empty() {
        Err(KvError::EmptyKey)
    } else {
        Ok(())
    }
}

/// Persisted form of a [`Record`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSnapshot {
    /// Audit identity
    pub id: Uuid,
    /// Lookup key
    pub key: String,
    /// Full history, oldest first (base64 on the wire)
    #[serde(with = "base64_values")]
    pub values: Vec<Vec<u8>>,
    /// Metadata including `Version`
    pub metadata: BTreeMap<String, String>,
}

impl RecordSnapshot {
    /// The current value, if any
    pub fn current_value(&self) -> Option<&[u8]> {
        self.values.last().map(Vec::as_slice)
    }

    /// True if both snapshots hold the same current value and metadata.
    ///
    /// This is the convergence check used after a sync: older history and
    /// identity are not compared.
    pub fn same_state(&self, other: &RecordSnapshot) -> bool {
        self.key == other.key
            && self.current_value() == other.current_value()
            && self.metadata == other.metadata
    }
}

mod base64_values {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(values: &[Vec<u8>], s: S) -> Result<S::Ok, S::Error> {
        let encoded: Vec<String> = values.iter().map(|v| STANDARD.encode(v)).collect();
        encoded.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Vec<u8>>, D::Error> {
        let encoded = Vec::<String>::deserialize(d)?;
        encoded
            .iter()
            .map(|s| STANDARD.decode(s).map_err(serde::de::Error::custom))
            .collect()
    }
}
