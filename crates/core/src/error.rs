//! Error taxonomy for SimpleKV
//!
//! Every layer of the store reports failures through [`KvError`]. Validation
//! errors are raised by the first layer that observes them; backend failures
//! are mapped into `BackendIo`/`Serialization`/`Corruption` at the durability
//! boundary; synchronization failures carry how far the pass got.

use thiserror::Error;

/// Result alias used across the workspace.
pub type KvResult<T> = Result<T, KvError>;

/// Phase of a reconciliation pass in which a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// Reading the backend key list
    LoadDisk,
    /// Removing stale backend entries
    ApplyDeletes,
    /// Writing every live record
    WriteAll,
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SyncPhase::LoadDisk => "load-disk",
            SyncPhase::ApplyDeletes => "apply-deletes",
            SyncPhase::WriteAll => "write-all",
        };
        f.write_str(name)
    }
}

/// Errors produced by the record store and its collaborators.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KvError {
    /// A record key or metadata key was empty
    #[error("key cannot be empty")]
    EmptyKey,

    /// A metadata value was empty
    #[error("value cannot be empty")]
    EmptyValue,

    /// No record is stored under the key
    #[error("key not found: {key}")]
    KeyNotFound {
        /// The missing record key
        key: String,
    },

    /// The record exists but has no such metadata entry
    #[error("metadata key '{metadata_key}' not found on '{key}'")]
    MetadataKeyNotFound {
        /// Record key
        key: String,
        /// Missing metadata key
        metadata_key: String,
    },

    /// Callers may not set or delete the reserved `Version` entry
    #[error("metadata key '{metadata_key}' is reserved")]
    ReservedMetadataKey {
        /// The reserved key that was targeted
        metadata_key: String,
    },

    /// A record was stored under a key different from its own
    #[error("record key '{record_key}' does not match container key '{key}'")]
    KeyMismatch {
        /// Container key
        key: String,
        /// Key carried by the record
        record_key: String,
    },

    /// A metadata predicate query could not be parsed
    #[error("invalid query: {reason}")]
    InvalidQuery {
        /// What was wrong with the query
        reason: String,
    },

    /// A version index that has never been written
    #[error("version {requested} is out of range (history has {len} versions)")]
    OutOfRange {
        /// Requested index
        requested: u64,
        /// History length at the time of the request
        len: u64,
    },

    /// A version selector that is neither `latest` nor a non-negative integer
    #[error("invalid version '{input}'")]
    InvalidVersion {
        /// The rejected selector text
        input: String,
    },

    /// A persistence backend operation failed
    #[error("backend I/O error: {message}")]
    BackendIo {
        /// Description of the failure
        message: String,
    },

    /// A record could not be encoded or decoded
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the failure
        message: String,
    },

    /// Persisted data failed an integrity check
    #[error("data corruption: {message}")]
    Corruption {
        /// Description of the damage
        message: String,
    },

    /// A reconciliation pass stopped part-way through
    #[error("sync stopped during {phase} after {deleted} deletes and {written} writes: {reason}")]
    PartialSyncFailure {
        /// Phase in which the pass stopped
        phase: SyncPhase,
        /// Stale keys deleted before the failure
        deleted: usize,
        /// Records written before the failure
        written: usize,
        /// Underlying backend error
        reason: String,
    },

    /// A reconciliation pass was cancelled between backend operations
    #[error("sync cancelled during {phase} after {deleted} deletes and {written} writes")]
    SyncCancelled {
        /// Phase in which the pass was cancelled
        phase: SyncPhase,
        /// Stale keys deleted before cancellation
        deleted: usize,
        /// Records written before cancellation
        written: usize,
    },

    /// The server is not accepting requests in its current state
    #[error("server is not running (state: {state})")]
    NotRunning {
        /// Current lifecycle state name
        state: String,
    },

    /// A lifecycle transition was attempted from the wrong state
    #[error("cannot move server from {from} to {to}")]
    InvalidStateTransition {
        /// State the server was in
        from: String,
        /// State that was requested
        to: String,
    },
}

impl KvError {
    /// Create a KeyNotFound error
    pub fn key_not_found(key: impl Into<String>) -> Self {
        KvError::KeyNotFound { key: key.into() }
    }

    /// Create a MetadataKeyNotFound error
    pub fn metadata_not_found(key: impl Into<String>, metadata_key: impl Into<String>) -> Self {
        KvError::MetadataKeyNotFound {
            key: key.into(),
            metadata_key: metadata_key.into(),
        }
    }

    /// Create an InvalidQuery error
    pub fn invalid_query(reason: impl Into<String>) -> Self {
        KvError::InvalidQuery {
            reason: reason.into(),
        }
    }

    /// Create a BackendIo error
    pub fn backend(message: impl Into<String>) -> Self {
        KvError::BackendIo {
            message: message.into(),
        }
    }

    /// Create a Serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        KvError::Serialization {
            message: message.into(),
        }
    }

    /// Create a Corruption error
    pub fn corruption(message: impl Into<String>) -> Self {
        KvError::Corruption {
            message: message.into(),
        }
    }

    /// True for errors caused by caller input rather than system state
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            KvError::EmptyKey
                | KvError::EmptyValue
                | KvError::ReservedMetadataKey { .. }
                | KvError::KeyMismatch { .. }
                | KvError::InvalidQuery { .. }
                | KvError::InvalidVersion { .. }
        )
    }

    /// True for lookups that found nothing
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            KvError::KeyNotFound { .. }
                | KvError::MetadataKeyNotFound { .. }
                | KvError::OutOfRange { .. }
        )
    }
}

impl From<std::io::Error> for KvError {
    fn from(err: std::io::Error) -> Self {
        KvError::backend(err.to_string())
    }
}

impl From<serde_json::Error> for KvError {
    fn from(err: serde_json::Error) -> Self {
        KvError::serialization(err.to_string())
    }
}
