//! Public types for the SimpleKV API.
//!
//! Re-exports from the internal crates, grouped by concern.

// ============================================================================
// Records
// ============================================================================

pub use simplekv_core::{Record, RecordSnapshot, VersionSelector, VERSION_KEY};

// ============================================================================
// Errors
// ============================================================================

pub use simplekv_core::{KvError, KvResult, SyncPhase};

// ============================================================================
// Lifecycle
// ============================================================================

pub use simplekv_core::ServerState;
pub use simplekv_engine::{ConfigError, KvConfig, KvServer};

// ============================================================================
// Persistence
// ============================================================================

pub use simplekv_durability::{
    open_backend, DriverKind, LogBackend, MemoryBackend, NoopBackend, PersistenceBackend,
    SqliteBackend, SyncReport,
};

// ============================================================================
// Search
// ============================================================================

pub use simplekv_storage::{MetadataQuery, Operator, RecordContainer};
