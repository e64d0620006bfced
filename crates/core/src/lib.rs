//! Core types for SimpleKV
//!
//! This crate defines the building blocks shared by every other crate:
//! - [`ValueHistory`]: append-only per-record value log
//! - [`MetadataMap`]: per-record string metadata with a mutation counter
//! - [`Record`] / [`RecordSnapshot`]: live and persisted record forms
//! - [`ServerState`]: lifecycle state machine
//! - [`KvError`]: the error taxonomy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod history;
pub mod metadata;
pub mod record;
pub mod state;

pub use error::{KvError, KvResult, SyncPhase};
pub use history::{ValueHistory, VersionSelector};
pub use metadata::{MetadataMap, VERSION_KEY};
pub use record::{validate_key, Record, RecordSnapshot};
pub use state::{ServerState, ServerStateCell};
