//! Persistence for SimpleKV
//!
//! - [`PersistenceBackend`]: the storage contract
//! - [`LogBackend`], [`SqliteBackend`], [`MemoryBackend`], [`NoopBackend`]: implementations
//! - [`Synchronizer`]: reconciles a backend with an in-memory snapshot
//! - [`open_backend`]: builds a backend from a [`DriverKind`]

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod driver;
pub mod log;
pub mod memory;
pub mod noop;
pub mod sqlite;
pub mod sync;

pub use backend::PersistenceBackend;
pub use driver::{open_backend, DriverKind, DEFAULT_DB_PATH, DEFAULT_LOG_PATH};
pub use log::LogBackend;
pub use memory::MemoryBackend;
pub use noop::NoopBackend;
pub use sqlite::SqliteBackend;
pub use sync::{CancelFlag, SyncReport, Synchronizer};
