//! SimpleKV server engine
//!
//! - [`KvServer`]: lifecycle, request facade and periodic persistence
//! - [`KvConfig`]: driver, location and sync interval from TOML or env

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod server;

pub use config::{parse_interval, ConfigError, KvConfig, DEFAULT_SYNC_INTERVAL};
pub use server::KvServer;
