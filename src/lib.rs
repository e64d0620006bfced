//! SimpleKV: a concurrent, versioned key-value record store
//!
//! Every key holds its full value history plus string metadata. A
//! [`KvServer`] serves requests from memory and periodically reconciles a
//! persistence backend (append log, SQLite, memory or none) with its
//! current state.
//!
//! ```no_run
//! use simplekv::{KvConfig, KvServer};
//!
//! # async fn run() -> simplekv::KvResult<()> {
//! let server = KvServer::new(KvConfig::from_env())?;
//! server.start().await?;
//! server.set("greeting", "hello")?;
//! assert_eq!(server.get("greeting")?, b"hello");
//! server.stop().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod types;

pub use types::*;
