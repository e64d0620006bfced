//! End-to-end suite for the public `simplekv` API
//!
//! - `store_properties`: behaviour of a running server (versions, metadata,
//!   search, concurrency)
//! - `persistence`: restart and reconciliation across backends
//!
//! ```bash
//! cargo test --test end_to_end
//! ```

mod test_utils;

mod persistence;
mod store_properties;
