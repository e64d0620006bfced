//! In-process record storage for SimpleKV
//!
//! - [`RecordContainer`]: sharded map of every live record
//! - [`MetadataQuery`]: parsed `field:operator:value` predicate queries

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod container;
pub mod query;

pub use container::RecordContainer;
pub use query::{Clause, MetadataQuery, Operator};
