//! Append-only value history
//!
//! Each record keeps every value it has ever held. Index 0 is the value the
//! record was created with; the last index is the current value. The version
//! of a value is its index, so a history of length N spans versions
//! `0..N`.

use crate::error::{KvError, KvResult};
use parking_lot::RwLock;
use std::fmt;
use std::str::FromStr;

/// Selects a value from a record's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VersionSelector {
    /// The most recently appended value
    #[default]
    Latest,
    /// The value at a 0-based index
    At(u64),
}

impl FromStr for VersionSelector {
    type Err = KvError;

    /// Parse `"latest"` or a non-negative decimal index.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("latest") {
            return Ok(VersionSelector::Latest);
        }
        trimmed
            .parse::<u64>()
            .map(VersionSelector::At)
            .map_err(|_| KvError::InvalidVersion {
                input: s.to_string(),
            })
    }
}

impl fmt::Display for VersionSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionSelector::Latest => f.write_str("latest"),
            VersionSelector::At(v) => write!(f, "{}", v),
        }
    }
}

/// Ordered, append-only sequence of byte blobs.
///
/// # Invariants
///
/// - Never empty: created with an initial value
/// - Length only grows
///
/// Internally serialized so concurrent appends and reads on the same
/// record never race.
#[derive(Debug)]
pub struct ValueHistory {
    values: RwLock<Vec<Vec<u8>>>,
}

impl ValueHistory {
    /// Create a history holding `initial` as version 0
    pub fn new(initial: Vec<u8>) -> Self {
        Self {
            values: RwLock::new(vec![initial]),
        }
    }

    /// Rebuild a history from persisted values, oldest first.
    ///
    /// Returns `None` if `values` is empty.
    pub fn from_values(values: Vec<Vec<u8>>) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        Some(Self {
            values: RwLock::new(values),
        })
    }

    /// Append a value and return its version
    pub fn append(&self, value: Vec<u8>) -> u64 {
        let mut values = self.values.write();
        values.push(value);
        (values.len() - 1) as u64
    }

    /// Read a value by selector
    pub fn get(&self, selector: VersionSelector) -> KvResult<Vec<u8>> {
        let values = self.values.read();
        match selector {
            VersionSelector::Latest => values
                .last()
                .cloned()
                .ok_or(KvError::OutOfRange { requested: 0, len: 0 }),
            VersionSelector::At(version) => usize::try_from(version)
                .ok()
                .and_then(|idx| values.get(idx))
                .cloned()
                .ok_or(KvError::OutOfRange {
                    requested: version,
                    len: values.len() as u64,
                }),
        }
    }

    /// The current value
    pub fn latest(&self) -> Vec<u8> {
        self.values.read().last().cloned().unwrap_or_default()
    }

    /// Version of the current value
    pub fn current_version(&self) -> u64 {
        (self.values.read().len() as u64).saturating_sub(1)
    }

    /// Number of stored versions
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    /// Always false for a constructed history; provided for API symmetry
    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }

    /// Copy of every stored value, oldest first
    pub fn to_vec(&self) -> Vec<Vec<u8>> {
        self.values.read().clone()
    }
}

impl Clone for ValueHistory {
    fn clone(&self) -> Self {
        Self {
            values: RwLock::new(self.to_vec()),
        }
    }
}
