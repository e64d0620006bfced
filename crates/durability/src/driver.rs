//! Backend selection

use crate::backend::PersistenceBackend;
use crate::log::LogBackend;
use crate::memory::MemoryBackend;
use crate::noop::NoopBackend;
use crate::sqlite::SqliteBackend;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use simplekv_core::KvResult;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

/// Log file used when none is configured
pub const DEFAULT_LOG_PATH: &str = "simplekv.log";
/// Database file used when none is configured
pub const DEFAULT_DB_PATH: &str = "simplekv.db";

/// Which persistence backend to run with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DriverKind {
    /// Append-only flat file
    #[default]
    Log,
    /// SQLite database
    Sqlite,
    /// In-process map, lost on exit
    Memory,
    /// Persist nothing
    None,
}

impl DriverKind {
    /// Canonical name
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverKind::Log => "log",
            DriverKind::Sqlite => "sqlite",
            DriverKind::Memory => "memory",
            DriverKind::None => "none",
        }
    }

    /// Parse a driver name, falling back to [`DriverKind::Log`] with a
    /// warning for anything unrecognised
    pub fn parse_lossy(name: &str) -> Self {
        name.parse().unwrap_or_else(|_| {
            tracing::warn!(
                target: "simplekv::durability",
                driver = %name,
                "unknown persistence driver, falling back to log"
            );
            DriverKind::Log
        })
    }

    /// File used when no location is configured
    pub fn default_location(&self) -> Option<PathBuf> {
        match self {
            DriverKind::Log => Some(PathBuf::from(DEFAULT_LOG_PATH)),
            DriverKind::Sqlite => Some(PathBuf::from(DEFAULT_DB_PATH)),
            DriverKind::Memory | DriverKind::None => None,
        }
    }
}

impl FromStr for DriverKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "log" | "flat_file" | "file" => Ok(DriverKind::Log),
            "sqlite" => Ok(DriverKind::Sqlite),
            "memory" | "mock" => Ok(DriverKind::Memory),
            "none" => Ok(DriverKind::None),
            other => Err(format!("unknown driver '{}'", other)),
        }
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for DriverKind {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DriverKind {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let name = String::deserialize(d)?;
        Ok(DriverKind::parse_lossy(&name))
    }
}

/// Open the backend for `kind`, using `location` or the driver default
pub fn open_backend(
    kind: DriverKind,
    location: Option<&Path>,
) -> KvResult<Arc<dyn PersistenceBackend>> {
    let path = |default: &str| {
        location
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(default))
    };

    let backend: Arc<dyn PersistenceBackend> = match kind {
        DriverKind::Log => Arc::new(LogBackend::open(path(DEFAULT_LOG_PATH))?),
        DriverKind::Sqlite => Arc::new(SqliteBackend::open(path(DEFAULT_DB_PATH))?),
        DriverKind::Memory => Arc::new(MemoryBackend::new()),
        DriverKind::None => Arc::new(NoopBackend::new()),
    };

    tracing::info!(
        target: "simplekv::durability",
        driver = %kind,
        backend = backend.name(),
        "persistence backend ready"
    );
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_aliases() {
        assert_eq!("flat_file".parse::<DriverKind>().unwrap(), DriverKind::Log);
        assert_eq!("file".parse::<DriverKind>().unwrap(), DriverKind::Log);
        assert_eq!("SQLite".parse::<DriverKind>().unwrap(), DriverKind::Sqlite);
        assert_eq!("mock".parse::<DriverKind>().unwrap(), DriverKind::Memory);
        assert_eq!("none".parse::<DriverKind>().unwrap(), DriverKind::None);
        assert!("redis".parse::<DriverKind>().is_err());
    }

    #[test]
    fn test_unknown_falls_back_to_log() {
        assert_eq!(DriverKind::parse_lossy("redis"), DriverKind::Log);
    }

    #[test]
    fn test_open_each_kind() {
        let dir = TempDir::new().unwrap();
        let log = open_backend(DriverKind::Log, Some(dir.path().join("a.log").as_path())).unwrap();
        assert_eq!(log.name(), "log");
        let db = open_backend(DriverKind::Sqlite, Some(dir.path().join("a.db").as_path())).unwrap();
        assert_eq!(db.name(), "sqlite");
        assert_eq!(open_backend(DriverKind::Memory, None).unwrap().name(), "memory");
        assert_eq!(open_backend(DriverKind::None, None).unwrap().name(), "none");
    }
}
