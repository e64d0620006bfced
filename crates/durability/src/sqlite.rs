//! Relational backend on SQLite
//!
//! Layout:
//!
//! | table        | columns                                   |
//! |--------------|-------------------------------------------|
//! | `records`    | `key` (pk), `id`, `value` (current)        |
//! | `old_values` | `key`, `version`, `value` (superseded)     |
//! | `metadata`   | `key`, `metadata_key`, `metadata_value`    |
//!
//! A record write replaces all three tables' rows for the key inside one
//! transaction, so a reader never sees a half-written record.

use crate::backend::PersistenceBackend;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use simplekv_core::{KvError, KvResult, RecordSnapshot};
use std::collections::BTreeMap;
use std::path::Path;
use uuid::Uuid;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS records (
    key   TEXT PRIMARY KEY,
    id    TEXT NOT NULL,
    value BLOB NOT NULL
);
CREATE TABLE IF NOT EXISTS old_values (
    key     TEXT NOT NULL,
    version INTEGER NOT NULL,
    value   BLOB NOT NULL,
    PRIMARY KEY (key, version)
);
CREATE TABLE IF NOT EXISTS metadata (
    key            TEXT NOT NULL,
    metadata_key   TEXT NOT NULL,
    metadata_value TEXT NOT NULL,
    PRIMARY KEY (key, metadata_key)
);
";

fn sql_err(err: rusqlite::Error) -> KvError {
    KvError::backend(format!("sqlite: {}", err))
}

/// SQLite-backed persistence
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend").finish_non_exhaustive()
    }
}

impl SqliteBackend {
    /// Open or create a database file
    pub fn open(path: impl AsRef<Path>) -> KvResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(sql_err)?;
        tracing::info!(target: "simplekv::durability", path = %path.display(), "opened sqlite backend");
        Self::with_connection(conn)
    }

    /// Private in-memory database
    pub fn open_in_memory() -> KvResult<Self> {
        Self::with_connection(Connection::open_in_memory().map_err(sql_err)?)
    }

    fn with_connection(conn: Connection) -> KvResult<Self> {
        conn.execute_batch(SCHEMA).map_err(sql_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn read_locked(conn: &Connection, key: &str) -> KvResult<RecordSnapshot> {
    let row: Option<(String, Vec<u8>)> = conn
        .query_row(
            "SELECT id, value FROM records WHERE key = ?1",
            params![key],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(sql_err)?;
    let (id, current) = row.ok_or_else(|| KvError::key_not_found(key))?;
    let id = Uuid::parse_str(&id)
        .map_err(|e| KvError::corruption(format!("bad id for '{}': {}", key, e)))?;

    let mut stmt = conn
        .prepare_cached("SELECT value FROM old_values WHERE key = ?1 ORDER BY version")
        .map_err(sql_err)?;
    let mut values = stmt
        .query_map(params![key], |row| row.get::<_, Vec<u8>>(0))
        .map_err(sql_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(sql_err)?;
    values.push(current);

    let mut stmt = conn
        .prepare_cached("SELECT metadata_key, metadata_value FROM metadata WHERE key = ?1")
        .map_err(sql_err)?;
    let metadata = stmt
        .query_map(params![key], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })
        .map_err(sql_err)?
        .collect::<Result<BTreeMap<_, _>, _>>()
        .map_err(sql_err)?;

    Ok(RecordSnapshot {
        id,
        key: key.to_string(),
        values,
        metadata,
    })
}

fn keys_locked(conn: &Connection) -> KvResult<Vec<String>> {
    let mut stmt = conn
        .prepare_cached("SELECT key FROM records ORDER BY key")
        .map_err(sql_err)?;
    let keys = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(sql_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(sql_err)?;
    Ok(keys)
}

impl PersistenceBackend for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn write(&self, record: &RecordSnapshot) -> KvResult<()> {
        let Some((current, older)) = record.values.split_last() else {
            return Err(KvError::corruption(format!(
                "record '{}' has no values",
                record.key
            )));
        };

        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(sql_err)?;
        tx.execute(
            "INSERT OR REPLACE INTO records (key, id, value) VALUES (?1, ?2, ?3)",
            params![record.key, record.id.to_string(), current],
        )
        .map_err(sql_err)?;

        tx.execute("DELETE FROM old_values WHERE key = ?1", params![record.key])
            .map_err(sql_err)?;
        for (version, value) in older.iter().enumerate() {
            tx.execute(
                "INSERT INTO old_values (key, version, value) VALUES (?1, ?2, ?3)",
                params![record.key, version as i64, value],
            )
            .map_err(sql_err)?;
        }

        tx.execute("DELETE FROM metadata WHERE key = ?1", params![record.key])
            .map_err(sql_err)?;
        for (meta_key, meta_value) in &record.metadata {
            tx.execute(
                "INSERT INTO metadata (key, metadata_key, metadata_value) VALUES (?1, ?2, ?3)",
                params![record.key, meta_key, meta_value],
            )
            .map_err(sql_err)?;
        }

        tx.commit().map_err(sql_err)
    }

    fn read(&self, key: &str) -> KvResult<RecordSnapshot> {
        read_locked(&self.conn.lock(), key)
    }

    fn delete(&self, key: &str) -> KvResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(sql_err)?;
        for table in ["records", "old_values", "metadata"] {
            tx.execute(&format!("DELETE FROM {} WHERE key = ?1", table), params![key])
                .map_err(sql_err)?;
        }
        tx.commit().map_err(sql_err)
    }

    fn load(&self) -> KvResult<Vec<RecordSnapshot>> {
        let conn = self.conn.lock();
        keys_locked(&conn)?
            .iter()
            .map(|key| read_locked(&conn, key))
            .collect()
    }

    fn keys(&self) -> KvResult<Vec<String>> {
        keys_locked(&self.conn.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simplekv_core::Record;
    use tempfile::TempDir;

    #[test]
    fn test_round_trip_full_history() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        let record = Record::new("k", b"v0".to_vec()).unwrap();
        record.update_value(b"v1".to_vec());
        record.update_value(b"v2".to_vec());
        record.set_metadata("owner", "ann").unwrap();

        backend.write(&record.snapshot()).unwrap();
        assert_eq!(backend.read("k").unwrap(), record.snapshot());
    }

    #[test]
    fn test_overwrite_replaces_rows() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        let record = Record::new("k", b"v0".to_vec()).unwrap();
        record.set_metadata("tag", "x").unwrap();
        backend.write(&record.snapshot()).unwrap();

        record.delete_metadata("tag").unwrap();
        backend.write(&record.snapshot()).unwrap();

        let stored = backend.read("k").unwrap();
        assert!(!stored.metadata.contains_key("tag"));
        assert_eq!(stored, record.snapshot());
    }

    #[test]
    fn test_delete_clears_all_tables() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        let record = Record::new("k", b"v0".to_vec()).unwrap();
        record.update_value(b"v1".to_vec());
        backend.write(&record.snapshot()).unwrap();
        backend.delete("k").unwrap();

        assert!(matches!(backend.read("k"), Err(KvError::KeyNotFound { .. })));
        let conn = backend.conn.lock();
        let old: i64 = conn
            .query_row("SELECT COUNT(*) FROM old_values", [], |r| r.get(0))
            .unwrap();
        let meta: i64 = conn
            .query_row("SELECT COUNT(*) FROM metadata", [], |r| r.get(0))
            .unwrap();
        assert_eq!((old, meta), (0, 0));
    }

    #[test]
    fn test_persists_across_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kv.db");
        {
            let backend = SqliteBackend::open(&path).unwrap();
            for i in 0..3 {
                let record = Record::new(format!("k{}", i), b"v".to_vec()).unwrap();
                backend.write(&record.snapshot()).unwrap();
            }
        }
        let backend = SqliteBackend::open(&path).unwrap();
        assert_eq!(backend.keys().unwrap(), vec!["k0", "k1", "k2"]);
        assert_eq!(backend.load().unwrap().len(), 3);
    }
}
