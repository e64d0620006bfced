//! Append-only log backend
//!
//! Every write or delete is one framed entry appended to a single file:
//!
//! ```text
//! [4-byte CRC32 LE][4-byte length LE][JSON payload]\n
//! ```
//!
//! A write entry carries the full record state, so each record is made
//! durable by exactly one append. On open the log is replayed into an
//! in-memory index; a truncated or corrupt tail stops replay and is cut
//! off so later appends start on a clean frame boundary. A failed append
//! is cut back the same way before the error is returned; if that cut
//! fails too, the backend refuses every further operation until reopened.
//!
//! Because every sync rewrites every live record, the log grows with each
//! pass. [`LogBackend::compact`] rewrites only the live records into a
//! fresh file; `flush` does so automatically once dead entries outnumber
//! live ones.

use crate::backend::PersistenceBackend;
use crc32fast::Hasher;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use simplekv_core::{KvError, KvResult, RecordSnapshot};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Entries below this count never trigger automatic compaction
const COMPACT_MIN_ENTRIES: u64 = 1024;

const HEADER_LEN: usize = 8;

#[derive(Debug, thiserror::Error)]
enum FrameError {
    #[error("log I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("log serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("log entry too large: {0} bytes")]
    TooLarge(usize),
}

impl From<FrameError> for KvError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Io(e) => KvError::backend(e.to_string()),
            FrameError::Serde(e) => KvError::serialization(e.to_string()),
            FrameError::TooLarge(_) => KvError::backend(err.to_string()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum LogOp {
    Write { record: RecordSnapshot },
    Delete { key: String },
}

#[derive(Debug, Serialize, Deserialize)]
struct LogEntry {
    /// Milliseconds since the Unix epoch
    ts: i64,
    op: LogOp,
}

impl LogEntry {
    fn now(op: LogOp) -> Self {
        Self {
            ts: chrono::Utc::now().timestamp_millis(),
            op,
        }
    }
}

#[derive(Debug)]
struct LogState {
    file: File,
    /// File length up to the end of the last complete frame
    len: u64,
    index: HashMap<String, RecordSnapshot>,
    entries: u64,
    /// Set when a failed append could not be cut back to a frame boundary
    poisoned: Option<String>,
    #[cfg(test)]
    faults: Faults,
}

/// Failures injected by unit tests
#[cfg(test)]
#[derive(Debug, Default)]
struct Faults {
    /// Write only this many bytes of the next frame, then fail
    short_write: Option<usize>,
    fail_truncate: bool,
    fail_compact: bool,
}

impl LogState {
    fn ensure_usable(&self) -> KvResult<()> {
        match &self.poisoned {
            Some(reason) => Err(KvError::backend(format!(
                "log unusable until reopened: {}",
                reason
            ))),
            None => Ok(()),
        }
    }

    /// Append one encoded frame. On failure the file is cut back to the
    /// previous frame boundary, or the log is poisoned if that fails too.
    fn append_frame(&mut self, frame: &[u8]) -> KvResult<()> {
        self.ensure_usable()?;
        if let Err(e) = self.write_bytes(frame) {
            self.rollback();
            return Err(KvError::backend(format!("log append failed: {}", e)));
        }
        self.len += frame.len() as u64;
        self.entries += 1;
        Ok(())
    }

    fn write_bytes(&mut self, frame: &[u8]) -> io::Result<()> {
        #[cfg(test)]
        if let Some(cut) = self.faults.short_write.take() {
            self.file.write_all(&frame[..cut.min(frame.len())])?;
            return Err(io::Error::new(io::ErrorKind::Other, "short write"));
        }
        self.file.write_all(frame)
    }

    fn rollback(&mut self) {
        if let Err(e) = self.truncate_to_boundary() {
            tracing::error!(
                target: "simplekv::durability",
                len = self.len,
                error = %e,
                "could not cut log back to last frame; refusing further operations"
            );
            self.poisoned = Some(e.to_string());
        }
    }

    fn truncate_to_boundary(&mut self) -> io::Result<()> {
        #[cfg(test)]
        if self.faults.fail_truncate {
            return Err(io::Error::new(io::ErrorKind::Other, "truncate refused"));
        }
        self.file.set_len(self.len)
    }
}

/// Replay outcome
#[derive(Debug)]
struct Replay {
    index: HashMap<String, RecordSnapshot>,
    entries: u64,
    valid_len: u64,
    file_len: u64,
}

/// Flat-file append log backend
#[derive(Debug)]
pub struct LogBackend {
    path: PathBuf,
    state: Mutex<LogState>,
}

impl LogBackend {
    /// Open or create the log at `path`, replaying existing entries
    pub fn open(path: impl AsRef<Path>) -> KvResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let replay = replay(&path).map_err(KvError::from)?;
        if replay.valid_len < replay.file_len {
            tracing::warn!(
                target: "simplekv::durability",
                path = %path.display(),
                valid_len = replay.valid_len,
                file_len = replay.file_len,
                "truncating damaged log tail"
            );
            let file = OpenOptions::new().write(true).open(&path)?;
            file.set_len(replay.valid_len)?;
            file.sync_all()?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        tracing::info!(
            target: "simplekv::durability",
            path = %path.display(),
            records = replay.index.len(),
            entries = replay.entries,
            "opened log backend"
        );

        Ok(Self {
            path,
            state: Mutex::new(LogState {
                file,
                len: replay.valid_len,
                index: replay.index,
                entries: replay.entries,
                poisoned: None,
                #[cfg(test)]
                faults: Faults::default(),
            }),
        })
    }

    /// Path of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of entries currently in the file
    pub fn entry_count(&self) -> u64 {
        self.state.lock().entries
    }

    /// Number of live records
    pub fn record_count(&self) -> usize {
        self.state.lock().index.len()
    }

    /// Rewrite the log so it holds one write entry per live record
    pub fn compact(&self) -> KvResult<()> {
        let mut state = self.state.lock();
        self.compact_locked(&mut state)
    }

    fn compact_path(&self) -> PathBuf {
        self.path.with_extension("compact")
    }

    fn compact_locked(&self, state: &mut LogState) -> KvResult<()> {
        state.ensure_usable()?;
        let tmp_path = self.compact_path();

        // The replacement handle is opened before the rename, so once the
        // rename lands nothing is left that can fail.
        let prepared = write_compacted(state, &tmp_path).and_then(|len| {
            let file = OpenOptions::new().append(true).open(&tmp_path)?;
            fs::rename(&tmp_path, &self.path)?;
            Ok((file, len))
        });
        let (file, len) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                if let Err(rm) = fs::remove_file(&tmp_path) {
                    if rm.kind() != io::ErrorKind::NotFound {
                        tracing::warn!(
                            target: "simplekv::durability",
                            path = %tmp_path.display(),
                            error = %rm,
                            "could not remove partial compaction file"
                        );
                    }
                }
                tracing::warn!(target: "simplekv::durability", error = %e, "log compaction failed");
                return Err(e);
            }
        };

        let before = state.entries;
        state.file = file;
        state.len = len;
        state.entries = state.index.len() as u64;

        tracing::info!(
            target: "simplekv::durability",
            before,
            after = state.entries,
            "compacted log"
        );
        Ok(())
    }

    fn append(&self, state: &mut LogState, op: LogOp) -> KvResult<()> {
        let mut frame = Vec::new();
        write_frame(&mut frame, &LogEntry::now(op)).map_err(KvError::from)?;
        state.append_frame(&frame)
    }
}

impl PersistenceBackend for LogBackend {
    fn name(&self) -> &'static str {
        "log"
    }

    fn write(&self, record: &RecordSnapshot) -> KvResult<()> {
        let mut state = self.state.lock();
        self.append(
            &mut state,
            LogOp::Write {
                record: record.clone(),
            },
        )?;
        state.index.insert(record.key.clone(), record.clone());
        Ok(())
    }

    fn read(&self, key: &str) -> KvResult<RecordSnapshot> {
        self.state
            .lock()
            .index
            .get(key)
            .cloned()
            .ok_or_else(|| KvError::key_not_found(key))
    }

    fn delete(&self, key: &str) -> KvResult<()> {
        let mut state = self.state.lock();
        state.ensure_usable()?;
        if !state.index.contains_key(key) {
            return Ok(());
        }
        self.append(
            &mut state,
            LogOp::Delete {
                key: key.to_string(),
            },
        )?;
        state.index.remove(key);
        Ok(())
    }

    fn load(&self) -> KvResult<Vec<RecordSnapshot>> {
        Ok(self.state.lock().index.values().cloned().collect())
    }

    fn keys(&self) -> KvResult<Vec<String>> {
        Ok(self.state.lock().index.keys().cloned().collect())
    }

    fn flush(&self) -> KvResult<()> {
        let mut state = self.state.lock();
        state.ensure_usable()?;
        state.file.sync_all()?;
        let live = state.index.len() as u64;
        if state.entries >= COMPACT_MIN_ENTRIES && state.entries > live.saturating_mul(2) {
            self.compact_locked(&mut state)?;
        }
        Ok(())
    }
}

/// Write every live record, sorted by key, into a synced file at `path`.
/// Returns the file length.
fn write_compacted(state: &LogState, path: &Path) -> KvResult<u64> {
    let mut writer = BufWriter::new(File::create(path)?);
    let mut keys: Vec<&String> = state.index.keys().collect();
    keys.sort();
    for key in keys {
        #[cfg(test)]
        if state.faults.fail_compact {
            return Err(KvError::backend("compaction write refused"));
        }
        let entry = LogEntry::now(LogOp::Write {
            record: state.index[key].clone(),
        });
        write_frame(&mut writer, &entry).map_err(KvError::from)?;
    }
    writer.flush()?;
    let file = writer.get_ref();
    file.sync_all()?;
    Ok(file.metadata()?.len())
}

fn write_frame<W: Write>(writer: &mut W, entry: &LogEntry) -> Result<(), FrameError> {
    let payload = serde_json::to_vec(entry)?;
    let len = u32::try_from(payload.len()).map_err(|_| FrameError::TooLarge(payload.len()))?;

    let mut hasher = Hasher::new();
    hasher.update(&payload);
    let crc = hasher.finalize();

    writer.write_all(&crc.to_le_bytes())?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(b"\n")?;
    Ok(())
}

/// Replay every valid frame. Stops at the first short, corrupt or
/// undecodable frame.
fn replay(path: &Path) -> Result<Replay, FrameError> {
    let mut bytes = Vec::new();
    match File::open(path) {
        Ok(mut file) => {
            file.read_to_end(&mut bytes)?;
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(FrameError::Io(e)),
    }

    let mut index = HashMap::new();
    let mut entries = 0u64;
    let mut offset = 0usize;

    while offset < bytes.len() {
        let Some(header) = bytes.get(offset..offset + HEADER_LEN) else {
            tracing::warn!(target: "simplekv::durability", entry = entries, "log truncated mid-header; stopping replay");
            break;
        };
        let expected_crc = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;

        let start = offset + HEADER_LEN;
        let end = start + len;
        let Some(payload) = bytes.get(start..end) else {
            tracing::warn!(target: "simplekv::durability", entry = entries, "log truncated mid-entry; stopping replay");
            break;
        };
        if bytes.get(end) != Some(&b'\n') {
            tracing::warn!(target: "simplekv::durability", entry = entries, "log entry missing terminator; stopping replay");
            break;
        }

        let mut hasher = Hasher::new();
        hasher.update(payload);
        let actual_crc = hasher.finalize();
        if actual_crc != expected_crc {
            tracing::warn!(
                target: "simplekv::durability",
                entry = entries,
                expected = format_args!("{:#010x}", expected_crc),
                actual = format_args!("{:#010x}", actual_crc),
                "log CRC mismatch; stopping replay"
            );
            break;
        }

        let entry: LogEntry = match serde_json::from_slice(payload) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(target: "simplekv::durability", entry = entries, error = %e, "undecodable log entry; stopping replay");
                break;
            }
        };
        match entry.op {
            LogOp::Write { record } => {
                index.insert(record.key.clone(), record);
            }
            LogOp::Delete { key } => {
                index.remove(&key);
            }
        }

        entries += 1;
        offset = end + 1;
    }

    Ok(Replay {
        index,
        entries,
        valid_len: offset as u64,
        file_len: bytes.len() as u64,
    })
}
