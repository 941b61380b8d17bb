//! Log-structured file backend
//!
//! All tables live in memory. Every [`WriteBatch`] is appended to a single log
//! file as one record, so a batch is either fully in the log or not at all.
//! Opening the backend replays the log.
//!
//! ## Record Format
//!
//! ```text
//! [length: u32][type: u8][payload: bytes][crc32: u32]
//! ```
//!
//! - **length**: size of type + payload + crc (not including length itself)
//! - **type**: 1 = batch, 2 = compacted image (replaces all prior state)
//! - **payload**: `[op_count: u32]` then per op
//!   `[kind: u8][table_len: u16][table][key_len: u32][key]` and, for puts,
//!   `[value_len: u32][value]`
//! - **crc32**: checksum over type + payload
//!
//! All integers are little endian. Replay stops at the first incomplete or
//! corrupt record; the file is truncated there, since only the final write
//! can have been torn by a crash.
//!
//! A failed append is cut back off the file before the error is returned, so
//! later records never land behind torn bytes. If that truncation fails too,
//! the backend refuses every further write.

use super::memory::{apply_batch, Tables};
use super::{BatchOp, KvBackend, WriteBatch};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use docsync_core::{Error, Result};
use fs2::FileExt;
use parking_lot::RwLock;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const TYPE_BATCH: u8 = 1;
const TYPE_COMPACTED: u8 = 2;

const OP_PUT: u8 = 1;
const OP_DELETE: u8 = 2;

/// Framing overhead per record: length + type + crc
const RECORD_OVERHEAD: usize = 4 + 1 + 4;

/// Tuning for [`LogBackend`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogOptions {
    /// fsync after every batch
    pub sync_on_write: bool,
    /// Rewrite the log once it grows past this many bytes (0 disables)
    pub compaction_threshold_bytes: u64,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            sync_on_write: true,
            compaction_threshold_bytes: 64 * 1024 * 1024,
        }
    }
}

struct LogState {
    file: File,
    log_bytes: u64,
    tables: Tables,
    /// Set when a failed append could not be cut back off the file
    poisoned: bool,
}

/// Ordered tables backed by an append-only, checksummed log file
pub struct LogBackend {
    path: PathBuf,
    options: LogOptions,
    state: RwLock<LogState>,
}

// ============================================================================
// Record encoding
// ============================================================================

fn encode_payload(batch: &WriteBatch) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.write_u32::<LittleEndian>(batch.len() as u32)?;
    for op in batch.ops() {
        let (kind, table, key, value) = match op {
            BatchOp::Put { table, key, value } => (OP_PUT, table, key, Some(value)),
            BatchOp::Delete { table, key } => (OP_DELETE, table, key, None),
        };
        let table_len = u16::try_from(table.len())
            .map_err(|_| Error::InvalidInput(format!("table name too long: {}", table.len())))?;
        buf.write_u8(kind)?;
        buf.write_u16::<LittleEndian>(table_len)?;
        buf.write_all(table.as_bytes())?;
        buf.write_u32::<LittleEndian>(key.len() as u32)?;
        buf.write_all(key)?;
        if let Some(value) = value {
            buf.write_u32::<LittleEndian>(value.len() as u32)?;
            buf.write_all(value)?;
        }
    }
    Ok(buf)
}

fn encode_record(record_type: u8, payload: &[u8]) -> Result<Vec<u8>> {
    let total_len = 1 + payload.len() + 4;
    let mut buf = Vec::with_capacity(RECORD_OVERHEAD + payload.len());
    buf.write_u32::<LittleEndian>(total_len as u32)?;
    buf.write_u8(record_type)?;
    buf.write_all(payload)?;

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&[record_type]);
    hasher.update(payload);
    buf.write_u32::<LittleEndian>(hasher.finalize())?;
    Ok(buf)
}

// ============================================================================
// Appending
// ============================================================================

/// The file operations an append needs
trait LogFile: Write {
    /// Cut the file back to `len` bytes and continue writing there
    fn truncate_to(&mut self, len: u64) -> io::Result<()>;

    fn sync(&mut self) -> io::Result<()>;
}

impl LogFile for File {
    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)?;
        self.seek(SeekFrom::Start(len))?;
        Ok(())
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }
}

#[derive(Debug)]
enum AppendError {
    /// The record was removed again; the log ends at its old length
    RolledBack(io::Error),
    /// Torn bytes may remain after the old end of the log
    Torn { write: io::Error, rollback: io::Error },
}

/// Appends `record` at `end`, removing any partial bytes if the write or
/// sync fails
fn append_record<F: LogFile>(
    file: &mut F,
    end: u64,
    record: &[u8],
    sync: bool,
) -> std::result::Result<(), AppendError> {
    let written = file
        .write_all(record)
        .and_then(|()| if sync { file.sync() } else { Ok(()) });
    match written {
        Ok(()) => Ok(()),
        Err(write) => match file.truncate_to(end) {
            Ok(()) => Err(AppendError::RolledBack(write)),
            Err(rollback) => Err(AppendError::Torn { write, rollback }),
        },
    }
}

fn read_chunk(cursor: &mut Cursor<&[u8]>, len: usize) -> std::io::Result<Vec<u8>> {
    let mut out = vec![0u8; len];
    cursor.read_exact(&mut out)?;
    Ok(out)
}

fn decode_payload(payload: &[u8]) -> std::io::Result<WriteBatch> {
    let mut cursor = Cursor::new(payload);
    let count = cursor.read_u32::<LittleEndian>()?;
    let mut batch = WriteBatch::new();
    for _ in 0..count {
        let kind = cursor.read_u8()?;
        let table_len = cursor.read_u16::<LittleEndian>()? as usize;
        let table = String::from_utf8(read_chunk(&mut cursor, table_len)?)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let key_len = cursor.read_u32::<LittleEndian>()? as usize;
        let key = read_chunk(&mut cursor, key_len)?;
        match kind {
            OP_PUT => {
                let value_len = cursor.read_u32::<LittleEndian>()? as usize;
                batch.put(&table, key, read_chunk(&mut cursor, value_len)?);
            }
            OP_DELETE => batch.delete(&table, key),
            other => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("unknown op kind {}", other),
                ))
            }
        }
    }
    if cursor.position() as usize != payload.len() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "trailing bytes in batch payload",
        ));
    }
    Ok(batch)
}

/// Why replay stopped before the end of the file
#[derive(Debug, Clone, PartialEq, Eq)]
enum StopReason {
    PartialRecord,
    ChecksumMismatch,
    ParseError(String),
}

/// Decodes one record from the front of `buf`
///
/// Returns the record type, its batch, and the bytes consumed.
fn decode_record(buf: &[u8]) -> std::result::Result<(u8, WriteBatch, usize), StopReason> {
    if buf.len() < 4 {
        return Err(StopReason::PartialRecord);
    }
    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&buf[..4]);
    let total_len = u32::from_le_bytes(len_bytes) as usize;
    if total_len < 5 {
        return Err(StopReason::ParseError(format!("record length {} too small", total_len)));
    }
    if buf.len() < 4 + total_len {
        return Err(StopReason::PartialRecord);
    }

    let body = &buf[4..4 + total_len];
    let (content, crc_bytes) = body.split_at(total_len - 4);
    let mut stored = [0u8; 4];
    stored.copy_from_slice(crc_bytes);
    if crc32fast::hash(content) != u32::from_le_bytes(stored) {
        return Err(StopReason::ChecksumMismatch);
    }

    let record_type = content[0];
    if record_type != TYPE_BATCH && record_type != TYPE_COMPACTED {
        return Err(StopReason::ParseError(format!("unknown record type {}", record_type)));
    }
    let batch = decode_payload(&content[1..]).map_err(|e| StopReason::ParseError(e.to_string()))?;
    Ok((record_type, batch, 4 + total_len))
}

/// Replays `buf` into tables, returning them and the end of the valid prefix
fn replay(buf: &[u8]) -> (Tables, usize, Option<StopReason>, usize) {
    let mut tables = Tables::default();
    let mut offset = 0;
    let mut records = 0;
    while offset < buf.len() {
        match decode_record(&buf[offset..]) {
            Ok((record_type, batch, consumed)) => {
                if record_type == TYPE_COMPACTED {
                    tables.clear();
                }
                apply_batch(&mut tables, &batch);
                offset += consumed;
                records += 1;
            }
            Err(reason) => return (tables, offset, Some(reason), records),
        }
    }
    (tables, offset, None, records)
}

fn lock_file(file: &File, path: &Path) -> Result<()> {
    file.try_lock_exclusive().map_err(|e| {
        Error::Backend(format!("log file {} is locked by another process: {}", path.display(), e))
    })
}

impl LogBackend {
    /// Open (or create) the log at `path` and replay it
    ///
    /// Takes an exclusive lock on the file for the lifetime of the backend.
    /// A torn or corrupt tail is truncated.
    pub fn open(path: impl AsRef<Path>, options: LogOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;
        lock_file(&file, &path)?;

        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        let (tables, valid_end, stop, records) = replay(&buf);

        if let Some(reason) = stop {
            warn!(
                target: "docsync::storage",
                path = %path.display(),
                valid_end,
                file_len = buf.len(),
                reason = ?reason,
                "Truncating log tail that failed to replay"
            );
            file.set_len(valid_end as u64)?;
            file.sync_all()?;
        }
        file.seek(SeekFrom::Start(valid_end as u64))?;

        info!(
            target: "docsync::storage",
            path = %path.display(),
            records,
            tables = tables.len(),
            "Opened log backend"
        );

        Ok(Self {
            path,
            options,
            state: RwLock::new(LogState {
                file,
                log_bytes: valid_end as u64,
                tables,
                poisoned: false,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current size of the log file in bytes
    pub fn log_bytes(&self) -> u64 {
        self.state.read().log_bytes
    }

    /// Rewrite the log as a single image of the live tables
    ///
    /// The image is written to a sibling file which then atomically replaces
    /// the log.
    pub fn compact(&self) -> Result<()> {
        let mut state = self.state.write();
        self.compact_locked(&mut state)
    }

    fn compact_locked(&self, state: &mut LogState) -> Result<()> {
        let mut image = WriteBatch::new();
        let mut names: Vec<&String> = state.tables.keys().collect();
        names.sort();
        for name in names {
            for (key, value) in &state.tables[name] {
                image.put(name, key.clone(), value.clone());
            }
        }
        let record = encode_record(TYPE_COMPACTED, &encode_payload(&image)?)?;

        let tmp_path = self.path.with_extension("compact");
        let mut tmp = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        lock_file(&tmp, &tmp_path)?;
        tmp.write_all(&record)?;
        tmp.sync_all()?;
        fs::rename(&tmp_path, &self.path)?;

        let before = state.log_bytes;
        state.file = tmp;
        state.log_bytes = record.len() as u64;
        debug!(
            target: "docsync::storage",
            before,
            after = state.log_bytes,
            entries = image.len(),
            "Compacted log"
        );
        Ok(())
    }
}

impl KvBackend for LogBackend {
    fn get(&self, table: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self
            .state
            .read()
            .tables
            .get(table)
            .and_then(|t| t.get(key).cloned()))
    }

    fn scan(&self, table: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(self
            .state
            .read()
            .tables
            .get(table)
            .map(|t| t.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    fn scan_prefix(&self, table: &str, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let state = self.state.read();
        let Some(t) = state.tables.get(table) else {
            return Ok(Vec::new());
        };
        Ok(t.range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let record = encode_record(TYPE_BATCH, &encode_payload(&batch)?)?;

        let mut state = self.state.write();
        if state.poisoned {
            return Err(Error::Backend(format!(
                "log {} has a torn tail from an earlier failed write",
                self.path.display()
            )));
        }
        let end = state.log_bytes;
        match append_record(&mut state.file, end, &record, self.options.sync_on_write) {
            Ok(()) => {}
            Err(AppendError::RolledBack(e)) => {
                warn!(target: "docsync::storage", error = %e, end, "Log append failed; record removed");
                return Err(e.into());
            }
            Err(AppendError::Torn { write, rollback }) => {
                state.poisoned = true;
                warn!(
                    target: "docsync::storage",
                    error = %write,
                    rollback_error = %rollback,
                    end,
                    "Log append failed and could not be rolled back; refusing further writes"
                );
                return Err(Error::Backend(format!(
                    "log write failed ({}) and truncating back to {} failed: {}",
                    write, end, rollback
                )));
            }
        }
        state.log_bytes += record.len() as u64;
        apply_batch(&mut state.tables, &batch);

        let threshold = self.options.compaction_threshold_bytes;
        if threshold > 0 && state.log_bytes > threshold {
            self.compact_locked(&mut state)?;
        }
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.state.read().file.sync_all()?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }

    fn is_persistent(&self) -> bool {
        true
    }
}

impl std::fmt::Debug for LogBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogBackend")
            .field("path", &self.path)
            .field("options", &self.options)
            .finish()
    }
}
