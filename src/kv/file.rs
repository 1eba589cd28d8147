//! Log-backed KV backend.
//!
//! [`FileKv`] keeps the same in-memory state as [`MemoryKv`] and makes it
//! durable through an append-only operation log, replayed in full when the
//! backend is opened.
//!
//! ## File format
//!
//! The log stores records in a simple binary format:
//! `[u32: length][json: LogRecord]` repeated for each entry.
//! Each entry is synced to disk before the operation is acknowledged.
//! A truncated tail (interrupted final write) is ignored on replay.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{AlderError, Result};
use crate::kv::Kv;
use crate::kv::memory::MemoryKv;

const LOG_FILE: &str = "kv.log";

/// Configuration for [`FileKv`].
#[derive(Debug, Clone)]
pub struct FileKvConfig {
    /// Directory holding the operation log.
    pub path: PathBuf,
}

impl FileKvConfig {
    /// Configure a backend rooted at `path`. The directory is created on
    /// open if it does not exist.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// A single logged operation.
///
/// Operations whose outcome depends on prior state (`SetPop`) record the
/// resolved member so replay is deterministic.
#[derive(Debug, Serialize, Deserialize)]
enum LogRecord {
    Set { key: String, value: Vec<u8> },
    Delete { key: String },
    Incr { key: String },
    SetAdd { key: String, member: u64 },
    SetRemove { key: String, member: u64 },
    SetPop { key: String, member: u64 },
    SortedInsert { key: String, rank: f64, member: u64 },
    SortedRemove { key: String, member: u64 },
    ClearPrefix { prefix: String },
}

/// Durable [`Kv`] backend: in-memory state plus an append-only log.
///
/// Mutating operations are serialized through the log writer's mutex, so
/// log order always matches apply order. Reads go straight to the
/// in-memory state.
#[derive(Debug)]
pub struct FileKv {
    mem: MemoryKv,
    writer: Mutex<File>,
}

impl FileKv {
    /// Open the backend at the configured directory, replaying any
    /// existing log.
    pub fn open(config: FileKvConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.path)?;
        let log_path = config.path.join(LOG_FILE);

        let mem = MemoryKv::new();
        Self::replay(&mem, &log_path)?;

        let writer = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        Ok(Self {
            mem,
            writer: Mutex::new(writer),
        })
    }

    fn replay(mem: &MemoryKv, log_path: &Path) -> Result<()> {
        let file = match File::open(log_path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let size = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        let mut position = 0u64;

        while position < size {
            if position + 4 > size {
                break;
            }
            let mut len_bytes = [0u8; 4];
            reader.read_exact(&mut len_bytes)?;
            let len = u32::from_le_bytes(len_bytes) as u64;
            position += 4;

            if position + len > size {
                break;
            }
            let mut buffer = vec![0u8; len as usize];
            reader.read_exact(&mut buffer)?;
            position += len;

            let record: LogRecord = serde_json::from_slice(&buffer).map_err(|e| {
                AlderError::store(format!("corrupt log record ending at byte {position}: {e}"))
            })?;
            Self::apply(mem, record)?;
        }

        Ok(())
    }

    fn apply(mem: &MemoryKv, record: LogRecord) -> Result<()> {
        match record {
            LogRecord::Set { key, value } => mem.set(&key, &value)?,
            LogRecord::Delete { key } => {
                mem.delete(&key)?;
            }
            LogRecord::Incr { key } => {
                mem.incr(&key)?;
            }
            LogRecord::SetAdd { key, member } => {
                mem.set_add(&key, member)?;
            }
            LogRecord::SetRemove { key, member } | LogRecord::SetPop { key, member } => {
                mem.set_remove(&key, member)?;
            }
            LogRecord::SortedInsert { key, rank, member } => {
                mem.sorted_insert(&key, rank, member)?;
            }
            LogRecord::SortedRemove { key, member } => {
                mem.sorted_remove(&key, member)?;
            }
            LogRecord::ClearPrefix { prefix } => {
                mem.clear_prefix(&prefix)?;
            }
        }
        Ok(())
    }

    /// Write a single record to the log with fsync.
    fn append(writer: &mut File, record: &LogRecord) -> Result<()> {
        let bytes = serde_json::to_vec(record)?;
        let len = bytes.len() as u32;
        writer.write_all(&len.to_le_bytes())?;
        writer.write_all(&bytes)?;
        writer.sync_data()?;
        Ok(())
    }
}

impl Kv for FileKv {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.mem.get(key)
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock();
        Self::append(
            &mut writer,
            &LogRecord::Set {
                key: key.to_string(),
                value: value.to_vec(),
            },
        )?;
        self.mem.set(key, value)
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let mut writer = self.writer.lock();
        Self::append(&mut writer, &LogRecord::Delete { key: key.to_string() })?;
        self.mem.delete(key)
    }

    fn incr(&self, key: &str) -> Result<u64> {
        let mut writer = self.writer.lock();
        Self::append(&mut writer, &LogRecord::Incr { key: key.to_string() })?;
        self.mem.incr(key)
    }

    fn set_add(&self, key: &str, member: u64) -> Result<bool> {
        let mut writer = self.writer.lock();
        Self::append(
            &mut writer,
            &LogRecord::SetAdd {
                key: key.to_string(),
                member,
            },
        )?;
        self.mem.set_add(key, member)
    }

    fn set_remove(&self, key: &str, member: u64) -> Result<bool> {
        let mut writer = self.writer.lock();
        Self::append(
            &mut writer,
            &LogRecord::SetRemove {
                key: key.to_string(),
                member,
            },
        )?;
        self.mem.set_remove(key, member)
    }

    fn set_pop(&self, key: &str) -> Result<Option<u64>> {
        // The popped member is only known after the pop, so this is the one
        // operation applied before it is logged. A failed append puts the
        // member back, keeping memory and log consistent.
        let mut writer = self.writer.lock();
        let Some(member) = self.mem.set_pop(key)? else {
            return Ok(None);
        };
        if let Err(e) = Self::append(
            &mut writer,
            &LogRecord::SetPop {
                key: key.to_string(),
                member,
            },
        ) {
            self.mem.set_add(key, member)?;
            return Err(e);
        }
        Ok(Some(member))
    }

    fn set_len(&self, key: &str) -> Result<u64> {
        self.mem.set_len(key)
    }

    fn sorted_insert(&self, key: &str, rank: f64, member: u64) -> Result<()> {
        let mut writer = self.writer.lock();
        Self::append(
            &mut writer,
            &LogRecord::SortedInsert {
                key: key.to_string(),
                rank,
                member,
            },
        )?;
        self.mem.sorted_insert(key, rank, member)
    }

    fn sorted_remove(&self, key: &str, member: u64) -> Result<bool> {
        let mut writer = self.writer.lock();
        Self::append(
            &mut writer,
            &LogRecord::SortedRemove {
                key: key.to_string(),
                member,
            },
        )?;
        self.mem.sorted_remove(key, member)
    }

    fn sorted_range_by_rank(&self, key: &str, min: f64, max: f64) -> Result<Vec<u64>> {
        self.mem.sorted_range_by_rank(key, min, max)
    }

    fn sorted_page(&self, key: &str, offset: usize, limit: Option<usize>) -> Result<Vec<u64>> {
        self.mem.sorted_page(key, offset, limit)
    }

    fn sorted_len(&self, key: &str) -> Result<u64> {
        self.mem.sorted_len(key)
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        self.mem.keys_with_prefix(prefix)
    }

    fn clear_prefix(&self, prefix: &str) -> Result<u64> {
        let mut writer = self.writer.lock();
        Self::append(
            &mut writer,
            &LogRecord::ClearPrefix {
                prefix: prefix.to_string(),
            },
        )?;
        self.mem.clear_prefix(prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> FileKv {
        FileKv::open(FileKvConfig::new(dir.path())).unwrap()
    }

    #[test]
    fn test_reopen_restores_values_and_counters() {
        let dir = TempDir::new().unwrap();
        {
            let kv = open(&dir);
            kv.set("k", b"v").unwrap();
            assert_eq!(kv.incr("c").unwrap(), 1);
            assert_eq!(kv.incr("c").unwrap(), 2);
        }
        {
            let kv = open(&dir);
            assert_eq!(kv.get("k").unwrap(), Some(b"v".to_vec()));
            // The counter continues where it left off.
            assert_eq!(kv.incr("c").unwrap(), 3);
        }
    }

    #[test]
    fn test_reopen_restores_sets_and_pops() {
        let dir = TempDir::new().unwrap();
        let popped;
        {
            let kv = open(&dir);
            kv.set_add("s", 1).unwrap();
            kv.set_add("s", 2).unwrap();
            popped = kv.set_pop("s").unwrap().unwrap();
        }
        {
            let kv = open(&dir);
            assert_eq!(kv.set_len("s").unwrap(), 1);
            let survivor = kv.set_pop("s").unwrap().unwrap();
            assert_ne!(survivor, popped);
        }
    }

    #[test]
    fn test_reopen_restores_sorted_sets() {
        let dir = TempDir::new().unwrap();
        {
            let kv = open(&dir);
            kv.sorted_insert("z", 2.0, 20).unwrap();
            kv.sorted_insert("z", 1.0, 10).unwrap();
            kv.sorted_remove("z", 20).unwrap();
        }
        {
            let kv = open(&dir);
            assert_eq!(kv.sorted_page("z", 0, None).unwrap(), vec![10]);
        }
    }

    #[test]
    fn test_clear_prefix_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let kv = open(&dir);
            kv.set("a:1", b"x").unwrap();
            kv.set("b:1", b"y").unwrap();
            assert_eq!(kv.clear_prefix("a:").unwrap(), 1);
        }
        {
            let kv = open(&dir);
            assert_eq!(kv.get("a:1").unwrap(), None);
            assert_eq!(kv.get("b:1").unwrap(), Some(b"y".to_vec()));
        }
    }

    #[test]
    fn test_truncated_tail_is_ignored() {
        let dir = TempDir::new().unwrap();
        {
            let kv = open(&dir);
            kv.set("k", b"v").unwrap();
        }
        // Simulate a crash mid-append: a length header promising more
        // bytes than the file holds.
        {
            let mut file = OpenOptions::new()
                .append(true)
                .open(dir.path().join(LOG_FILE))
                .unwrap();
            file.write_all(&100u32.to_le_bytes()).unwrap();
            file.write_all(b"partial").unwrap();
        }
        {
            let kv = open(&dir);
            assert_eq!(kv.get("k").unwrap(), Some(b"v".to_vec()));
        }
    }
}
