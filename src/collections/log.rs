//! Append-only per-collection log.
//!
//! Every mutation is one entry: a put carrying the full JSON record, or a
//! tombstone for a delete. Replaying the log from the start yields the live
//! key set; the latest put per key wins unless a later tombstone removed it.

use crate::error::{Result, StoreError};
use crate::types::Timestamp;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Magic bytes for a log entry.
const ENTRY_MAGIC: &[u8; 4] = b"DOC\0";

/// Current entry format version.
const ENTRY_VERSION: u8 = 1;

/// Entry operation kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum EntryOp {
    Put,
    Delete,
}

/// A decoded log entry.
#[derive(Clone, Debug)]
pub(crate) struct LogEntry {
    pub op: EntryOp,
    pub timestamp: Timestamp,
    pub key: String,
    pub payload: Vec<u8>,
}

/// Append-only log for one collection.
#[derive(Debug)]
pub(crate) struct CollectionLog {
    /// Log file handle.
    file: RwLock<File>,

    /// Valid size of the log; appends start here, so a torn trailing entry
    /// from a crash is overwritten by the next write.
    file_size: RwLock<u64>,
}

impl CollectionLog {
    /// Open or create a collection log, replaying it to rebuild the live
    /// key -> entry-offset map.
    pub fn open(path: impl AsRef<Path>) -> Result<(Self, HashMap<String, u64>)> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let total_size = file.metadata()?.len();
        let mut live = HashMap::new();
        let mut valid_size = 0u64;

        file.seek(SeekFrom::Start(0))?;
        while valid_size < total_size {
            match Self::read_entry(&mut file) {
                Ok(entry) => {
                    match entry.op {
                        EntryOp::Put => {
                            live.insert(entry.key, valid_size);
                        }
                        EntryOp::Delete => {
                            live.remove(&entry.key);
                        }
                    }
                    valid_size = file.stream_position()?;
                }
                Err(_) => {
                    tracing::warn!(
                        log = %path.display(),
                        offset = valid_size,
                        "truncating torn log tail"
                    );
                    break;
                }
            }
        }

        if valid_size < total_size {
            file.set_len(valid_size)?;
            file.sync_all()?;
        }

        let log = Self {
            file: RwLock::new(file),
            file_size: RwLock::new(valid_size),
        };

        Ok((log, live))
    }

    /// Append a put entry, returning its offset.
    pub fn append_put(&self, key: &str, payload: &[u8]) -> Result<u64> {
        self.append(EntryOp::Put, key, payload)
    }

    /// Append a tombstone for a key.
    pub fn append_delete(&self, key: &str) -> Result<u64> {
        self.append(EntryOp::Delete, key, &[])
    }

    fn append(&self, op: EntryOp, key: &str, payload: &[u8]) -> Result<u64> {
        // The key length prefix is a u16; a longer key would write a
        // truncated prefix and wreck replay for every later entry.
        if key.len() > u16::MAX as usize {
            return Err(StoreError::InvalidKey(format!(
                "key length {} exceeds maximum {}",
                key.len(),
                u16::MAX
            )));
        }

        let mut file = self.file.write();
        let offset = *self.file_size.read();

        file.seek(SeekFrom::Start(offset))?;
        Self::write_entry(&mut file, op, Timestamp::now(), key, payload)?;
        file.sync_all()?;

        *self.file_size.write() = file.stream_position()?;
        Ok(offset)
    }

    /// Read the entry at a given offset.
    pub fn read_at(&self, offset: u64) -> Result<LogEntry> {
        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset))?;
        Self::read_entry(&mut file)
    }

    /// Valid size of the log in bytes.
    pub fn size(&self) -> u64 {
        *self.file_size.read()
    }

    /// Flush log contents and metadata to disk.
    pub fn sync(&self) -> Result<()> {
        self.file.read().sync_all()?;
        Ok(())
    }

    fn write_entry(
        file: &mut File,
        op: EntryOp,
        timestamp: Timestamp,
        key: &str,
        payload: &[u8],
    ) -> Result<()> {
        file.write_all(ENTRY_MAGIC)?;
        file.write_all(&[ENTRY_VERSION])?;

        let op_byte = match op {
            EntryOp::Put => 0u8,
            EntryOp::Delete => 1u8,
        };
        file.write_all(&[op_byte])?;

        file.write_all(&timestamp.0.to_le_bytes())?;

        let key_bytes = key.as_bytes();
        file.write_all(&(key_bytes.len() as u16).to_le_bytes())?;
        file.write_all(key_bytes)?;

        file.write_all(&(payload.len() as u32).to_le_bytes())?;
        file.write_all(payload)?;

        let checksum = crc32fast::hash(payload);
        file.write_all(&checksum.to_le_bytes())?;

        Ok(())
    }

    fn read_entry(file: &mut File) -> Result<LogEntry> {
        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != ENTRY_MAGIC {
            return Err(StoreError::InvalidFormat("Invalid log entry magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != ENTRY_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported log entry version: {}",
                version[0]
            )));
        }

        let mut op_byte = [0u8; 1];
        file.read_exact(&mut op_byte)?;
        let op = match op_byte[0] {
            0 => EntryOp::Put,
            1 => EntryOp::Delete,
            other => {
                return Err(StoreError::InvalidFormat(format!(
                    "Unknown log entry op: {}",
                    other
                )))
            }
        };

        let mut ts_bytes = [0u8; 8];
        file.read_exact(&mut ts_bytes)?;
        let timestamp = Timestamp(i64::from_le_bytes(ts_bytes));

        let mut key_len_bytes = [0u8; 2];
        file.read_exact(&mut key_len_bytes)?;
        let key_len = u16::from_le_bytes(key_len_bytes) as usize;
        let mut key_bytes = vec![0u8; key_len];
        file.read_exact(&mut key_bytes)?;
        let key = String::from_utf8_lossy(&key_bytes).into_owned();

        let mut payload_len_bytes = [0u8; 4];
        file.read_exact(&mut payload_len_bytes)?;
        let payload_len = u32::from_le_bytes(payload_len_bytes) as usize;
        let mut payload = vec![0u8; payload_len];
        file.read_exact(&mut payload)?;

        let mut checksum_bytes = [0u8; 4];
        file.read_exact(&mut checksum_bytes)?;
        let stored_checksum = u32::from_le_bytes(checksum_bytes);
        let computed_checksum = crc32fast::hash(&payload);

        if stored_checksum != computed_checksum {
            return Err(StoreError::ChecksumMismatch {
                expected: stored_checksum,
                got: computed_checksum,
            });
        }

        Ok(LogEntry {
            op,
            timestamp,
            key,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_append_and_read() {
        let dir = TempDir::new().unwrap();
        let (log, live) = CollectionLog::open(dir.path().join("test.log")).unwrap();
        assert!(live.is_empty());

        let offset = log.append_put("k1", b"{\"id\":\"k1\"}").unwrap();
        assert_eq!(offset, 0);

        let entry = log.read_at(offset).unwrap();
        assert_eq!(entry.op, EntryOp::Put);
        assert_eq!(entry.key, "k1");
        assert_eq!(entry.payload, b"{\"id\":\"k1\"}");
        assert!(entry.timestamp > Timestamp(0));
    }

    #[test]
    fn test_replay_applies_tombstones() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.log");

        {
            let (log, _) = CollectionLog::open(&path).unwrap();
            log.append_put("a", b"1").unwrap();
            log.append_put("b", b"2").unwrap();
            log.append_delete("a").unwrap();
            log.append_put("c", b"3").unwrap();
        }

        let (_, live) = CollectionLog::open(&path).unwrap();
        assert_eq!(live.len(), 2);
        assert!(!live.contains_key("a"));
        assert!(live.contains_key("b"));
        assert!(live.contains_key("c"));
    }

    #[test]
    fn test_replay_keeps_latest_put_offset() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.log");

        let second_offset;
        {
            let (log, _) = CollectionLog::open(&path).unwrap();
            log.append_put("a", b"old").unwrap();
            second_offset = log.append_put("a", b"new").unwrap();
        }

        let (log, live) = CollectionLog::open(&path).unwrap();
        assert_eq!(live["a"], second_offset);
        assert_eq!(log.read_at(live["a"]).unwrap().payload, b"new");
    }

    #[test]
    fn test_torn_tail_is_ignored_and_overwritten() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.log");

        {
            let (log, _) = CollectionLog::open(&path).unwrap();
            log.append_put("a", b"1").unwrap();
        }

        // Simulate a crash mid-append: garbage after the last good entry.
        {
            use std::fs::OpenOptions;
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(b"DOC\0\x01\x00partial").unwrap();
        }

        let (log, live) = CollectionLog::open(&path).unwrap();
        assert_eq!(live.len(), 1);

        // The next append lands where the torn tail began.
        log.append_put("b", b"2").unwrap();
        let (_, live) = CollectionLog::open(&path).unwrap();
        assert_eq!(live.len(), 2);
    }

    #[test]
    fn test_oversized_key_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.log");

        let long_key = "k".repeat(70_000);
        {
            let (log, _) = CollectionLog::open(&path).unwrap();
            let err = log.append_put(&long_key, b"v").unwrap_err();
            assert!(matches!(err, StoreError::InvalidKey(_)));

            // The rejected append leaves the log intact for later writes.
            log.append_put("ok", b"v").unwrap();
        }

        let (_, live) = CollectionLog::open(&path).unwrap();
        assert_eq!(live.len(), 1);
        assert!(live.contains_key("ok"));
    }

    #[test]
    fn test_delete_then_reinsert() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.log");

        {
            let (log, _) = CollectionLog::open(&path).unwrap();
            log.append_put("a", b"v1").unwrap();
            log.append_delete("a").unwrap();
            log.append_put("a", b"v2").unwrap();
        }

        let (log, live) = CollectionLog::open(&path).unwrap();
        assert_eq!(log.read_at(live["a"]).unwrap().payload, b"v2");
    }
}
