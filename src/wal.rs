//! Vacuum journal for crash recovery.
//!
//! The journal writes the full deletion plan before vacuum touches any
//! collection, then a commit marker once every deletion has been applied.
//! A crash between the two leaves a pending plan; re-applying it on the
//! next open is safe because every deletion is idempotent.

use crate::error::{Result, StoreError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Magic bytes for the journal file.
const JOURNAL_MAGIC: &[u8; 4] = b"JNL\0";

/// Current journal format version.
const JOURNAL_VERSION: u8 = 1;

/// Journal entry status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalEntryStatus {
    /// Plan written, deletions not yet fully applied.
    Pending,
    /// All deletions applied.
    Committed,
}

/// A single journal entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Unique sequence number for this entry.
    pub seq: u64,
    /// Entry status.
    pub status: JournalEntryStatus,
    /// The journaled operation.
    pub operation: JournalOp,
    /// Unix seconds when the entry was written.
    pub timestamp: u64,
}

/// Operations recorded in the journal.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum JournalOp {
    /// A vacuum deletion plan: the orphaned blob keys to delete.
    Vacuum {
        audio_keys: Vec<String>,
        subtitle_keys: Vec<String>,
    },
    /// Commit marker for a previously journaled plan.
    Commit { of: u64 },
}

/// Vacuum journal manager.
#[derive(Debug)]
pub struct Journal {
    /// Path to the journal file.
    path: PathBuf,
    /// Next sequence number to hand out.
    next_seq: Mutex<u64>,
    /// Write handle.
    writer: Mutex<Option<BufWriter<File>>>,
}

impl Journal {
    /// Create or open a journal file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let (next_seq, writer) = if path.exists() {
            let file = OpenOptions::new().read(true).open(&path)?;
            let mut reader = BufReader::new(file);

            let mut magic = [0u8; 4];
            reader.read_exact(&mut magic)?;
            if &magic != JOURNAL_MAGIC {
                return Err(StoreError::InvalidFormat("Invalid journal magic".into()));
            }

            let mut version = [0u8; 1];
            reader.read_exact(&mut version)?;
            if version[0] != JOURNAL_VERSION {
                return Err(StoreError::InvalidFormat(format!(
                    "Unsupported journal version: {}",
                    version[0]
                )));
            }

            // Scan entries to find the highest sequence number.
            let mut max_seq = 0u64;
            while let Ok(entry) = Self::read_entry(&mut reader) {
                max_seq = max_seq.max(entry.seq);
            }

            let file = OpenOptions::new().append(true).open(&path)?;

            (max_seq + 1, Some(BufWriter::new(file)))
        } else {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&path)?;

            file.write_all(JOURNAL_MAGIC)?;
            file.write_all(&[JOURNAL_VERSION])?;
            file.sync_all()?;

            (1, Some(BufWriter::new(file)))
        };

        Ok(Self {
            path,
            next_seq: Mutex::new(next_seq),
            writer: Mutex::new(writer),
        })
    }

    /// Journal a deletion plan, returning its sequence number. The entry is
    /// fsynced before this returns.
    pub fn begin(&self, operation: JournalOp) -> Result<u64> {
        let mut next_seq = self.next_seq.lock();
        let seq = *next_seq;
        *next_seq += 1;

        let entry = JournalEntry {
            seq,
            status: JournalEntryStatus::Pending,
            operation,
            timestamp: unix_seconds(),
        };

        let mut writer = self.writer.lock();
        if let Some(ref mut w) = *writer {
            Self::write_entry(w, &entry)?;
            w.flush()?;
            w.get_ref().sync_all()?;
        }

        Ok(seq)
    }

    /// Mark a journaled plan as fully applied.
    pub fn commit(&self, seq: u64) -> Result<()> {
        let mut writer = self.writer.lock();
        if let Some(ref mut w) = *writer {
            let marker = JournalEntry {
                seq,
                status: JournalEntryStatus::Committed,
                operation: JournalOp::Commit { of: seq },
                timestamp: unix_seconds(),
            };
            Self::write_entry(w, &marker)?;
            w.flush()?;
            w.get_ref().sync_all()?;
        }
        Ok(())
    }

    /// All plans that were journaled but never committed.
    pub fn pending(&self) -> Result<Vec<JournalEntry>> {
        let mut file = File::open(&self.path)?;

        // Skip header.
        file.seek(SeekFrom::Start(5))?;

        let mut reader = BufReader::new(file);
        let mut entries = std::collections::HashMap::new();
        let mut committed = std::collections::HashSet::new();

        while let Ok(entry) = Self::read_entry(&mut reader) {
            match entry.status {
                JournalEntryStatus::Committed => {
                    committed.insert(entry.seq);
                }
                JournalEntryStatus::Pending => {
                    entries.insert(entry.seq, entry);
                }
            }
        }

        let mut pending: Vec<_> = entries
            .into_iter()
            .filter(|(seq, _)| !committed.contains(seq))
            .map(|(_, entry)| entry)
            .collect();
        pending.sort_by_key(|entry| entry.seq);

        Ok(pending)
    }

    /// Truncate the journal after recovery or a completed vacuum.
    pub fn reset(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        *writer = None;

        let mut file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.path)?;

        file.write_all(JOURNAL_MAGIC)?;
        file.write_all(&[JOURNAL_VERSION])?;
        file.sync_all()?;

        *writer = Some(BufWriter::new(
            OpenOptions::new().append(true).open(&self.path)?,
        ));

        *self.next_seq.lock() = 1;

        Ok(())
    }

    /// Whether any plan is still uncommitted.
    pub fn has_pending(&self) -> Result<bool> {
        Ok(!self.pending()?.is_empty())
    }

    fn write_entry(writer: &mut BufWriter<File>, entry: &JournalEntry) -> Result<()> {
        let encoded =
            rmp_serde::to_vec(entry).map_err(|e| StoreError::Serialization(e.to_string()))?;

        let len = encoded.len() as u32;
        writer.write_all(&len.to_le_bytes())?;
        writer.write_all(&encoded)?;

        let checksum = crc32fast::hash(&encoded);
        writer.write_all(&checksum.to_le_bytes())?;

        Ok(())
    }

    fn read_entry(reader: &mut BufReader<File>) -> Result<JournalEntry> {
        let mut len_bytes = [0u8; 4];
        reader.read_exact(&mut len_bytes)?;
        let len = u32::from_le_bytes(len_bytes) as usize;

        if len > 100 * 1024 * 1024 {
            return Err(StoreError::Corruption("Journal entry too large".into()));
        }

        let mut encoded = vec![0u8; len];
        reader.read_exact(&mut encoded)?;

        let mut checksum_bytes = [0u8; 4];
        reader.read_exact(&mut checksum_bytes)?;
        let stored_checksum = u32::from_le_bytes(checksum_bytes);

        let computed_checksum = crc32fast::hash(&encoded);
        if stored_checksum != computed_checksum {
            return Err(StoreError::Corruption("Journal checksum mismatch".into()));
        }

        rmp_serde::from_slice(&encoded).map_err(|e| StoreError::Deserialization(e.to_string()))
    }
}

fn unix_seconds() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn plan(audio: &[&str], subtitle: &[&str]) -> JournalOp {
        JournalOp::Vacuum {
            audio_keys: audio.iter().map(|s| s.to_string()).collect(),
            subtitle_keys: subtitle.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_begin_and_commit() {
        let dir = TempDir::new().unwrap();
        let journal = Journal::open(dir.path().join("test.journal")).unwrap();

        let seq = journal.begin(plan(&["a1"], &["s1"])).unwrap();
        assert_eq!(seq, 1);

        let pending = journal.pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].seq, 1);

        journal.commit(1).unwrap();
        assert!(!journal.has_pending().unwrap());
    }

    #[test]
    fn test_pending_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.journal");

        // Journal a plan and drop without committing.
        {
            let journal = Journal::open(&path).unwrap();
            journal.begin(plan(&["a1", "a2"], &[])).unwrap();
        }

        let journal = Journal::open(&path).unwrap();
        let pending = journal.pending().unwrap();
        assert_eq!(pending.len(), 1);

        match &pending[0].operation {
            JournalOp::Vacuum { audio_keys, subtitle_keys } => {
                assert_eq!(audio_keys, &["a1", "a2"]);
                assert!(subtitle_keys.is_empty());
            }
            other => panic!("unexpected operation: {:?}", other),
        }
    }

    #[test]
    fn test_commit_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.journal");

        {
            let journal = Journal::open(&path).unwrap();
            let seq = journal.begin(plan(&["a1"], &[])).unwrap();
            journal.commit(seq).unwrap();
        }

        let journal = Journal::open(&path).unwrap();
        assert!(!journal.has_pending().unwrap());
    }

    #[test]
    fn test_reset() {
        let dir = TempDir::new().unwrap();
        let journal = Journal::open(dir.path().join("test.journal")).unwrap();

        journal.begin(plan(&["a1"], &[])).unwrap();
        assert!(journal.has_pending().unwrap());

        journal.reset().unwrap();
        assert!(!journal.has_pending().unwrap());

        // Sequence numbers restart after a reset.
        let seq = journal.begin(plan(&[], &["s1"])).unwrap();
        assert_eq!(seq, 1);
    }

    #[test]
    fn test_multiple_plans_partial_commit() {
        let dir = TempDir::new().unwrap();
        let journal = Journal::open(dir.path().join("test.journal")).unwrap();

        let s1 = journal.begin(plan(&["a1"], &[])).unwrap();
        let s2 = journal.begin(plan(&["a2"], &[])).unwrap();
        journal.commit(s1).unwrap();

        let pending = journal.pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].seq, s2);
    }
}
