//! Payload storage implementation.
//!
//! Records in a blob collection keep their bytes out of the JSON log: each
//! payload lives in its own file, keyed by the owning record's primary key
//! and sharded by the first two hex characters of the encoded key.

use crate::error::{Result, StoreError};
use lru::LruCache;
use parking_lot::Mutex;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

/// Magic bytes for payload files.
const PAYLOAD_MAGIC: &[u8; 4] = b"PAY\0";

/// Current payload format version.
const PAYLOAD_VERSION: u8 = 1;

/// Key-addressed payload storage for one blob collection.
#[derive(Debug)]
pub struct PayloadStore {
    /// Base directory for payload files.
    path: PathBuf,

    /// LRU cache for recently accessed payloads.
    cache: Mutex<LruCache<String, Vec<u8>>>,
}

impl PayloadStore {
    /// Open a payload store at the given path, creating it if missing.
    pub fn open(path: impl AsRef<Path>, cache_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path)?;

        let cache_size = NonZeroUsize::new(cache_size.max(1)).unwrap();

        Ok(Self {
            path,
            cache: Mutex::new(LruCache::new(cache_size)),
        })
    }

    /// Store a payload under a record key, overwriting any previous bytes.
    pub fn store(&self, key: &str, content: &[u8]) -> Result<()> {
        let shard_dir = self.shard_path(key);
        fs::create_dir_all(&shard_dir)?;

        let payload_path = self.payload_path(key);
        let mut file = File::create(&payload_path)?;

        file.write_all(PAYLOAD_MAGIC)?;
        file.write_all(&[PAYLOAD_VERSION])?;

        let content_len = content.len() as u64;
        file.write_all(&content_len.to_le_bytes())?;
        file.write_all(content)?;

        let checksum = crc32fast::hash(content);
        file.write_all(&checksum.to_le_bytes())?;

        file.sync_all()?;

        self.cache.lock().put(key.to_string(), content.to_vec());

        Ok(())
    }

    /// Get the payload stored under a record key.
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if let Some(cached) = self.cache.lock().get(key).cloned() {
            return Ok(Some(cached));
        }

        let payload_path = self.payload_path(key);
        if !payload_path.exists() {
            return Ok(None);
        }

        let mut file = File::open(&payload_path)?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != PAYLOAD_MAGIC {
            return Err(StoreError::InvalidFormat("Invalid payload magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != PAYLOAD_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported payload version: {}",
                version[0]
            )));
        }

        let mut content_len_bytes = [0u8; 8];
        file.read_exact(&mut content_len_bytes)?;
        let content_len = u64::from_le_bytes(content_len_bytes) as usize;

        let mut content = vec![0u8; content_len];
        file.read_exact(&mut content)?;

        let mut checksum_bytes = [0u8; 4];
        file.read_exact(&mut checksum_bytes)?;
        let stored_checksum = u32::from_le_bytes(checksum_bytes);
        let computed_checksum = crc32fast::hash(&content);

        if stored_checksum != computed_checksum {
            return Err(StoreError::ChecksumMismatch {
                expected: stored_checksum,
                got: computed_checksum,
            });
        }

        self.cache.lock().put(key.to_string(), content.clone());

        Ok(Some(content))
    }

    /// Check if a payload exists for a record key.
    pub fn exists(&self, key: &str) -> bool {
        if self.cache.lock().contains(key) {
            return true;
        }
        self.payload_path(key).exists()
    }

    /// Delete a payload (used by vacuum and record deletion).
    pub fn delete(&self, key: &str) -> Result<bool> {
        self.cache.lock().pop(key);

        let payload_path = self.payload_path(key);
        if payload_path.exists() {
            fs::remove_file(&payload_path)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// List the record keys of all payloads on disk.
    pub fn list_keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();

        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                for payload_entry in fs::read_dir(entry.path())? {
                    let payload_entry = payload_entry?;
                    let filename = payload_entry.file_name();
                    let filename_str = filename.to_string_lossy();
                    if let Ok(decoded) = hex::decode(filename_str.as_ref()) {
                        keys.push(String::from_utf8_lossy(&decoded).into_owned());
                    }
                }
            }
        }

        Ok(keys)
    }

    /// Total size of all payload files in bytes.
    pub fn total_size(&self) -> Result<u64> {
        let mut total = 0u64;

        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                for payload_entry in fs::read_dir(entry.path())? {
                    let payload_entry = payload_entry?;
                    total += payload_entry.metadata()?.len();
                }
            }
        }

        Ok(total)
    }

    /// Shard directory for a record key.
    fn shard_path(&self, key: &str) -> PathBuf {
        let encoded = hex::encode(key.as_bytes());
        let shard = if encoded.len() >= 2 {
            &encoded[..2]
        } else {
            "00"
        };
        self.path.join(shard)
    }

    /// Full path of a payload file.
    fn payload_path(&self, key: &str) -> PathBuf {
        self.shard_path(key).join(hex::encode(key.as_bytes()))
    }
}
