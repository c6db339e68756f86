//! Main Store struct tying all components together.

use crate::blobs::PayloadStore;
use crate::collections::{Collection, CollectionStore};
use crate::error::{Result, StoreError};
use crate::schema::{self, CollectionDef, SCHEMA_VERSION, UPGRADES};
use crate::types::{
    AudioBlob, FavoriteEpisode, PodcastSubscription, Session, StoreStats, SubtitleBlob,
    VacuumStats,
};
use crate::wal::{Journal, JournalOp};
use fs2::FileExt;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

/// Magic bytes for the store manifest.
const STORE_MAGIC: &[u8; 4] = b"MPS\0";

/// Current manifest format version.
const MANIFEST_VERSION: u8 = 1;

/// Store configuration.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Base path for the store.
    pub path: PathBuf,

    /// Record/payload cache size per collection (number of entries).
    pub cache_size: usize,

    /// Whether to create the store if it doesn't exist.
    pub create_if_missing: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./mediastore"),
            cache_size: 256,
            create_if_missing: true,
        }
    }
}

/// The media object store.
///
/// Five collections behind one handle: playback sessions, audio blobs,
/// subtitle blobs, podcast subscriptions, and favorite episodes. Blob
/// payloads live in sidecar payload stores; the vacuum pass reclaims
/// payloads whose blobs no session references anymore.
#[derive(Debug)]
pub struct Store {
    /// Store configuration.
    config: StoreConfig,

    /// Lock file for exclusive access.
    _lock_file: File,

    sessions: Collection,
    audios: Collection,
    subtitles: Collection,
    podcasts: Collection,
    favorites: Collection,

    audio_payloads: PayloadStore,
    subtitle_payloads: PayloadStore,

    /// Vacuum journal.
    journal: Journal,

    /// Lock for write operations to ensure atomicity.
    write_lock: Mutex<()>,
}

impl Store {
    /// Open an existing store or create a new one.
    pub fn open_or_create(config: StoreConfig) -> Result<Self> {
        if config.path.join("MANIFEST").exists() {
            Self::open(config)
        } else if config.create_if_missing {
            Self::create(config)
        } else {
            Err(StoreError::NotInitialized)
        }
    }

    /// Create a new store.
    pub fn create(config: StoreConfig) -> Result<Self> {
        fs::create_dir_all(&config.path)?;

        // Fresh stores start at schema version 0 and migrate up from there,
        // so creation and upgrade share one code path.
        Self::write_manifest(&config.path, 0)?;

        let lock_file = Self::acquire_lock(&config.path)?;
        Self::migrate(&config.path, 0)?;

        tracing::info!(path = %config.path.display(), "created store");
        Self::open_components(config, lock_file)
    }

    /// Open an existing store.
    pub fn open(config: StoreConfig) -> Result<Self> {
        let disk_version = Self::read_manifest(&config.path)?;
        if disk_version > SCHEMA_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Store schema version {} is newer than supported version {}",
                disk_version, SCHEMA_VERSION
            )));
        }

        let lock_file = Self::acquire_lock(&config.path)?;

        if disk_version < SCHEMA_VERSION {
            Self::migrate(&config.path, disk_version)?;
        }

        tracing::info!(path = %config.path.display(), schema = disk_version, "opened store");
        Self::open_components(config, lock_file)
    }

    fn open_components(config: StoreConfig, lock_file: File) -> Result<Self> {
        let sessions = Self::open_collection(&schema::SESSIONS_DEF, &config)?;
        let audios = Self::open_collection(&schema::AUDIOS_DEF, &config)?;
        let subtitles = Self::open_collection(&schema::SUBTITLES_DEF, &config)?;
        let podcasts = Self::open_collection(&schema::PODCASTS_DEF, &config)?;
        let favorites = Self::open_collection(&schema::FAVORITES_DEF, &config)?;

        let audio_payloads = PayloadStore::open(
            config.path.join(schema::AUDIOS_DEF.payload_dir().unwrap()),
            config.cache_size,
        )?;
        let subtitle_payloads = PayloadStore::open(
            config.path.join(schema::SUBTITLES_DEF.payload_dir().unwrap()),
            config.cache_size,
        )?;

        let journal = Journal::open(config.path.join("vacuum.journal"))?;

        let store = Self {
            config,
            _lock_file: lock_file,
            sessions,
            audios,
            subtitles,
            podcasts,
            favorites,
            audio_payloads,
            subtitle_payloads,
            journal,
            write_lock: Mutex::new(()),
        };

        store.recover_journal()?;

        Ok(store)
    }

    fn open_collection(def: &'static CollectionDef, config: &StoreConfig) -> Result<Collection> {
        Collection::open(def, &config.path, config.cache_size)
    }

    /// Apply schema upgrade steps newer than the on-disk version, then stamp
    /// the manifest with the current version. Steps only create files that
    /// are missing; existing data is never touched.
    fn migrate(path: &Path, from_version: u32) -> Result<()> {
        for step in UPGRADES.iter().filter(|step| step.version > from_version) {
            for def in step.creates {
                let log_path = path.join(def.log_file());
                if !log_path.exists() {
                    OpenOptions::new()
                        .write(true)
                        .create(true)
                        .open(&log_path)?
                        .sync_all()?;
                }
                if let Some(dir) = def.payload_dir() {
                    fs::create_dir_all(path.join(dir))?;
                }
            }
            tracing::info!(version = step.version, "applied schema upgrade");
        }

        Self::write_manifest(path, SCHEMA_VERSION)?;
        Ok(())
    }

    /// Re-apply any vacuum plan that was journaled but never committed.
    /// Every deletion is idempotent, so replaying a half-applied plan is
    /// safe.
    fn recover_journal(&self) -> Result<()> {
        let pending = self.journal.pending()?;
        if pending.is_empty() {
            return Ok(());
        }

        for entry in &pending {
            if let JournalOp::Vacuum {
                audio_keys,
                subtitle_keys,
            } = &entry.operation
            {
                tracing::debug!(
                    seq = entry.seq,
                    audios = audio_keys.len(),
                    subtitles = subtitle_keys.len(),
                    "replaying uncommitted vacuum plan"
                );
                self.apply_vacuum_plan(audio_keys, subtitle_keys)?;
            }
        }

        self.journal.reset()?;
        Ok(())
    }

    // --- Collection Accessors ---

    /// Playback sessions.
    pub fn sessions(&self) -> CollectionStore<'_, Session> {
        CollectionStore::new(&self.sessions, None, &self.write_lock)
    }

    /// Audio blobs.
    pub fn audios(&self) -> CollectionStore<'_, AudioBlob> {
        CollectionStore::new(&self.audios, Some(&self.audio_payloads), &self.write_lock)
    }

    /// Subtitle blobs.
    pub fn subtitles(&self) -> CollectionStore<'_, SubtitleBlob> {
        CollectionStore::new(
            &self.subtitles,
            Some(&self.subtitle_payloads),
            &self.write_lock,
        )
    }

    /// Podcast subscriptions.
    pub fn podcasts(&self) -> CollectionStore<'_, PodcastSubscription> {
        CollectionStore::new(&self.podcasts, None, &self.write_lock)
    }

    /// Favorite episodes.
    pub fn favorites(&self) -> CollectionStore<'_, FavoriteEpisode> {
        CollectionStore::new(&self.favorites, None, &self.write_lock)
    }

    /// Record count of a collection by name.
    pub fn count(&self, collection: &str) -> Result<usize> {
        self.collection_by_name(collection)
            .map(Collection::count)
            .ok_or_else(|| StoreError::UnknownCollection(collection.to_string()))
    }

    fn collection_by_name(&self, name: &str) -> Option<&Collection> {
        match name {
            schema::SESSIONS => Some(&self.sessions),
            schema::AUDIOS => Some(&self.audios),
            schema::SUBTITLES => Some(&self.subtitles),
            schema::PODCASTS => Some(&self.podcasts),
            schema::FAVORITES => Some(&self.favorites),
            _ => None,
        }
    }

    // --- Vacuum ---

    /// Delete audio and subtitle blobs that no session references.
    ///
    /// The pass works on a single snapshot of the session collection:
    /// mutations in other threads are blocked by the write lock for the
    /// whole pass, so the snapshot cannot go stale. Readers are not
    /// blocked and may watch the planned deletions land one at a time;
    /// what holds throughout is that a blob referenced by a live session
    /// is never deleted. The deletion plan is journaled before any blob is
    /// touched and committed after the last one, so a crash mid-pass
    /// finishes on the next open instead of leaving a partial sweep.
    pub fn vacuum(&self) -> Result<VacuumStats> {
        let _guard = self.write_lock.lock();

        let mut referenced_audios = HashSet::new();
        let mut referenced_subtitles = HashSet::new();
        for record in self.sessions.scan()? {
            if let Some(id) = record.get("audioId").and_then(Value::as_str) {
                referenced_audios.insert(id.to_string());
            }
            if let Some(id) = record.get("subtitleId").and_then(Value::as_str) {
                referenced_subtitles.insert(id.to_string());
            }
        }

        let audio_keys: Vec<String> = self
            .audios
            .keys()
            .into_iter()
            .filter(|key| !referenced_audios.contains(key))
            .collect();
        let subtitle_keys: Vec<String> = self
            .subtitles
            .keys()
            .into_iter()
            .filter(|key| !referenced_subtitles.contains(key))
            .collect();

        // Payload files whose envelope is already gone are swept without
        // journaling; payload deletion is idempotent and invisible to the
        // record API.
        self.sweep_stray_payloads()?;

        if audio_keys.is_empty() && subtitle_keys.is_empty() {
            return Ok(VacuumStats::default());
        }

        let seq = self
            .journal
            .begin(JournalOp::Vacuum {
                audio_keys: audio_keys.clone(),
                subtitle_keys: subtitle_keys.clone(),
            })
            .map_err(|e| StoreError::TransactionAborted(e.to_string()))?;

        let (audios_deleted, subtitles_deleted) =
            self.apply_vacuum_plan(&audio_keys, &subtitle_keys)?;

        self.journal.commit(seq)?;
        self.journal.reset()?;

        tracing::debug!(audios_deleted, subtitles_deleted, "vacuum completed");

        Ok(VacuumStats {
            audios_deleted,
            subtitles_deleted,
        })
    }

    fn apply_vacuum_plan(
        &self,
        audio_keys: &[String],
        subtitle_keys: &[String],
    ) -> Result<(u64, u64)> {
        let mut audios_deleted = 0u64;
        let mut subtitles_deleted = 0u64;

        for key in audio_keys {
            if self.audios.remove(key)? {
                audios_deleted += 1;
            }
            self.audio_payloads.delete(key)?;
        }
        for key in subtitle_keys {
            if self.subtitles.remove(key)? {
                subtitles_deleted += 1;
            }
            self.subtitle_payloads.delete(key)?;
        }

        Ok((audios_deleted, subtitles_deleted))
    }

    fn sweep_stray_payloads(&self) -> Result<()> {
        for key in self.audio_payloads.list_keys()? {
            if !self.audios.contains(&key) {
                self.audio_payloads.delete(&key)?;
            }
        }
        for key in self.subtitle_payloads.list_keys()? {
            if !self.subtitles.contains(&key) {
                self.subtitle_payloads.delete(&key)?;
            }
        }
        Ok(())
    }

    // --- Store Operations ---

    /// Get store statistics.
    pub fn stats(&self) -> Result<StoreStats> {
        Ok(StoreStats {
            session_count: self.sessions.count(),
            audio_count: self.audios.count(),
            subtitle_count: self.subtitles.count(),
            podcast_count: self.podcasts.count(),
            favorite_count: self.favorites.count(),
            log_size_bytes: self.sessions.log_size()
                + self.audios.log_size()
                + self.subtitles.log_size()
                + self.podcasts.log_size()
                + self.favorites.log_size(),
            payload_size_bytes: self.audio_payloads.total_size()?
                + self.subtitle_payloads.total_size()?,
        })
    }

    /// Sync all data to disk.
    pub fn sync(&self) -> Result<()> {
        self.sessions.sync()?;
        self.audios.sync()?;
        self.subtitles.sync()?;
        self.podcasts.sync()?;
        self.favorites.sync()?;
        Ok(())
    }

    /// Get the store path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    // --- Private Helpers ---

    fn write_manifest(path: &Path, schema_version: u32) -> Result<()> {
        use std::io::Write;

        let manifest_path = path.join("MANIFEST");
        let mut file = File::create(manifest_path)?;

        file.write_all(STORE_MAGIC)?;
        file.write_all(&[MANIFEST_VERSION])?;
        file.write_all(&schema_version.to_le_bytes())?;
        file.sync_all()?;

        Ok(())
    }

    /// Verify the manifest and return the on-disk schema version.
    fn read_manifest(path: &Path) -> Result<u32> {
        use std::io::Read;

        let manifest_path = path.join("MANIFEST");
        let mut file = File::open(manifest_path)?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != STORE_MAGIC {
            return Err(StoreError::InvalidFormat("Invalid store magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != MANIFEST_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported manifest version: {}",
                version[0]
            )));
        }

        let mut schema_bytes = [0u8; 4];
        file.read_exact(&mut schema_bytes)?;
        Ok(u32::from_le_bytes(schema_bytes))
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_path = path.join("LOCK");
        let lock_file = File::create(lock_path)?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| StoreError::Locked)?;

        Ok(lock_file)
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        // Best-effort sync on drop
        let _ = self.sync();
    }
}
