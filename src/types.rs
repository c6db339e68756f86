//! Core types for the media store.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::collections::{Document, JsonMap, UpsertDocument};
use crate::error::{Result, StoreError};
use crate::schema;

/// Milliseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current wall-clock time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("Time went backwards");
        Timestamp(duration.as_millis() as i64)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

impl From<Timestamp> for serde_json::Value {
    fn from(ts: Timestamp) -> Self {
        serde_json::Value::from(ts.0)
    }
}

/// A playback session.
///
/// `audio_id`/`subtitle_id` may reference blobs that no longer exist; the
/// store tolerates dangling references and the vacuum pass reconciles them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,

    /// Playback position, in seconds.
    #[serde(default)]
    pub progress: f64,

    /// Media duration, in seconds.
    #[serde(default)]
    pub duration: f64,

    #[serde(default)]
    pub audio_id: Option<String>,

    #[serde(default)]
    pub subtitle_id: Option<String>,

    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub last_opened_at: Timestamp,
}

impl Session {
    /// Create a session with a freshly stamped envelope.
    pub fn new(id: impl Into<String>) -> Self {
        let now = Timestamp::now();
        Self {
            id: id.into(),
            progress: 0.0,
            duration: 0.0,
            audio_id: None,
            subtitle_id: None,
            created_at: now,
            updated_at: now,
            last_opened_at: now,
        }
    }
}

impl Document for Session {
    const COLLECTION: &'static str = schema::SESSIONS;

    fn key(&self) -> String {
        self.id.clone()
    }

    fn stamp_update(record: &mut JsonMap, patch: &JsonMap, now: Timestamp) {
        record.insert("updatedAt".into(), now.into());
        // An explicitly supplied lastOpenedAt wins; otherwise touching
        // progress counts as opening the session.
        if !patch.contains_key("lastOpenedAt") && patch.contains_key("progress") {
            record.insert("lastOpenedAt".into(), now.into());
        }
    }
}

/// An audio blob. The payload lives in the sidecar payload store, not in the
/// collection log; only the envelope is serialized.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioBlob {
    pub id: String,

    #[serde(skip)]
    pub payload: Vec<u8>,

    pub byte_size: u64,
    pub mime_type: String,
    pub created_at: Timestamp,
}

impl AudioBlob {
    pub fn new(id: impl Into<String>, payload: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            byte_size: payload.len() as u64,
            payload,
            mime_type: mime_type.into(),
            created_at: Timestamp::now(),
        }
    }
}

impl Document for AudioBlob {
    const COLLECTION: &'static str = schema::AUDIOS;

    fn key(&self) -> String {
        self.id.clone()
    }

    fn take_payload(&mut self) -> Option<Vec<u8>> {
        Some(std::mem::take(&mut self.payload))
    }

    fn restore_payload(&mut self, bytes: Vec<u8>) {
        self.payload = bytes;
    }
}

/// A subtitle blob (text payload, sidecar-stored like audio).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtitleBlob {
    pub id: String,

    #[serde(skip)]
    pub payload: String,

    pub byte_size: u64,
    pub created_at: Timestamp,
}

impl SubtitleBlob {
    pub fn new(id: impl Into<String>, payload: impl Into<String>) -> Self {
        let payload = payload.into();
        Self {
            id: id.into(),
            byte_size: payload.len() as u64,
            payload,
            created_at: Timestamp::now(),
        }
    }
}

impl Document for SubtitleBlob {
    const COLLECTION: &'static str = schema::SUBTITLES;

    fn key(&self) -> String {
        self.id.clone()
    }

    fn take_payload(&mut self) -> Option<Vec<u8>> {
        Some(std::mem::take(&mut self.payload).into_bytes())
    }

    fn restore_payload(&mut self, bytes: Vec<u8>) {
        self.payload = String::from_utf8_lossy(&bytes).into_owned();
    }
}

/// A podcast feed the user is subscribed to. Keyed by feed URL.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodcastSubscription {
    pub feed_url: String,

    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub author: String,

    #[serde(default)]
    pub artwork_url: String,

    #[serde(default)]
    pub view_url: String,

    /// Stamped by `upsert`; preserved across overwrites.
    #[serde(default)]
    pub added_at: Option<Timestamp>,

    #[serde(default)]
    pub updated_at: Option<Timestamp>,
}

impl PodcastSubscription {
    pub fn new(feed_url: impl Into<String>) -> Self {
        Self {
            feed_url: feed_url.into(),
            title: String::new(),
            author: String::new(),
            artwork_url: String::new(),
            view_url: String::new(),
            added_at: None,
            updated_at: None,
        }
    }
}

impl Document for PodcastSubscription {
    const COLLECTION: &'static str = schema::PODCASTS;

    fn key(&self) -> String {
        self.feed_url.clone()
    }
}

impl UpsertDocument for PodcastSubscription {
    fn normalize(&mut self) {
        self.feed_url = self.feed_url.trim().to_string();
    }

    fn validate_key(&self) -> Result<()> {
        if self.feed_url.trim().is_empty() {
            return Err(StoreError::InvalidKey("podcast feedUrl is empty".into()));
        }
        Ok(())
    }

    fn added_at(&self) -> Option<Timestamp> {
        self.added_at
    }

    fn stamp_upsert(&mut self, added_at: Timestamp, now: Timestamp) {
        self.added_at = Some(added_at);
        self.updated_at = Some(now);
    }
}

/// A favorited episode. Keyed by `feedUrl + "::" + audioUrl` so the same
/// episode favorited from two feeds stays distinct.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FavoriteEpisode {
    pub key: String,
    pub feed_url: String,
    pub audio_url: String,

    #[serde(default)]
    pub episode_title: String,

    #[serde(default)]
    pub episode_duration: Option<f64>,

    #[serde(default)]
    pub podcast_title: String,

    #[serde(default)]
    pub artwork_url: String,

    #[serde(default)]
    pub added_at: Option<Timestamp>,

    #[serde(default)]
    pub updated_at: Option<Timestamp>,
}

impl FavoriteEpisode {
    pub fn new(feed_url: impl Into<String>, audio_url: impl Into<String>) -> Self {
        let feed_url = feed_url.into();
        let audio_url = audio_url.into();
        Self {
            key: Self::composite_key(&feed_url, &audio_url),
            feed_url,
            audio_url,
            episode_title: String::new(),
            episode_duration: None,
            podcast_title: String::new(),
            artwork_url: String::new(),
            added_at: None,
            updated_at: None,
        }
    }

    /// Composite primary key for a favorite.
    pub fn composite_key(feed_url: &str, audio_url: &str) -> String {
        format!("{}::{}", feed_url.trim(), audio_url.trim())
    }
}

impl Document for FavoriteEpisode {
    const COLLECTION: &'static str = schema::FAVORITES;

    fn key(&self) -> String {
        self.key.clone()
    }
}

impl UpsertDocument for FavoriteEpisode {
    fn normalize(&mut self) {
        self.feed_url = self.feed_url.trim().to_string();
        self.audio_url = self.audio_url.trim().to_string();
        self.key = Self::composite_key(&self.feed_url, &self.audio_url);
    }

    fn validate_key(&self) -> Result<()> {
        if self.feed_url.trim().is_empty() {
            return Err(StoreError::InvalidKey("favorite feedUrl is empty".into()));
        }
        if self.audio_url.trim().is_empty() {
            return Err(StoreError::InvalidKey("favorite audioUrl is empty".into()));
        }
        Ok(())
    }

    fn added_at(&self) -> Option<Timestamp> {
        self.added_at
    }

    fn stamp_upsert(&mut self, added_at: Timestamp, now: Timestamp) {
        self.added_at = Some(added_at);
        self.updated_at = Some(now);
    }
}

/// Result of a vacuum pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VacuumStats {
    /// Orphaned audio blobs deleted.
    pub audios_deleted: u64,
    /// Orphaned subtitle blobs deleted.
    pub subtitles_deleted: u64,
}

/// Store statistics.
#[derive(Clone, Debug, Default)]
pub struct StoreStats {
    pub session_count: usize,
    pub audio_count: usize,
    pub subtitle_count: usize,
    pub podcast_count: usize,
    pub favorite_count: usize,
    /// Bytes held by collection logs.
    pub log_size_bytes: u64,
    /// Bytes held by sidecar payload files.
    pub payload_size_bytes: u64,
}
