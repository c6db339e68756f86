//! # Media Store
//!
//! A versioned local object store for media playback data: sessions with
//! positions, audio and subtitle blobs, podcast subscriptions, and
//! favorite episodes.
//!
//! ## Core Concepts
//!
//! - **Collections**: Five schemas behind one handle, each an append-only
//!   log with an in-memory live map
//! - **Payloads**: Blob bytes live in sidecar files, keyed by record id
//! - **Schema versioning**: Ordered upgrade steps bring an older store to
//!   the current layout on open
//! - **Vacuum**: A journaled sweep that deletes blobs no session
//!   references anymore
//!
//! ## Example
//!
//! ```ignore
//! use mediastore::{Session, Store, StoreConfig};
//!
//! let store = Store::open_or_create(StoreConfig {
//!     path: "./my-store".into(),
//!     ..Default::default()
//! })?;
//!
//! // Record a playback session
//! store.sessions().add(Session::new("episode-42"))?;
//!
//! // Catch up on position later
//! store.sessions().update("episode-42", serde_json::json!({
//!     "progress": 1312.5
//! }))?;
//!
//! // Reclaim blobs nothing references
//! let stats = store.vacuum()?;
//! println!("deleted {} audio blobs", stats.audios_deleted);
//! ```

pub mod blobs;
pub mod collections;
pub mod connection;
pub mod error;
pub mod schema;
pub mod store;
pub mod types;
pub mod wal;

// Re-exports
pub use blobs::PayloadStore;
pub use collections::{CollectionStore, Document, JsonMap, UpsertDocument};
pub use error::{Result, StoreError};
pub use schema::{CollectionDef, IndexDef, SCHEMA_VERSION};
pub use store::{Store, StoreConfig};
pub use types::*;
pub use wal::{Journal, JournalEntry, JournalEntryStatus, JournalOp};
