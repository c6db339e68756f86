//! Generic collection machinery: the append-only log, the untyped
//! collection core, and the typed `CollectionStore<T>` CRUD façade.

pub(crate) mod log;
mod store;

pub(crate) use store::Collection;
pub use store::CollectionStore;

use crate::error::Result;
use crate::types::Timestamp;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// JSON object form of a stored record. `update` merges happen on this
/// representation, so field names match the serialized (camelCase) names.
pub type JsonMap = serde_json::Map<String, serde_json::Value>;

/// A record type stored in one collection.
pub trait Document: Serialize + DeserializeOwned {
    /// Collection this record type lives in.
    const COLLECTION: &'static str;

    /// Primary key of this record.
    fn key(&self) -> String;

    /// Detach the sidecar payload, if this record type carries one.
    fn take_payload(&mut self) -> Option<Vec<u8>> {
        None
    }

    /// Re-attach a sidecar payload loaded from disk.
    fn restore_payload(&mut self, bytes: Vec<u8>) {
        let _ = bytes;
    }

    /// Stamp envelope fields after an `update` merge. The default refreshes
    /// `updatedAt`; Session additionally refreshes `lastOpenedAt` when
    /// `progress` is touched.
    fn stamp_update(record: &mut JsonMap, patch: &JsonMap, now: Timestamp) {
        let _ = patch;
        record.insert("updatedAt".into(), now.into());
    }
}

/// A record type that supports validated upsert (podcasts and favorites).
pub trait UpsertDocument: Document {
    /// Trim key fields and default optionals to their canonical form.
    fn normalize(&mut self);

    /// Fail with `InvalidKey` if a required key field is empty after
    /// trimming.
    fn validate_key(&self) -> Result<()>;

    /// The explicitly supplied `addedAt`, if any.
    fn added_at(&self) -> Option<Timestamp>;

    /// Stamp the resolved `addedAt` and a fresh `updatedAt`.
    fn stamp_upsert(&mut self, added_at: Timestamp, now: Timestamp);
}
