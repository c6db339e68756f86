//! Untyped collection core and the typed CRUD façade.

use crate::blobs::PayloadStore;
use crate::collections::log::CollectionLog;
use crate::collections::{Document, JsonMap, UpsertDocument};
use crate::error::{Result, StoreError};
use crate::schema::CollectionDef;
use crate::types::Timestamp;
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::num::NonZeroUsize;
use std::path::Path;

/// One open collection: its log, the live key map, and a record cache.
#[derive(Debug)]
pub(crate) struct Collection {
    def: &'static CollectionDef,

    log: CollectionLog,

    /// Live keys -> offset of the latest put entry.
    live: RwLock<HashMap<String, u64>>,

    /// LRU cache of decoded records.
    cache: Mutex<LruCache<String, JsonMap>>,
}

impl Collection {
    /// Open a collection log inside the store directory.
    pub fn open(def: &'static CollectionDef, store_path: &Path, cache_size: usize) -> Result<Self> {
        let (log, live) = CollectionLog::open(store_path.join(def.log_file()))?;
        let cache_size = NonZeroUsize::new(cache_size.max(1)).unwrap();

        Ok(Self {
            def,
            log,
            live: RwLock::new(live),
            cache: Mutex::new(LruCache::new(cache_size)),
        })
    }

    pub fn def(&self) -> &'static CollectionDef {
        self.def
    }

    pub fn count(&self) -> usize {
        self.live.read().len()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.live.read().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.live.read().keys().cloned().collect()
    }

    /// Point lookup. Absent keys are `Ok(None)`.
    pub fn get_value(&self, key: &str) -> Result<Option<JsonMap>> {
        if let Some(cached) = self.cache.lock().get(key).cloned() {
            return Ok(Some(cached));
        }

        let offset = match self.live.read().get(key).copied() {
            Some(offset) => offset,
            None => return Ok(None),
        };

        let entry = self.log.read_at(offset)?;
        let record = decode_record(&entry.payload)?;
        self.cache.lock().put(key.to_string(), record.clone());

        Ok(Some(record))
    }

    /// Read every live record. Order is unspecified.
    pub fn scan(&self) -> Result<Vec<JsonMap>> {
        let offsets: Vec<u64> = self.live.read().values().copied().collect();
        let mut records = Vec::with_capacity(offsets.len());
        for offset in offsets {
            let entry = self.log.read_at(offset)?;
            records.push(decode_record(&entry.payload)?);
        }
        Ok(records)
    }

    /// Unconditional put. Duplicate-key policy is the caller's concern.
    pub fn insert(&self, key: &str, value: &JsonMap) -> Result<()> {
        let payload = serde_json::to_vec(&Value::Object(value.clone()))?;
        let offset = self.log.append_put(key, &payload)?;
        self.live.write().insert(key.to_string(), offset);
        self.cache.lock().put(key.to_string(), value.clone());
        Ok(())
    }

    /// Remove a key. Returns false if it was not live (no tombstone written).
    pub fn remove(&self, key: &str) -> Result<bool> {
        if !self.contains(key) {
            return Ok(false);
        }
        self.log.append_delete(key)?;
        self.live.write().remove(key);
        self.cache.lock().pop(key);
        Ok(true)
    }

    /// Valid size of the backing log in bytes.
    pub fn log_size(&self) -> u64 {
        self.log.size()
    }

    /// Flush the backing log to disk.
    pub fn sync(&self) -> Result<()> {
        self.log.sync()
    }
}

fn decode_record(payload: &[u8]) -> Result<JsonMap> {
    let value: Value = serde_json::from_slice(payload)
        .map_err(|e| StoreError::Deserialization(e.to_string()))?;
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(StoreError::Corruption(
            "log entry payload is not a JSON object".into(),
        )),
    }
}

fn encode_record<T: Document>(record: &T) -> Result<JsonMap> {
    match serde_json::to_value(record)? {
        Value::Object(map) => Ok(map),
        _ => Err(StoreError::Serialization(
            "record did not serialize to a JSON object".into(),
        )),
    }
}

/// Typed CRUD façade over one collection.
///
/// All mutating operations run under the store-wide write lock, so two
/// concurrent updates of the same key serialize and a reader never sees a
/// half-applied merge.
pub struct CollectionStore<'a, T: Document> {
    collection: &'a Collection,
    payloads: Option<&'a PayloadStore>,
    write_lock: &'a Mutex<()>,
    _marker: PhantomData<T>,
}

impl<'a, T: Document> CollectionStore<'a, T> {
    pub(crate) fn new(
        collection: &'a Collection,
        payloads: Option<&'a PayloadStore>,
        write_lock: &'a Mutex<()>,
    ) -> Self {
        Self {
            collection,
            payloads,
            write_lock,
            _marker: PhantomData,
        }
    }

    /// Number of live records in the collection.
    pub fn count(&self) -> usize {
        self.collection.count()
    }

    /// Insert a new record. Fails with `DuplicateKey` if the key exists.
    pub fn add(&self, mut record: T) -> Result<String> {
        let key = record.key();
        let payload = record.take_payload();
        let value = encode_record(&record)?;

        let _guard = self.write_lock.lock();

        if self.collection.contains(&key) {
            return Err(StoreError::DuplicateKey {
                collection: T::COLLECTION,
                key,
            });
        }

        if let (Some(bytes), Some(payloads)) = (payload.as_ref(), self.payloads) {
            payloads.store(&key, bytes)?;
        }
        self.collection.insert(&key, &value)?;

        Ok(key)
    }

    /// Point lookup. Absent is a valid outcome, not an error.
    pub fn get(&self, key: &str) -> Result<Option<T>> {
        match self.collection.get_value(key)? {
            Some(map) => Ok(Some(self.hydrate(map)?)),
            None => Ok(None),
        }
    }

    /// Delete a record. Deleting an absent key is a no-op.
    pub fn delete(&self, key: &str) -> Result<()> {
        let _guard = self.write_lock.lock();

        self.collection.remove(key)?;
        if let Some(payloads) = self.payloads {
            payloads.delete(key)?;
        }
        Ok(())
    }

    /// Read-modify-write merge. Shallow-merges `patch` (a JSON object) over
    /// the stored record, stamps `updatedAt`, and applies the record type's
    /// envelope rules. Fails with `NotFound` if the key does not exist.
    pub fn update(&self, key: &str, patch: Value) -> Result<T> {
        let mut patch = match patch {
            Value::Object(map) => map,
            _ => {
                return Err(StoreError::InvalidOperation(
                    "update patch must be a JSON object".into(),
                ))
            }
        };
        // The stored key is authoritative; a patch cannot re-key a record.
        patch.remove(self.collection.def().key_field);

        let _guard = self.write_lock.lock();

        let mut record = self
            .collection
            .get_value(key)?
            .ok_or_else(|| StoreError::NotFound {
                collection: T::COLLECTION,
                key: key.to_string(),
            })?;

        for (field, value) in patch.clone() {
            record.insert(field, value);
        }
        T::stamp_update(&mut record, &patch, Timestamp::now());

        self.collection.insert(key, &record)?;
        self.hydrate(record)
    }

    /// Validated overwrite for podcasts and favorites: trims and checks key
    /// fields, resolves `addedAt` (explicit value, else the stored record's,
    /// else now), stamps `updatedAt`, and replaces any existing record.
    pub fn upsert(&self, mut record: T) -> Result<T>
    where
        T: UpsertDocument,
    {
        record.validate_key()?;
        record.normalize();
        let key = record.key();

        let _guard = self.write_lock.lock();

        let now = Timestamp::now();
        let stored_added_at = self
            .collection
            .get_value(&key)?
            .and_then(|existing| existing.get("addedAt").and_then(Value::as_i64))
            .map(Timestamp);
        let added_at = record.added_at().or(stored_added_at).unwrap_or(now);
        record.stamp_upsert(added_at, now);

        let value = encode_record(&record)?;
        self.collection.insert(&key, &value)?;

        Ok(record)
    }

    /// Every record in the collection, unordered.
    pub fn list(&self) -> Result<Vec<T>> {
        let mut records = Vec::new();
        for map in self.collection.scan()? {
            records.push(self.hydrate(map)?);
        }
        Ok(records)
    }

    /// Every record, sorted by a declared secondary index, descending.
    /// Records missing the field sort lowest. Full scan plus in-memory
    /// sort; collection sizes are bounded by end-user data volume.
    pub fn list_sorted_desc(&self, field: &str) -> Result<Vec<T>> {
        if !self.collection.def().has_index(field) {
            return Err(StoreError::UnknownIndex {
                collection: T::COLLECTION,
                field: field.to_string(),
            });
        }

        let mut rows: Vec<(SortKey, JsonMap)> = self
            .collection
            .scan()?
            .into_iter()
            .map(|map| (sort_key(map.get(field)), map))
            .collect();
        rows.sort_by(|a, b| b.0.cmp(&a.0));

        let mut records = Vec::with_capacity(rows.len());
        for (_, map) in rows {
            records.push(self.hydrate(map)?);
        }
        Ok(records)
    }

    /// Decode a record and re-attach its sidecar payload if it has one.
    fn hydrate(&self, map: JsonMap) -> Result<T> {
        let payload_key = self
            .payloads
            .is_some()
            .then(|| {
                map.get(self.collection.def().key_field)
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .flatten();

        let mut record: T = serde_json::from_value(Value::Object(map))
            .map_err(|e| StoreError::Deserialization(e.to_string()))?;

        if let (Some(key), Some(payloads)) = (payload_key, self.payloads) {
            if let Some(bytes) = payloads.get(&key)? {
                record.restore_payload(bytes);
            }
        }

        Ok(record)
    }
}

/// Sort key for index queries. Missing and null values collapse to the
/// lowest numeric key; numbers order before strings when a field is mixed.
#[derive(Clone, Debug)]
enum SortKey {
    Number(f64),
    Text(String),
}

impl PartialEq for SortKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SortKey {}

impl PartialOrd for SortKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SortKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (SortKey::Number(a), SortKey::Number(b)) => a.total_cmp(b),
            (SortKey::Text(a), SortKey::Text(b)) => a.cmp(b),
            (SortKey::Number(_), SortKey::Text(_)) => Ordering::Less,
            (SortKey::Text(_), SortKey::Number(_)) => Ordering::Greater,
        }
    }
}

fn sort_key(value: Option<&Value>) -> SortKey {
    match value {
        Some(Value::Number(n)) => SortKey::Number(n.as_f64().unwrap_or(0.0)),
        Some(Value::String(s)) => SortKey::Text(s.clone()),
        Some(Value::Bool(b)) => SortKey::Number(if *b { 1.0 } else { 0.0 }),
        _ => SortKey::Number(0.0),
    }
}
