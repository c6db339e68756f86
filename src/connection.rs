//! Process-wide store handle.
//!
//! The store takes an exclusive file lock, so a process gets exactly one
//! open handle. `open` collapses concurrent callers onto the same `Arc`;
//! the initializing mutex is held across the actual open, so racing
//! threads wait for it rather than fighting over the file lock.

use crate::error::{Result, StoreError};
use crate::store::{Store, StoreConfig};
use parking_lot::Mutex;
use std::sync::Arc;

static CONNECTION: Mutex<Option<Arc<Store>>> = Mutex::new(None);

/// Open the process-wide store, or return the already open handle.
///
/// A failed open is not cached; the next caller retries from scratch.
pub fn open(config: StoreConfig) -> Result<Arc<Store>> {
    let mut connection = CONNECTION.lock();

    if let Some(store) = connection.as_ref() {
        return Ok(Arc::clone(store));
    }

    let store = Store::open_or_create(config)
        .map_err(|e| StoreError::Unavailable(e.to_string()))
        .map(Arc::new)?;

    *connection = Some(Arc::clone(&store));
    Ok(store)
}

/// The currently open handle, if any.
pub fn current() -> Option<Arc<Store>> {
    CONNECTION.lock().as_ref().map(Arc::clone)
}

/// Drop the process-wide handle. The store closes once the last
/// outstanding `Arc` is dropped.
pub fn close() {
    CONNECTION.lock().take();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_concurrent_opens_share_one_handle() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store");

        // Start clean; other tests in the process may have opened a store.
        close();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let config = StoreConfig {
                    path: path.clone(),
                    ..Default::default()
                };
                std::thread::spawn(move || open(config).unwrap())
            })
            .collect();

        let stores: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for store in &stores[1..] {
            assert!(Arc::ptr_eq(&stores[0], store));
        }

        assert!(current().is_some());
        drop(stores);
        close();
        assert!(current().is_none());
    }
}
