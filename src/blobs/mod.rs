//! Sidecar payload storage for blob collections (audio and subtitle bytes).

mod storage;

pub use storage::PayloadStore;
