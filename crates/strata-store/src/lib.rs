//! # strata-store
//!
//! The node-local key-value store: a flat string map safe for concurrent
//! access, with full-state serialization for gossip transfer.
//!
//! The store is ephemeral by design; durability across the cluster comes
//! from replication and anti-entropy, not from disk.

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

/// Error types for store serialization.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Full-state encoding failed.
    #[error("store encode failed: {0}")]
    Encode(String),

    /// Full-state decoding failed.
    #[error("store decode failed: {0}")]
    Decode(String),
}

/// Convenience result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Concurrent in-memory map from key to value.
#[derive(Debug, Default)]
pub struct Store {
    entries: RwLock<HashMap<String, String>>,
}

impl Store {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a key.
    pub fn get(&self, key: &str) -> Option<String> {
        self.read().get(key).cloned()
    }

    /// Insert or overwrite a key.
    pub fn put(&self, key: impl Into<String>, value: impl Into<String>) {
        self.write().insert(key.into(), value.into());
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// A sorted copy of the full contents, for diagnostics and gossip.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Serialize the full contents to CBOR for a gossip transfer.
    ///
    /// The snapshot is sorted, so two stores with equal contents encode to
    /// equal bytes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Encode`] if encoding fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let snapshot = self.snapshot();
        let mut buf = Vec::new();
        ciborium::into_writer(&snapshot, &mut buf)
            .map_err(|e| StoreError::Encode(e.to_string()))?;
        Ok(buf)
    }

    /// Merge a peer's contents into this store; the peer wins on every
    /// overlapping key.
    pub fn merge(&self, remote: BTreeMap<String, String>) {
        let mut entries = self.write();
        for (key, value) in remote {
            entries.insert(key, value);
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, String>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, String>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Decode a gossip payload back into a map.
///
/// # Errors
///
/// Returns [`StoreError::Decode`] if the bytes are not a valid full-state
/// dump.
pub fn map_from_bytes(data: &[u8]) -> Result<BTreeMap<String, String>> {
    ciborium::from_reader(data).map_err(|e| StoreError::Decode(e.to_string()))
}
