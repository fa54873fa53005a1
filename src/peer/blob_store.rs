//! Content addressed blob storage.

use std::collections::HashMap;

use bytes::Bytes;
use parking_lot::RwLock;

use super::request::blob_hash;

#[derive(thiserror::Error, Debug)]
pub enum BlobStoreError {
    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("Blob hash mismatch, expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error(transparent)]
    /// Transparent [std::io::Error]
    IO(#[from] std::io::Error),
}

/// Blobs by the lowercase hex of their SHA-384 hash.
pub trait BlobStore: Send + Sync {
    fn has(&self, hash: &str) -> Result<bool, BlobStoreError>;

    fn get(&self, hash: &str) -> Result<Bytes, BlobStoreError>;

    /// Store a blob, failing if `hash` isn't the hash of `blob`.
    fn put(&self, hash: &str, blob: Bytes) -> Result<(), BlobStoreError>;
}

/// In memory [BlobStore].
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, Bytes>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a blob under its own hash, and return that hash.
    pub fn insert(&self, blob: Bytes) -> String {
        let hash = blob_hash(&blob);

        self.blobs.write().insert(hash.clone(), blob);

        hash
    }

    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }
}

impl BlobStore for MemoryBlobStore {
    fn has(&self, hash: &str) -> Result<bool, BlobStoreError> {
        Ok(self.blobs.read().contains_key(hash))
    }

    fn get(&self, hash: &str) -> Result<Bytes, BlobStoreError> {
        self.blobs
            .read()
            .get(hash)
            .cloned()
            .ok_or_else(|| BlobStoreError::NotFound(hash.to_string()))
    }

    fn put(&self, hash: &str, blob: Bytes) -> Result<(), BlobStoreError> {
        let actual = blob_hash(&blob);

        if actual != hash {
            return Err(BlobStoreError::HashMismatch {
                expected: hash.to_string(),
                actual,
            });
        }

        self.blobs.write().insert(actual, blob);

        Ok(())
    }
}
