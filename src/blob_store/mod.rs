//! Object storage for canonical audio bytes.

mod local;

pub use local::LocalBlobStore;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BlobStoreError {
    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("Invalid blob key: {0}")]
    InvalidKey(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Put/get bytes by key.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `data` under `key`, replacing anything already there.
    /// Returns the key the data can be fetched with.
    async fn put(&self, key: &str, data: &[u8]) -> Result<String, BlobStoreError>;

    /// Fetch the bytes stored under `key`, `NotFound` if there are none.
    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobStoreError>;

    /// Remove `key`. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), BlobStoreError>;
}
