//! Blob store trait definition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{stream, TryStreamExt};
use serde::{Deserialize, Serialize};

use filevault_common::{BlobPath, ByteStream, Result};

/// Metadata for a stored blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobMetadata {
    /// Locator of the blob.
    pub path: BlobPath,
    /// Size of the stored ciphertext in bytes.
    pub size: u64,
    /// Last modification time.
    pub modified: DateTime<Utc>,
}

/// Content storage for encrypted blobs.
///
/// Blobs are addressed by opaque, flat `BlobPath`s. Implementations must
/// never overwrite an existing blob and must report missing blobs as
/// `Error::NotFound`.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Get the store name (e.g., "local", "memory").
    fn name(&self) -> &str;

    /// Write a new blob from a stream.
    ///
    /// # Preconditions
    /// - No blob exists at `path`
    ///
    /// # Postconditions
    /// - On success the complete stream content is durably stored
    /// - On failure a partial blob may remain; the caller removes it
    ///
    /// # Errors
    /// - Blob already exists
    /// - Stream item error
    /// - I/O errors
    async fn put_stream(&self, path: &BlobPath, stream: ByteStream) -> Result<BlobMetadata>;

    /// Write a new blob from a complete buffer.
    async fn put(&self, path: &BlobPath, data: Vec<u8>) -> Result<BlobMetadata> {
        self.put_stream(path, Box::pin(stream::once(async move { Ok(data) })))
            .await
    }

    /// Read a blob as a stream.
    ///
    /// # Errors
    /// - Blob not found
    /// - I/O errors (also possible as stream items)
    async fn get_stream(&self, path: &BlobPath) -> Result<ByteStream>;

    /// Read a complete blob into memory.
    async fn get(&self, path: &BlobPath) -> Result<Vec<u8>> {
        let chunks: Vec<Vec<u8>> = self.get_stream(path).await?.try_collect().await?;
        Ok(chunks.concat())
    }

    /// Check if a blob exists.
    async fn exists(&self, path: &BlobPath) -> Result<bool>;

    /// Delete a blob.
    ///
    /// # Errors
    /// - Blob not found
    /// - I/O errors
    async fn delete(&self, path: &BlobPath) -> Result<()>;

    /// List all stored blobs.
    async fn list(&self) -> Result<Vec<BlobMetadata>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_serialization() {
        let metadata = BlobMetadata {
            path: BlobPath::generate(),
            size: 1024,
            modified: Utc::now(),
        };

        let json = serde_json::to_string(&metadata).unwrap();
        let deserialized: BlobMetadata = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized, metadata);
    }
}
