//! In-memory blob store for testing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{stream, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::provider::{BlobMetadata, BlobStore};
use filevault_common::{BlobPath, ByteStream, Error, Result};

/// Chunk size used when replaying stored blobs as streams.
const STREAM_CHUNK_SIZE: usize = 8 * 1024;

#[derive(Debug, Clone)]
struct Entry {
    data: Vec<u8>,
    modified: DateTime<Utc>,
}

/// In-memory blob store.
///
/// Useful for testing and development. All data is stored in memory
/// and lost on drop.
#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    blobs: Arc<RwLock<HashMap<BlobPath, Entry>>>,
}

impl MemoryBlobStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs.
    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    /// Check if the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn put_stream(&self, path: &BlobPath, mut stream: ByteStream) -> Result<BlobMetadata> {
        if self.blobs.read().await.contains_key(path) {
            return Err(Error::AlreadyExists(format!("Blob already exists: {}", path)));
        }

        let mut data = Vec::new();
        let mut failure = None;
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(chunk) => data.extend_from_slice(&chunk),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        // Keep what was received so partial writes behave like a real disk.
        let entry = Entry {
            data,
            modified: Utc::now(),
        };
        let metadata = BlobMetadata {
            path: path.clone(),
            size: entry.data.len() as u64,
            modified: entry.modified,
        };

        let mut blobs = self.blobs.write().await;
        if blobs.contains_key(path) {
            return Err(Error::AlreadyExists(format!("Blob already exists: {}", path)));
        }
        blobs.insert(path.clone(), entry);

        match failure {
            Some(e) => Err(e),
            None => Ok(metadata),
        }
    }

    async fn get_stream(&self, path: &BlobPath) -> Result<ByteStream> {
        let data = self
            .blobs
            .read()
            .await
            .get(path)
            .map(|entry| entry.data.clone())
            .ok_or_else(|| Error::NotFound(format!("Blob not found: {}", path)))?;

        let chunks: Vec<Result<Vec<u8>>> = data
            .chunks(STREAM_CHUNK_SIZE)
            .map(|chunk| Ok(chunk.to_vec()))
            .collect();
        Ok(Box::pin(stream::iter(chunks)))
    }

    async fn exists(&self, path: &BlobPath) -> Result<bool> {
        Ok(self.blobs.read().await.contains_key(path))
    }

    async fn delete(&self, path: &BlobPath) -> Result<()> {
        self.blobs
            .write()
            .await
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("Blob not found: {}", path)))
    }

    async fn list(&self) -> Result<Vec<BlobMetadata>> {
        let blobs = self.blobs.read().await;
        let mut results: Vec<BlobMetadata> = blobs
            .iter()
            .map(|(path, entry)| BlobMetadata {
                path: path.clone(),
                size: entry.data.len() as u64,
                modified: entry.modified,
            })
            .collect();
        results.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_put_get() {
        let store = MemoryBlobStore::new();
        let path = BlobPath::generate();

        store.put(&path, b"ciphertext".to_vec()).await.unwrap();

        assert!(store.exists(&path).await.unwrap());
        assert_eq!(store.get(&path).await.unwrap(), b"ciphertext");
    }

    #[tokio::test]
    async fn test_memory_empty_blob_roundtrip() {
        let store = MemoryBlobStore::new();
        let path = BlobPath::generate();

        store.put(&path, Vec::new()).await.unwrap();
        assert!(store.get(&path).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_delete() {
        let store = MemoryBlobStore::new();
        let path = BlobPath::generate();

        store.put(&path, vec![1, 2, 3]).await.unwrap();
        store.delete(&path).await.unwrap();

        assert!(store.is_empty().await);
        assert!(store.delete(&path).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_memory_no_overwrite() {
        let store = MemoryBlobStore::new();
        let path = BlobPath::generate();

        store.put(&path, vec![1]).await.unwrap();
        assert!(store.put(&path, vec![2]).await.is_err());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_memory_list() {
        let store = MemoryBlobStore::new();
        store.put(&BlobPath::generate(), vec![1]).await.unwrap();
        store.put(&BlobPath::generate(), vec![2]).await.unwrap();

        assert_eq!(store.list().await.unwrap().len(), 2);
    }
}
