//! Local filesystem blob store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::provider::{BlobMetadata, BlobStore};
use filevault_common::{BlobPath, ByteStream, Error, Result};

/// Read buffer size for blob streams (64 KiB).
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Local filesystem blob store.
///
/// Stores each blob as one flat file under the root directory.
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    /// Create a new local store with the given root directory.
    ///
    /// # Postconditions
    /// - Root directory is created if it doesn't exist
    ///
    /// # Errors
    /// - Permission denied
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        // Create root if it doesn't exist (sync for constructor)
        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }

        Ok(Self { root })
    }

    /// Get the root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Convert a BlobPath to a filesystem path.
    fn to_fs_path(&self, path: &BlobPath) -> PathBuf {
        self.root.join(path.as_str())
    }

    fn create_metadata(path: &BlobPath, fs_meta: &std::fs::Metadata) -> BlobMetadata {
        let modified: DateTime<Utc> = fs_meta
            .modified()
            .map(|t| t.into())
            .unwrap_or_else(|_| Utc::now());

        BlobMetadata {
            path: path.clone(),
            size: fs_meta.len(),
            modified,
        }
    }
}

fn map_not_found(e: std::io::Error, path: &BlobPath) -> Error {
    if e.kind() == std::io::ErrorKind::NotFound {
        Error::NotFound(format!("Blob not found: {}", path))
    } else {
        Error::Io(e)
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn put_stream(&self, path: &BlobPath, mut stream: ByteStream) -> Result<BlobMetadata> {
        let fs_path = self.to_fs_path(path);

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&fs_path)
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    Error::AlreadyExists(format!("Blob already exists: {}", path))
                } else {
                    Error::Io(e)
                }
            })?;

        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;
        file.sync_all().await?;

        let fs_meta = file.metadata().await?;
        debug!(blob = %path, size = fs_meta.len(), "Blob written");
        Ok(Self::create_metadata(path, &fs_meta))
    }

    async fn get_stream(&self, path: &BlobPath) -> Result<ByteStream> {
        let fs_path = self.to_fs_path(path);

        let file = fs::File::open(&fs_path)
            .await
            .map_err(|e| map_not_found(e, path))?;

        let stream = ReaderStream::with_capacity(file, READ_CHUNK_SIZE)
            .map_ok(|bytes| bytes.to_vec())
            .map_err(Error::Io);
        Ok(Box::pin(stream))
    }

    async fn exists(&self, path: &BlobPath) -> Result<bool> {
        Ok(fs::try_exists(self.to_fs_path(path)).await?)
    }

    async fn delete(&self, path: &BlobPath) -> Result<()> {
        let fs_path = self.to_fs_path(path);

        fs::remove_file(&fs_path)
            .await
            .map_err(|e| map_not_found(e, path))?;

        debug!(blob = %path, "Blob deleted");
        Ok(())
    }

    async fn list(&self) -> Result<Vec<BlobMetadata>> {
        let mut results = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            let fs_meta = entry.metadata().await?;
            if !fs_meta.is_file() {
                continue;
            }

            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let Ok(blob_path) = BlobPath::parse(name) else {
                continue;
            };

            results.push(Self::create_metadata(&blob_path, &fs_meta));
        }

        results.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use tempfile::TempDir;

    #[test]
    fn test_local_creates_root() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("nested").join("blobs");
        let store = LocalBlobStore::new(&root).unwrap();

        assert!(root.is_dir());
        assert_eq!(store.root(), root.as_path());
        assert_eq!(store.name(), "local");
    }

    #[tokio::test]
    async fn test_local_put_get() {
        let temp = TempDir::new().unwrap();
        let store = LocalBlobStore::new(temp.path()).unwrap();
        let path = BlobPath::generate();
        let data = b"Hello, Local!".to_vec();

        let meta = store.put(&path, data.clone()).await.unwrap();
        assert_eq!(meta.size, data.len() as u64);

        let downloaded = store.get(&path).await.unwrap();
        assert_eq!(downloaded, data);
    }

    #[tokio::test]
    async fn test_local_large_blob_streams_in_chunks() {
        let temp = TempDir::new().unwrap();
        let store = LocalBlobStore::new(temp.path()).unwrap();
        let path = BlobPath::generate();
        let data = vec![0x5Au8; READ_CHUNK_SIZE * 3 + 17];

        store.put(&path, data.clone()).await.unwrap();

        let chunks: Vec<Vec<u8>> = store
            .get_stream(&path)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert!(chunks.len() > 1);
        assert_eq!(chunks.concat(), data);
    }

    #[tokio::test]
    async fn test_local_put_does_not_overwrite() {
        let temp = TempDir::new().unwrap();
        let store = LocalBlobStore::new(temp.path()).unwrap();
        let path = BlobPath::generate();

        store.put(&path, vec![1]).await.unwrap();
        let result = store.put(&path, vec![2]).await;

        assert!(matches!(result, Err(Error::AlreadyExists(_))));
        assert_eq!(store.get(&path).await.unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn test_local_put_stream_error_leaves_partial() {
        let temp = TempDir::new().unwrap();
        let store = LocalBlobStore::new(temp.path()).unwrap();
        let path = BlobPath::generate();
        let input: ByteStream = Box::pin(stream::iter(vec![
            Ok(vec![1u8; 10]),
            Err(Error::Crypto("boom".to_string())),
        ]));

        assert!(store.put_stream(&path, input).await.is_err());
        assert!(store.exists(&path).await.unwrap());

        store.delete(&path).await.unwrap();
        assert!(!store.exists(&path).await.unwrap());
    }

    #[tokio::test]
    async fn test_local_missing_blob_is_not_found() {
        let temp = TempDir::new().unwrap();
        let store = LocalBlobStore::new(temp.path()).unwrap();
        let path = BlobPath::generate();

        assert!(store.get_stream(&path).await.err().unwrap().is_not_found());
        assert!(store.delete(&path).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_local_list() {
        let temp = TempDir::new().unwrap();
        let store = LocalBlobStore::new(temp.path()).unwrap();

        store.put(&BlobPath::generate(), vec![1]).await.unwrap();
        store.put(&BlobPath::generate(), vec![2, 2]).await.unwrap();
        std::fs::create_dir(temp.path().join("subdir")).unwrap();

        let contents = store.list().await.unwrap();
        assert_eq!(contents.len(), 2);
    }
}
