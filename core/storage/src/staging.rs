//! Self-cleaning staging area for transient plaintext.
//!
//! Every download decrypts into its own staged file. The file is owned by a
//! [`StagedFile`] guard and removed when the guard is dropped, so plaintext
//! never outlives the operation that produced it, whether that operation
//! completes, fails or is cancelled.

use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use filevault_common::{Error, Result};

/// Prefix of staged file names.
const STAGED_PREFIX: &str = "dec_";

/// Staging directory for transient plaintext.
#[derive(Debug, Clone)]
pub struct StagingArea {
    dir: PathBuf,
}

impl StagingArea {
    /// Create a staging area rooted at `dir`.
    ///
    /// # Postconditions
    /// - The directory exists
    pub async fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await.map_err(Error::Io)?;
        Ok(Self { dir })
    }

    /// Get the staging directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Allocate a fresh, empty staged file.
    ///
    /// The file is created exclusively and, on Unix, readable only by the
    /// current user.
    pub async fn acquire(&self) -> Result<StagedFile> {
        let path = self
            .dir
            .join(format!("{}{}", STAGED_PREFIX, Uuid::new_v4().simple()));

        let mut options = fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(0o600);
        options.open(&path).await.map_err(Error::Io)?;

        debug!(path = %path.display(), "Staged file acquired");
        Ok(StagedFile { path })
    }

    /// Count files currently resident in the staging directory.
    pub async fn resident_count(&self) -> Result<usize> {
        let mut count = 0;
        let mut entries = fs::read_dir(&self.dir).await.map_err(Error::Io)?;
        while let Some(entry) = entries.next_entry().await.map_err(Error::Io)? {
            if entry.file_type().await.map_err(Error::Io)?.is_file() {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Remove staged files left behind by a previous process.
    ///
    /// Only call this before any download is in flight: every staged file in
    /// the directory is treated as abandoned.
    pub async fn cleanup_orphaned(&self) -> Result<usize> {
        let mut cleaned = 0;
        let mut entries = fs::read_dir(&self.dir).await.map_err(Error::Io)?;

        while let Some(entry) = entries.next_entry().await.map_err(Error::Io)? {
            let path = entry.path();
            let is_staged = entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(STAGED_PREFIX));
            if is_staged && entry.file_type().await.map_err(Error::Io)?.is_file() {
                fs::remove_file(&path).await.map_err(Error::Io)?;
                cleaned += 1;
            }
        }

        if cleaned > 0 {
            warn!(count = cleaned, "Removed abandoned staged plaintext");
        }
        Ok(cleaned)
    }
}

/// A staged plaintext file, removed when dropped.
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
}

impl StagedFile {
    /// Path of the staged file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open the staged file for writing from the start.
    pub async fn open_writer(&self) -> Result<fs::File> {
        fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.path)
            .await
            .map_err(Error::Io)
    }

    /// Open the staged file for reading.
    pub async fn open_reader(&self) -> Result<fs::File> {
        fs::File::open(&self.path).await.map_err(Error::Io)
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Staged file removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to remove staged plaintext"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_staging_area_creation() {
        let temp = TempDir::new().unwrap();
        let staging = StagingArea::new(temp.path().join("staging")).await.unwrap();
        assert!(staging.dir().is_dir());
        assert_eq!(staging.resident_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_staged_file_removed_on_drop() {
        let temp = TempDir::new().unwrap();
        let staging = StagingArea::new(temp.path()).await.unwrap();

        let staged = staging.acquire().await.unwrap();
        let mut writer = staged.open_writer().await.unwrap();
        writer.write_all(b"plaintext").await.unwrap();
        writer.flush().await.unwrap();
        drop(writer);

        assert_eq!(staging.resident_count().await.unwrap(), 1);
        let path = staged.path().to_path_buf();

        drop(staged);
        assert!(!path.exists());
        assert_eq!(staging.resident_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_staged_files_are_distinct() {
        let temp = TempDir::new().unwrap();
        let staging = StagingArea::new(temp.path()).await.unwrap();

        let a = staging.acquire().await.unwrap();
        let b = staging.acquire().await.unwrap();

        assert_ne!(a.path(), b.path());
        assert_eq!(staging.resident_count().await.unwrap(), 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_staged_file_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let staging = StagingArea::new(temp.path()).await.unwrap();
        let staged = staging.acquire().await.unwrap();

        let mode = std::fs::metadata(staged.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_cleanup_orphaned() {
        let temp = TempDir::new().unwrap();
        let staging = StagingArea::new(temp.path()).await.unwrap();

        std::fs::write(temp.path().join("dec_leftover"), b"plaintext").unwrap();
        std::fs::write(temp.path().join("unrelated.txt"), b"keep").unwrap();

        let cleaned = staging.cleanup_orphaned().await.unwrap();
        assert_eq!(cleaned, 1);
        assert!(temp.path().join("unrelated.txt").exists());
    }
}
