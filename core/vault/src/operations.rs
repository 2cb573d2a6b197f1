//! Vault file operations with encryption/decryption.

use futures::{StreamExt, TryStreamExt};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info, warn};

use crate::config::VaultConfig;
use crate::download::Download;
use crate::error::{VaultError, VaultResult};
use crate::metadata::{MetadataStore, SqliteMetadataStore};
use crate::reconcile::Reconciler;
use crate::record::{FileRecord, FileSummary, NewFileRecord};
use filevault_common::{BlobPath, ByteStream, Error, FileId, OwnerId, Result, SensitiveBytes};
use filevault_crypto::{decrypt_stream, derive_key, encrypt_stream, Iv, VaultKey, ALGORITHM};
use filevault_storage::{BlobStore, LocalBlobStore, StagedFile, StagingArea};

/// MIME type recorded when the caller declares none.
const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Read buffer size for upload sources on disk.
const SOURCE_CHUNK_SIZE: usize = 64 * 1024;

/// Caller-declared attributes of an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    /// Declared file name, stored as metadata only.
    pub file_name: String,
    /// Declared MIME type.
    pub mime_type: String,
}

impl UploadRequest {
    /// Create a new upload request.
    pub fn new(file_name: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: mime_type.into(),
        }
    }
}

/// Encrypted file vault.
///
/// Holds the process-wide key and the stores. Every operation takes the
/// caller's verified `OwnerId`; records of other owners are never visible.
/// Cheap to share behind an `Arc`.
pub struct FileVault {
    key: Arc<VaultKey>,
    blobs: Arc<dyn BlobStore>,
    metadata: Arc<dyn MetadataStore>,
    staging: StagingArea,
}

impl FileVault {
    /// Assemble a vault from its parts.
    pub fn new(
        key: Arc<VaultKey>,
        blobs: Arc<dyn BlobStore>,
        metadata: Arc<dyn MetadataStore>,
        staging: StagingArea,
    ) -> Self {
        Self {
            key,
            blobs,
            metadata,
            staging,
        }
    }

    /// Open a vault on local storage.
    ///
    /// Derives the key once, opens the blob directory and the metadata
    /// database, and removes plaintext abandoned by a previous process.
    ///
    /// # Errors
    /// - Empty passphrase
    /// - Directory or database cannot be created
    pub async fn open(config: &VaultConfig, passphrase: &SensitiveBytes) -> Result<Self> {
        let passphrase = SensitiveBytes::new(passphrase.as_bytes().to_vec());
        let params = config.kdf_params;
        let key = tokio::task::spawn_blocking(move || derive_key(passphrase.as_bytes(), &params))
            .await
            .map_err(|e| Error::Crypto(format!("Key derivation task failed: {}", e)))??;

        let blobs = LocalBlobStore::new(&config.blob_root)?;
        let metadata = SqliteMetadataStore::open(&config.database_path).await?;
        let staging = StagingArea::new(&config.staging_dir).await?;
        staging.cleanup_orphaned().await?;

        info!(
            blob_store = blobs.name(),
            blob_root = %blobs.root().display(),
            database = %config.database_path.display(),
            "Vault opened"
        );
        Ok(Self::new(
            Arc::new(key),
            Arc::new(blobs),
            Arc::new(metadata),
            staging,
        ))
    }

    /// Get the staging area.
    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    /// Build an orphan reconciler over this vault's stores.
    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(Arc::clone(&self.blobs), Arc::clone(&self.metadata))
    }

    /// Encrypt and store a plaintext stream.
    ///
    /// # Postconditions
    /// - On success the blob is durably written before its record exists
    /// - On failure neither a record nor (best effort) a blob remains
    ///
    /// # Errors
    /// - `InvalidInput` for an empty file name
    /// - `UploadFailed` for any encryption, storage or metadata failure
    pub async fn upload(
        &self,
        owner: &OwnerId,
        content: ByteStream,
        request: UploadRequest,
    ) -> VaultResult<FileId> {
        let file_name = request.file_name.trim().to_string();
        if file_name.is_empty() {
            return Err(VaultError::InvalidInput);
        }
        let mime_type = if request.mime_type.trim().is_empty() {
            DEFAULT_MIME_TYPE.to_string()
        } else {
            request.mime_type
        };

        let iv = Iv::generate();
        let storage_path = BlobPath::generate();
        debug!(owner = %owner, storage_path = %storage_path, "Uploading file");

        let plaintext_size = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&plaintext_size);
        let content = content
            .inspect_ok(move |chunk| {
                counter.fetch_add(chunk.len() as u64, Ordering::Relaxed);
            })
            .boxed();
        let ciphertext = encrypt_stream(content, &self.key, &iv);

        // Discards the blob if this future is dropped before the record exists.
        let pending = PendingBlob::new(Arc::clone(&self.blobs), storage_path.clone());

        if let Err(e) = self.blobs.put_stream(&storage_path, ciphertext).await {
            warn!(owner = %owner, error = %e, "Encrypted write failed");
            if matches!(e, Error::AlreadyExists(_)) {
                pending.disarm();
            } else {
                pending.discard().await;
            }
            return Err(VaultError::UploadFailed);
        }

        let record = NewFileRecord {
            owner_id: owner.clone(),
            storage_path: storage_path.clone(),
            file_name,
            mime_type,
            size_bytes: plaintext_size.load(Ordering::Relaxed),
            iv,
            algorithm: ALGORITHM.to_string(),
        };

        match self.metadata.insert(record).await {
            Ok(record) => {
                pending.disarm();
                info!(
                    owner = %owner,
                    file_id = %record.id,
                    size = record.size_bytes,
                    "File uploaded"
                );
                Ok(record.id)
            }
            Err(e) => {
                warn!(
                    event = "orphan_blob",
                    owner = %owner,
                    storage_path = %storage_path,
                    error = %e,
                    "Metadata insert failed after blob write"
                );
                pending.discard().await;
                Err(VaultError::UploadFailed)
            }
        }
    }

    /// Encrypt and store a plaintext file from disk, then remove the file.
    ///
    /// The source is removed whether or not the upload succeeds.
    pub async fn upload_file(
        &self,
        owner: &OwnerId,
        source: &Path,
        request: UploadRequest,
    ) -> VaultResult<FileId> {
        let result = match tokio::fs::File::open(source).await {
            Ok(file) => {
                let content = ReaderStream::with_capacity(file, SOURCE_CHUNK_SIZE)
                    .map_ok(|chunk| chunk.to_vec())
                    .map_err(Error::Io)
                    .boxed();
                self.upload(owner, content, request).await
            }
            Err(e) => {
                warn!(owner = %owner, error = %e, "Failed to open upload source");
                Err(VaultError::UploadFailed)
            }
        };

        match tokio::fs::remove_file(source).await {
            Ok(()) => debug!(path = %source.display(), "Upload source removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                path = %source.display(),
                error = %e,
                "Failed to remove upload source"
            ),
        }

        result
    }

    /// List the owner's files, newest first.
    ///
    /// # Errors
    /// - `MetadataUnavailable` if the metadata store fails
    pub async fn list(&self, owner: &OwnerId) -> VaultResult<Vec<FileSummary>> {
        let records = self.metadata.list(owner).await.map_err(|e| {
            error!(owner = %owner, error = %e, "Failed to list records");
            VaultError::MetadataUnavailable
        })?;

        Ok(records.iter().map(FileRecord::summary).collect())
    }

    /// Decrypt a file into the staging area and stream it back.
    ///
    /// # Postconditions
    /// - No plaintext is left in the staging area once the returned
    ///   `Download` finishes or is dropped, or when this call fails
    ///
    /// # Errors
    /// - `NotFound` if no such record is owned by `owner`
    /// - `DecryptionFailed` if the blob is missing or cannot be decrypted
    pub async fn download(&self, owner: &OwnerId, id: &FileId) -> VaultResult<Download> {
        let record = self.lookup(owner, id).await?;

        if record.algorithm != ALGORITHM {
            warn!(file_id = %id, algorithm = %record.algorithm, "Unsupported algorithm");
            return Err(VaultError::DecryptionFailed);
        }

        let staged = self.staging.acquire().await.map_err(|e| {
            error!(file_id = %id, error = %e, "Failed to allocate staged file");
            VaultError::DecryptionFailed
        })?;

        if let Err(e) = self.decrypt_into(&record, &staged).await {
            if e.is_not_found() {
                warn!(
                    event = "orphan_record",
                    owner = %owner,
                    file_id = %id,
                    "Blob missing for record"
                );
            } else {
                warn!(file_id = %id, error = %e, "Decryption failed");
            }
            return Err(VaultError::DecryptionFailed);
        }

        let reader = staged.open_reader().await.map_err(|e| {
            error!(file_id = %id, error = %e, "Failed to reopen staged file");
            VaultError::DecryptionFailed
        })?;

        debug!(owner = %owner, file_id = %id, "Download ready");
        Ok(Download::new(record.summary(), staged, reader))
    }

    /// Delete a file: blob first, then its record.
    ///
    /// # Errors
    /// - `NotFound` if no such record is owned by `owner`
    /// - `DiskDeleteFailed` if the blob cannot be removed, including when it is
    ///   already missing; the record is kept for the reconciler to report
    /// - `MetadataUnavailable` if the record cannot be removed after the blob was
    pub async fn delete(&self, owner: &OwnerId, id: &FileId) -> VaultResult<()> {
        let record = self.lookup(owner, id).await?;

        if let Err(e) = self.blobs.delete(&record.storage_path).await {
            if e.is_not_found() {
                warn!(
                    event = "orphan_record",
                    owner = %owner,
                    file_id = %id,
                    "Blob missing, record kept"
                );
            } else {
                error!(owner = %owner, file_id = %id, error = %e, "Blob delete failed");
            }
            return Err(VaultError::DiskDeleteFailed);
        }

        match self.metadata.delete(owner, id).await {
            Ok(true) => {}
            Ok(false) => debug!(file_id = %id, "Record already removed"),
            Err(e) => {
                warn!(
                    event = "orphan_record",
                    owner = %owner,
                    file_id = %id,
                    error = %e,
                    "Record delete failed after blob removal"
                );
                return Err(VaultError::MetadataUnavailable);
            }
        }

        info!(owner = %owner, file_id = %id, "File deleted");
        Ok(())
    }

    /// Fetch a record owned by `owner`.
    async fn lookup(&self, owner: &OwnerId, id: &FileId) -> VaultResult<FileRecord> {
        match self.metadata.get(owner, id).await {
            Ok(Some(record)) => Ok(record),
            Ok(None) => Err(VaultError::NotFound),
            Err(e) => {
                error!(owner = %owner, file_id = %id, error = %e, "Record lookup failed");
                Err(VaultError::MetadataUnavailable)
            }
        }
    }

    /// Stream-decrypt a record's blob into a staged file.
    async fn decrypt_into(&self, record: &FileRecord, staged: &StagedFile) -> Result<()> {
        let ciphertext = self.blobs.get_stream(&record.storage_path).await?;
        let mut plaintext = decrypt_stream(ciphertext, &self.key, &record.iv);

        let mut writer = staged.open_writer().await?;
        while let Some(chunk) = plaintext.try_next().await? {
            writer.write_all(&chunk).await?;
        }
        writer.flush().await?;
        Ok(())
    }
}

/// Remove a blob left by a failed upload.
async fn discard_blob(blobs: &dyn BlobStore, path: &BlobPath) {
    match blobs.delete(path).await {
        Ok(()) => debug!(store = blobs.name(), storage_path = %path, "Discarded blob of failed upload"),
        Err(e) if e.is_not_found() => {}
        Err(e) => warn!(
            event = "orphan_blob",
            store = blobs.name(),
            storage_path = %path,
            error = %e,
            "Failed to discard blob of failed upload"
        ),
    }
}

/// Blob written by an upload that has no record yet.
///
/// Dropped while armed, it deletes the blob on a background task.
struct PendingBlob {
    blobs: Arc<dyn BlobStore>,
    path: BlobPath,
    armed: bool,
}

impl PendingBlob {
    fn new(blobs: Arc<dyn BlobStore>, path: BlobPath) -> Self {
        Self {
            blobs,
            path,
            armed: true,
        }
    }

    /// Keep the blob.
    fn disarm(mut self) {
        self.armed = false;
    }

    /// Delete the blob now.
    async fn discard(mut self) {
        self.armed = false;
        discard_blob(self.blobs.as_ref(), &self.path).await;
    }
}

impl Drop for PendingBlob {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!(
            event = "orphan_blob",
            storage_path = %self.path,
            "Upload abandoned, discarding blob"
        );

        let blobs = Arc::clone(&self.blobs);
        let path = self.path.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    discard_blob(blobs.as_ref(), &path).await;
                });
            }
            Err(_) => warn!(
                event = "orphan_blob",
                storage_path = %self.path,
                "No runtime to discard abandoned blob"
            ),
        }
    }
}
