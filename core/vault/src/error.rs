//! Caller-facing error taxonomy of the vault.
//!
//! Every variant carries a fixed message. Internal detail such as paths,
//! keys or underlying I/O errors is logged where the failure happens and
//! never included here.

use thiserror::Error;

/// Error returned by vault operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VaultError {
    /// The record does not exist or is not owned by the caller.
    #[error("File not found")]
    NotFound,

    /// Encryption or blob write failed; nothing was stored.
    #[error("Upload failed")]
    UploadFailed,

    /// The blob could not be read or decrypted.
    #[error("Decryption failed")]
    DecryptionFailed,

    /// The blob could not be removed; the record was kept.
    #[error("Failed to delete file from disk")]
    DiskDeleteFailed,

    /// The metadata store could not be queried or updated.
    #[error("Metadata store unavailable")]
    MetadataUnavailable,

    /// The request was rejected before any I/O.
    #[error("Invalid request")]
    InvalidInput,
}

impl VaultError {
    /// Stable machine-readable kind.
    pub fn kind(&self) -> &'static str {
        match self {
            VaultError::NotFound => "not_found",
            VaultError::UploadFailed => "upload_failed",
            VaultError::DecryptionFailed => "decryption_failed",
            VaultError::DiskDeleteFailed => "disk_delete_failed",
            VaultError::MetadataUnavailable => "metadata_unavailable",
            VaultError::InvalidInput => "invalid_input",
        }
    }
}

/// Result type alias for vault operations.
pub type VaultResult<T> = std::result::Result<T, VaultError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_are_distinct() {
        let all = [
            VaultError::NotFound,
            VaultError::UploadFailed,
            VaultError::DecryptionFailed,
            VaultError::DiskDeleteFailed,
            VaultError::MetadataUnavailable,
            VaultError::InvalidInput,
        ];
        let kinds: std::collections::HashSet<_> = all.iter().map(|e| e.kind()).collect();
        assert_eq!(kinds.len(), all.len());
    }

    #[test]
    fn test_messages_are_fixed() {
        assert_eq!(VaultError::NotFound.to_string(), "File not found");
        assert_eq!(
            VaultError::DiskDeleteFailed.to_string(),
            "Failed to delete file from disk"
        );
    }
}
