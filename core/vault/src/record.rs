//! File metadata records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use filevault_common::{BlobPath, FileId, OwnerId};
use filevault_crypto::Iv;

/// Metadata of one encrypted file.
///
/// Records are immutable: uploads create new records and delete removes
/// them, nothing edits them in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Assigned by the metadata store on insert.
    pub id: FileId,
    /// Principal that uploaded the file.
    pub owner_id: OwnerId,
    /// Locator of the ciphertext blob.
    pub storage_path: BlobPath,
    /// Client-declared file name, descriptive only.
    pub file_name: String,
    /// Declared MIME type of the plaintext.
    pub mime_type: String,
    /// Size of the plaintext in bytes.
    pub size_bytes: u64,
    /// IV the blob was encrypted with.
    pub iv: Iv,
    /// Cipher identifier.
    pub algorithm: String,
    /// Insert timestamp.
    pub created_at: DateTime<Utc>,
}

impl FileRecord {
    /// Build the caller-facing summary of this record.
    pub fn summary(&self) -> FileSummary {
        FileSummary {
            id: self.id,
            file_name: self.file_name.clone(),
            mime_type: self.mime_type.clone(),
            size_bytes: self.size_bytes,
            created_at: self.created_at,
        }
    }

    /// Build the locator of this record.
    pub fn locator(&self) -> RecordLocator {
        RecordLocator {
            id: self.id,
            owner_id: self.owner_id.clone(),
            storage_path: self.storage_path.clone(),
        }
    }
}

/// A record about to be inserted; id and timestamp are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewFileRecord {
    pub owner_id: OwnerId,
    pub storage_path: BlobPath,
    pub file_name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub iv: Iv,
    pub algorithm: String,
}

impl NewFileRecord {
    pub(crate) fn into_record(self, id: FileId, created_at: DateTime<Utc>) -> FileRecord {
        FileRecord {
            id,
            owner_id: self.owner_id,
            storage_path: self.storage_path,
            file_name: self.file_name,
            mime_type: self.mime_type,
            size_bytes: self.size_bytes,
            iv: self.iv,
            algorithm: self.algorithm,
            created_at,
        }
    }
}

/// Listing view of a record, safe to hand to callers.
///
/// Carries no storage path or IV.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSummary {
    pub id: FileId,
    pub file_name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

/// Where a record points, used by reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordLocator {
    pub id: FileId,
    pub owner_id: OwnerId,
    pub storage_path: BlobPath,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_hides_crypto_metadata() {
        let record = NewFileRecord {
            owner_id: OwnerId::new("u1").unwrap(),
            storage_path: BlobPath::generate(),
            file_name: "report.pdf".to_string(),
            mime_type: "application/pdf".to_string(),
            size_bytes: 42,
            iv: Iv::generate(),
            algorithm: "aes-256-cbc".to_string(),
        }
        .into_record(FileId::generate(), Utc::now());

        let json = serde_json::to_string(&record.summary()).unwrap();
        assert!(json.contains("report.pdf"));
        assert!(!json.contains(record.storage_path.as_str()));
        assert!(!json.contains(&record.iv.to_hex()));
    }
}
