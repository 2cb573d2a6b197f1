//! Ownership-scoped metadata store.
//!
//! Every lookup that a caller can trigger is scoped by owner: a record owned
//! by someone else is indistinguishable from one that does not exist.

use async_trait::async_trait;

use crate::record::{FileRecord, NewFileRecord, RecordLocator};
use filevault_common::{FileId, OwnerId, Result};

pub mod memory;
pub mod sqlite;

pub use memory::MemoryMetadataStore;
pub use sqlite::SqliteMetadataStore;

/// Durable table of file records.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert a record, assigning its id and creation time.
    ///
    /// # Errors
    /// - Storage path already referenced by another record
    /// - Backend failure
    async fn insert(&self, record: NewFileRecord) -> Result<FileRecord>;

    /// Get a record by id, only if owned by `owner`.
    async fn get(&self, owner: &OwnerId, id: &FileId) -> Result<Option<FileRecord>>;

    /// List an owner's records, newest first.
    async fn list(&self, owner: &OwnerId) -> Result<Vec<FileRecord>>;

    /// Delete a record by id, only if owned by `owner`.
    ///
    /// Returns whether a record was removed.
    async fn delete(&self, owner: &OwnerId, id: &FileId) -> Result<bool>;

    /// Locators of all records, across owners.
    ///
    /// Only for reconciliation; never exposed to callers.
    async fn locators(&self) -> Result<Vec<RecordLocator>>;
}

/// Order records newest first, breaking timestamp ties by id.
pub(crate) fn sort_newest_first(records: &mut [FileRecord]) {
    records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
}
