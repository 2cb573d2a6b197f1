//! In-memory metadata store for testing.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{sort_newest_first, MetadataStore};
use crate::record::{FileRecord, NewFileRecord, RecordLocator};
use filevault_common::{Error, FileId, OwnerId, Result};

/// In-memory metadata store.
///
/// All records are lost on drop.
#[derive(Clone, Default)]
pub struct MemoryMetadataStore {
    records: Arc<RwLock<HashMap<FileId, FileRecord>>>,
}

impl MemoryMetadataStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of records across owners.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Check if the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn insert(&self, record: NewFileRecord) -> Result<FileRecord> {
        let mut records = self.records.write().await;

        if records
            .values()
            .any(|existing| existing.storage_path == record.storage_path)
        {
            return Err(Error::AlreadyExists(format!(
                "Storage path already referenced: {}",
                record.storage_path
            )));
        }

        let record = record.into_record(FileId::generate(), Utc::now());
        records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get(&self, owner: &OwnerId, id: &FileId) -> Result<Option<FileRecord>> {
        Ok(self
            .records
            .read()
            .await
            .get(id)
            .filter(|record| &record.owner_id == owner)
            .cloned())
    }

    async fn list(&self, owner: &OwnerId) -> Result<Vec<FileRecord>> {
        let mut records: Vec<FileRecord> = self
            .records
            .read()
            .await
            .values()
            .filter(|record| &record.owner_id == owner)
            .cloned()
            .collect();
        sort_newest_first(&mut records);
        Ok(records)
    }

    async fn delete(&self, owner: &OwnerId, id: &FileId) -> Result<bool> {
        let mut records = self.records.write().await;
        match records.get(id) {
            Some(record) if &record.owner_id == owner => {
                records.remove(id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn locators(&self) -> Result<Vec<RecordLocator>> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .map(FileRecord::locator)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filevault_common::BlobPath;
    use filevault_crypto::Iv;

    fn new_record(owner: &str) -> NewFileRecord {
        NewFileRecord {
            owner_id: OwnerId::new(owner).unwrap(),
            storage_path: BlobPath::generate(),
            file_name: "notes.txt".to_string(),
            mime_type: "text/plain".to_string(),
            size_bytes: 5,
            iv: Iv::generate(),
            algorithm: "aes-256-cbc".to_string(),
        }
    }

    #[tokio::test]
    async fn test_insert_and_get_scoped() {
        let store = MemoryMetadataStore::new();
        let u1 = OwnerId::new("u1").unwrap();
        let u2 = OwnerId::new("u2").unwrap();

        let record = store.insert(new_record("u1")).await.unwrap();

        assert_eq!(store.get(&u1, &record.id).await.unwrap(), Some(record.clone()));
        assert_eq!(store.get(&u2, &record.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_scoped() {
        let store = MemoryMetadataStore::new();
        let u1 = OwnerId::new("u1").unwrap();
        let u2 = OwnerId::new("u2").unwrap();
        let record = store.insert(new_record("u1")).await.unwrap();

        assert!(!store.delete(&u2, &record.id).await.unwrap());
        assert_eq!(store.len().await, 1);

        assert!(store.delete(&u1, &record.id).await.unwrap());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_list_newest_first() {
        let store = MemoryMetadataStore::new();
        let u1 = OwnerId::new("u1").unwrap();

        let first = store.insert(new_record("u1")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = store.insert(new_record("u1")).await.unwrap();
        store.insert(new_record("u2")).await.unwrap();

        let listed = store.list(&u1).await.unwrap();
        let ids: Vec<FileId> = listed.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }

    #[tokio::test]
    async fn test_duplicate_storage_path_rejected() {
        let store = MemoryMetadataStore::new();
        let record = new_record("u1");
        let duplicate = record.clone();

        store.insert(record).await.unwrap();
        assert!(store.insert(duplicate).await.is_err());
    }
}
