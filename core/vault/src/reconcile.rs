//! Operator-driven orphan reconciliation.
//!
//! Compares the blob store with the metadata store. An orphan blob has no
//! record pointing at it; an orphan record points at a missing blob. Nothing
//! here runs on its own: scans and pruning happen only when invoked.

use chrono::{Duration, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use crate::metadata::MetadataStore;
use crate::record::RecordLocator;
use filevault_common::{BlobPath, Result};
use filevault_storage::{BlobMetadata, BlobStore};

/// Outcome of a reconciliation scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Blobs no record refers to.
    pub orphan_blobs: Vec<BlobMetadata>,
    /// Records whose blob is missing.
    pub orphan_records: Vec<RecordLocator>,
}

impl ReconcileReport {
    /// Whether both stores agree.
    pub fn is_clean(&self) -> bool {
        self.orphan_blobs.is_empty() && self.orphan_records.is_empty()
    }
}

/// Orphan scanner over a blob store and a metadata store.
pub struct Reconciler {
    blobs: Arc<dyn BlobStore>,
    metadata: Arc<dyn MetadataStore>,
}

impl Reconciler {
    /// Create a reconciler.
    pub fn new(blobs: Arc<dyn BlobStore>, metadata: Arc<dyn MetadataStore>) -> Self {
        Self { blobs, metadata }
    }

    /// Find orphan blobs and orphan records.
    ///
    /// Blobs of uploads still in flight show up as orphans; use a grace
    /// period when pruning.
    pub async fn scan(&self) -> Result<ReconcileReport> {
        let blobs = self.blobs.list().await?;
        let records = self.metadata.locators().await?;

        let referenced: HashSet<&BlobPath> = records.iter().map(|r| &r.storage_path).collect();
        let stored: HashSet<&BlobPath> = blobs.iter().map(|b| &b.path).collect();

        let orphan_records: Vec<RecordLocator> = records
            .iter()
            .filter(|r| !stored.contains(&r.storage_path))
            .cloned()
            .collect();
        let orphan_blobs: Vec<BlobMetadata> = blobs
            .iter()
            .filter(|b| !referenced.contains(&b.path))
            .cloned()
            .collect();

        for blob in &orphan_blobs {
            warn!(
                event = "orphan_blob",
                storage_path = %blob.path,
                size = blob.size,
                "Unreferenced blob"
            );
        }
        for record in &orphan_records {
            warn!(
                event = "orphan_record",
                owner = %record.owner_id,
                file_id = %record.id,
                "Record without blob"
            );
        }

        info!(
            blobs = blobs.len(),
            records = records.len(),
            orphan_blobs = orphan_blobs.len(),
            orphan_records = orphan_records.len(),
            "Reconciliation scan complete"
        );
        Ok(ReconcileReport {
            orphan_blobs,
            orphan_records,
        })
    }

    /// Delete orphan blobs from `report` last modified more than `grace` ago.
    ///
    /// Each candidate is checked against the metadata store again right
    /// before deletion. Returns the number of blobs removed.
    pub async fn prune_orphan_blobs(
        &self,
        report: &ReconcileReport,
        grace: Duration,
    ) -> Result<usize> {
        let cutoff = Utc::now() - grace;
        let referenced: HashSet<BlobPath> = self
            .metadata
            .locators()
            .await?
            .into_iter()
            .map(|r| r.storage_path)
            .collect();

        let mut pruned = 0;
        for blob in &report.orphan_blobs {
            if blob.modified > cutoff || referenced.contains(&blob.path) {
                continue;
            }
            match self.blobs.delete(&blob.path).await {
                Ok(()) => {
                    info!(storage_path = %blob.path, "Pruned orphan blob");
                    pruned += 1;
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }

        Ok(pruned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MemoryMetadataStore;
    use crate::record::NewFileRecord;
    use filevault_common::OwnerId;
    use filevault_crypto::Iv;
    use filevault_storage::MemoryBlobStore;

    fn record_for(path: &BlobPath) -> NewFileRecord {
        NewFileRecord {
            owner_id: OwnerId::new("u1").unwrap(),
            storage_path: path.clone(),
            file_name: "f".to_string(),
            mime_type: "text/plain".to_string(),
            size_bytes: 1,
            iv: Iv::generate(),
            algorithm: "aes-256-cbc".to_string(),
        }
    }

    async fn setup() -> (MemoryBlobStore, MemoryMetadataStore, BlobPath, BlobPath) {
        let blobs = MemoryBlobStore::new();
        let metadata = MemoryMetadataStore::new();

        let healthy = BlobPath::generate();
        blobs.put(&healthy, vec![0u8; 16]).await.unwrap();
        metadata.insert(record_for(&healthy)).await.unwrap();

        let orphan = BlobPath::generate();
        blobs.put(&orphan, vec![0u8; 16]).await.unwrap();

        let missing = BlobPath::generate();
        metadata.insert(record_for(&missing)).await.unwrap();

        (blobs, metadata, orphan, missing)
    }

    #[tokio::test]
    async fn test_scan_finds_orphans() {
        let (blobs, metadata, orphan, missing) = setup().await;
        let reconciler = Reconciler::new(Arc::new(blobs), Arc::new(metadata));

        let report = reconciler.scan().await.unwrap();

        assert!(!report.is_clean());
        assert_eq!(report.orphan_blobs.len(), 1);
        assert_eq!(report.orphan_blobs[0].path, orphan);
        assert_eq!(report.orphan_records.len(), 1);
        assert_eq!(report.orphan_records[0].storage_path, missing);
    }

    #[tokio::test]
    async fn test_prune_respects_grace() {
        let (blobs, metadata, orphan, _) = setup().await;
        let reconciler = Reconciler::new(Arc::new(blobs.clone()), Arc::new(metadata));
        let report = reconciler.scan().await.unwrap();

        let pruned = reconciler
            .prune_orphan_blobs(&report, Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(pruned, 0);
        assert!(blobs.exists(&orphan).await.unwrap());

        let pruned = reconciler
            .prune_orphan_blobs(&report, Duration::zero())
            .await
            .unwrap();
        assert_eq!(pruned, 1);
        assert!(!blobs.exists(&orphan).await.unwrap());
        assert_eq!(blobs.len().await, 1);
    }

    #[tokio::test]
    async fn test_prune_skips_newly_referenced_blob() {
        let (blobs, metadata, orphan, _) = setup().await;
        let reconciler = Reconciler::new(Arc::new(blobs.clone()), Arc::new(metadata.clone()));
        let report = reconciler.scan().await.unwrap();

        metadata.insert(record_for(&orphan)).await.unwrap();

        let pruned = reconciler
            .prune_orphan_blobs(&report, Duration::zero())
            .await
            .unwrap();
        assert_eq!(pruned, 0);
        assert!(blobs.exists(&orphan).await.unwrap());
    }
}
