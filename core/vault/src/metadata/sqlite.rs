//! SQLite-backed metadata store.
//!
//! One `files` table holds every record. Queries run on the blocking pool
//! behind a single connection.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use super::{sort_newest_first, MetadataStore};
use crate::record::{FileRecord, NewFileRecord, RecordLocator};
use filevault_common::{BlobPath, Error, FileId, OwnerId, Result};
use filevault_crypto::Iv;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS files (
        id TEXT PRIMARY KEY,
        owner_id TEXT NOT NULL,
        storage_path TEXT NOT NULL UNIQUE,
        file_name TEXT NOT NULL,
        mime_type TEXT NOT NULL,
        size_bytes INTEGER NOT NULL,
        iv TEXT NOT NULL,
        algorithm TEXT NOT NULL,
        created_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_files_owner ON files(owner_id, created_at);
"#;

const RECORD_COLUMNS: &str =
    "id, owner_id, storage_path, file_name, mime_type, size_bytes, iv, algorithm, created_at";

/// Metadata store persisted in a SQLite database.
#[derive(Clone)]
pub struct SqliteMetadataStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteMetadataStore {
    /// Create or open a metadata database.
    ///
    /// # Errors
    /// - Database creation or migration failure
    pub async fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let conn = tokio::task::spawn_blocking(move || -> Result<Connection> {
            let conn = Connection::open(&db_path).map_err(metadata_err)?;
            conn.execute_batch(SCHEMA).map_err(metadata_err)?;
            Ok(conn)
        })
        .await
        .map_err(|e| Error::Metadata(format!("Metadata task failed: {}", e)))??;

        info!("Metadata store opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory database (for testing).
    pub async fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(metadata_err)?;
        conn.execute_batch(SCHEMA).map_err(metadata_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a query against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| Error::Metadata("Metadata connection poisoned".to_string()))?;
            f(&guard)
        })
        .await
        .map_err(|e| Error::Metadata(format!("Metadata task failed: {}", e)))?
    }
}

fn metadata_err(e: rusqlite::Error) -> Error {
    Error::Metadata(e.to_string())
}

/// Columns of one `files` row, before validation.
struct RawRecord {
    id: String,
    owner_id: String,
    storage_path: String,
    file_name: String,
    mime_type: String,
    size_bytes: i64,
    iv: String,
    algorithm: String,
    created_at: String,
}

impl RawRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            storage_path: row.get(2)?,
            file_name: row.get(3)?,
            mime_type: row.get(4)?,
            size_bytes: row.get(5)?,
            iv: row.get(6)?,
            algorithm: row.get(7)?,
            created_at: row.get(8)?,
        })
    }

    fn into_record(self) -> Result<FileRecord> {
        let corrupt = |what: &str| Error::Metadata(format!("Corrupt {} in row {}", what, self.id));

        let id = FileId::parse(&self.id).map_err(|_| corrupt("id"))?;
        let owner_id = OwnerId::new(self.owner_id.clone()).map_err(|_| corrupt("owner"))?;
        let storage_path = BlobPath::parse(&self.storage_path).map_err(|_| corrupt("storage path"))?;
        let size_bytes = u64::try_from(self.size_bytes).map_err(|_| corrupt("size"))?;
        let iv = Iv::from_hex(&self.iv).map_err(|_| corrupt("iv"))?;
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|_| corrupt("timestamp"))?
            .with_timezone(&Utc);

        Ok(FileRecord {
            id,
            owner_id,
            storage_path,
            file_name: self.file_name,
            mime_type: self.mime_type,
            size_bytes,
            iv,
            algorithm: self.algorithm,
            created_at,
        })
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn insert(&self, record: NewFileRecord) -> Result<FileRecord> {
        let record = record.into_record(FileId::generate(), Utc::now());
        let size = i64::try_from(record.size_bytes)
            .map_err(|_| Error::InvalidInput("File too large".to_string()))?;

        let row = record.clone();
        self.with_conn(move |conn| {
            conn.execute(
                r#"
                INSERT INTO files
                (id, owner_id, storage_path, file_name, mime_type, size_bytes, iv, algorithm, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
                params![
                    row.id.to_string(),
                    row.owner_id.as_str(),
                    row.storage_path.as_str(),
                    row.file_name,
                    row.mime_type,
                    size,
                    row.iv.to_hex(),
                    row.algorithm,
                    row.created_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
                ],
            )
            .map_err(metadata_err)?;
            Ok(())
        })
        .await?;

        debug!(file_id = %record.id, owner = %record.owner_id, "Record inserted");
        Ok(record)
    }

    async fn get(&self, owner: &OwnerId, id: &FileId) -> Result<Option<FileRecord>> {
        let owner = owner.as_str().to_string();
        let id = id.to_string();

        let raw = self
            .with_conn(move |conn| {
                conn.query_row(
                    &format!(
                        "SELECT {} FROM files WHERE id = ?1 AND owner_id = ?2",
                        RECORD_COLUMNS
                    ),
                    params![id, owner],
                    RawRecord::from_row,
                )
                .optional()
                .map_err(metadata_err)
            })
            .await?;

        raw.map(RawRecord::into_record).transpose()
    }

    async fn list(&self, owner: &OwnerId) -> Result<Vec<FileRecord>> {
        let owner = owner.as_str().to_string();

        let rows = self
            .with_conn(move |conn| {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {} FROM files WHERE owner_id = ?1",
                        RECORD_COLUMNS
                    ))
                    .map_err(metadata_err)?;
                let rows = stmt
                    .query_map(params![owner], RawRecord::from_row)
                    .map_err(metadata_err)?
                    .collect::<rusqlite::Result<Vec<_>>>()
                    .map_err(metadata_err)?;
                Ok(rows)
            })
            .await?;

        // Timestamps are compared parsed; RFC 3339 text does not sort across offsets.
        let mut records = rows
            .into_iter()
            .map(RawRecord::into_record)
            .collect::<Result<Vec<_>>>()?;
        sort_newest_first(&mut records);
        Ok(records)
    }

    async fn delete(&self, owner: &OwnerId, id: &FileId) -> Result<bool> {
        let owner = owner.as_str().to_string();
        let id = id.to_string();

        let removed = self
            .with_conn(move |conn| {
                conn.execute(
                    "DELETE FROM files WHERE id = ?1 AND owner_id = ?2",
                    params![id, owner],
                )
                .map_err(metadata_err)
            })
            .await?;

        Ok(removed > 0)
    }

    async fn locators(&self) -> Result<Vec<RecordLocator>> {
        let rows = self
            .with_conn(|conn| {
                let mut stmt = conn
                    .prepare("SELECT id, owner_id, storage_path FROM files")
                    .map_err(metadata_err)?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    })
                    .map_err(metadata_err)?
                    .collect::<rusqlite::Result<Vec<_>>>()
                    .map_err(metadata_err)?;
                Ok(rows)
            })
            .await?;

        rows.into_iter()
            .map(|(id, owner_id, storage_path)| {
                Ok(RecordLocator {
                    id: FileId::parse(&id)
                        .map_err(|_| Error::Metadata(format!("Corrupt id in row {}", id)))?,
                    owner_id: OwnerId::new(owner_id)
                        .map_err(|_| Error::Metadata(format!("Corrupt owner in row {}", id)))?,
                    storage_path: BlobPath::parse(&storage_path).map_err(|_| {
                        Error::Metadata(format!("Corrupt storage path in row {}", id))
                    })?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn new_record(owner: &str, size: u64) -> NewFileRecord {
        NewFileRecord {
            owner_id: OwnerId::new(owner).unwrap(),
            storage_path: BlobPath::generate(),
            file_name: "photo.jpg".to_string(),
            mime_type: "image/jpeg".to_string(),
            size_bytes: size,
            iv: Iv::generate(),
            algorithm: "aes-256-cbc".to_string(),
        }
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = SqliteMetadataStore::in_memory().await.unwrap();
        let owner = OwnerId::new("u1").unwrap();

        let inserted = store.insert(new_record("u1", 1234)).await.unwrap();
        let fetched = store.get(&owner, &inserted.id).await.unwrap().unwrap();

        assert_eq!(fetched, inserted);
    }

    #[tokio::test]
    async fn test_get_other_owner_is_none() {
        let store = SqliteMetadataStore::in_memory().await.unwrap();
        let inserted = store.insert(new_record("u1", 1)).await.unwrap();

        let other = OwnerId::new("u2").unwrap();
        assert!(store.get(&other, &inserted.id).await.unwrap().is_none());
        assert!(!store.delete(&other, &inserted.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let store = SqliteMetadataStore::in_memory().await.unwrap();
        let owner = OwnerId::new("u1").unwrap();

        let first = store.insert(new_record("u1", 1)).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = store.insert(new_record("u1", 2)).await.unwrap();
        store.insert(new_record("u2", 3)).await.unwrap();

        let listed: Vec<FileId> = store
            .list(&owner)
            .await
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(listed, vec![second.id, first.id]);

        assert!(store.delete(&owner, &first.id).await.unwrap());
        assert!(!store.delete(&owner, &first.id).await.unwrap());
        assert_eq!(store.list(&owner).await.unwrap().len(), 1);
        assert_eq!(store.locators().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_storage_path_rejected() {
        let store = SqliteMetadataStore::in_memory().await.unwrap();
        let record = new_record("u1", 1);

        store.insert(record.clone()).await.unwrap();
        assert!(store.insert(record).await.is_err());
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("meta").join("vault.db");
        let owner = OwnerId::new("u1").unwrap();

        let inserted = {
            let store = SqliteMetadataStore::open(&path).await.unwrap();
            store.insert(new_record("u1", 99)).await.unwrap()
        };

        let reopened = SqliteMetadataStore::open(&path).await.unwrap();
        let fetched = reopened.get(&owner, &inserted.id).await.unwrap().unwrap();
        assert_eq!(fetched.iv, inserted.iv);
        assert_eq!(fetched.created_at, inserted.created_at);
    }
}
