//! Encrypted file vault.
//!
//! This module provides:
//! - Ownership-scoped file metadata (`FileRecord`) and its stores
//! - Upload, list, download and delete of encrypted files (`FileVault`)
//! - Guaranteed cleanup of transient plaintext produced by downloads
//! - An operator-driven orphan reconciliation scan
//!
//! # Architecture
//! The vault sits between an external authentication layer, which supplies
//! a verified `OwnerId` for every call, and the blob and metadata stores.
//! All encryption and decryption happens inside the vault; stores only ever
//! see ciphertext and descriptive metadata.

pub mod config;
pub mod download;
pub mod error;
pub mod metadata;
pub mod operations;
pub mod reconcile;
pub mod record;

pub use config::{VaultConfig, SECRET_ENV_VAR};
pub use download::Download;
pub use error::{VaultError, VaultResult};
pub use metadata::{MemoryMetadataStore, MetadataStore, SqliteMetadataStore};
pub use operations::{FileVault, UploadRequest};
pub use reconcile::{ReconcileReport, Reconciler};
pub use record::{FileRecord, FileSummary, NewFileRecord, RecordLocator};
