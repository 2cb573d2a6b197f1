//! Blob storage and transient staging for the file vault.
//!
//! This module provides a trait-based interface for ciphertext storage
//! backends (local filesystem, in-memory) and the self-cleaning staging
//! area used for plaintext produced during downloads.
//!
//! # Design Principles
//! - Blob stores only ever see ciphertext
//! - Async operations: All I/O operations are async
//! - Streaming support: blobs are written and read as byte streams
//! - Unified error semantics: missing blobs are always `Error::NotFound`

pub mod local;
pub mod memory;
pub mod provider;
pub mod staging;

pub use filevault_common::ByteStream;
pub use local::LocalBlobStore;
pub use memory::MemoryBlobStore;
pub use provider::{BlobMetadata, BlobStore};
pub use staging::{StagedFile, StagingArea};
