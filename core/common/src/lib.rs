//! Common utilities and types shared across the file vault crates.
//!
//! This module provides the internal error type and the identifier newtypes
//! that flow between the crypto, storage and vault layers.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{BlobPath, ByteStream, FileId, OwnerId, SensitiveBytes};
