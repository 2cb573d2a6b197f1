//! Common types used throughout the file vault.

use futures::Stream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::pin::Pin;
use uuid::Uuid;
use zeroize::Zeroize;

/// Byte stream type for streaming uploads, downloads and cipher transforms.
///
/// An `Err` item signals failure of the producing side; the stream ends after
/// it.
pub type ByteStream = Pin<Box<dyn Stream<Item = crate::Result<Vec<u8>>> + Send>>;

/// Identifier of a verified principal that owns files.
///
/// The vault never authenticates callers itself; whoever constructs an
/// `OwnerId` vouches for it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct OwnerId(String);

impl OwnerId {
    /// Create a new OwnerId from a string.
    ///
    /// # Errors
    /// - Returns error if id is empty
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(crate::Error::InvalidInput(
                "OwnerId cannot be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for OwnerId {
    type Error = crate::Error;

    fn try_from(id: String) -> crate::Result<Self> {
        Self::new(id)
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier of a stored file, assigned on metadata insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileId(Uuid);

impl FileId {
    /// Generate a new random file id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a file id from its string form.
    ///
    /// # Errors
    /// - Returns `NotFound` for malformed ids, since a malformed id can never
    ///   name an existing file
    pub fn parse(id: &str) -> crate::Result<Self> {
        Uuid::parse_str(id)
            .map(Self)
            .map_err(|_| crate::Error::NotFound("Malformed file id".to_string()))
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque locator of an encrypted blob inside a blob store.
///
/// A blob path is a single flat name. It is generated from a random token and
/// never from a client-supplied filename, so it cannot collide or traverse
/// out of the store root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct BlobPath(String);

impl BlobPath {
    /// Prefix shared by all generated blob names.
    pub const PREFIX: &'static str = "enc_";

    /// Allocate a fresh, unique blob path.
    pub fn generate() -> Self {
        Self(format!("{}{}", Self::PREFIX, Uuid::new_v4().simple()))
    }

    /// Parse an existing blob name, e.g. one read back from the metadata store.
    ///
    /// # Errors
    /// - Returns error if the name is empty, contains separators or is a
    ///   relative path component
    pub fn parse(name: &str) -> crate::Result<Self> {
        if name.is_empty() {
            return Err(crate::Error::InvalidInput(
                "Blob path cannot be empty".to_string(),
            ));
        }
        if name == "." || name == ".." {
            return Err(crate::Error::InvalidInput(
                "Blob path cannot be a relative component".to_string(),
            ));
        }
        if name.contains('/') || name.contains('\\') || name.contains('\0') {
            return Err(crate::Error::InvalidInput(
                "Blob path cannot contain separators".to_string(),
            ));
        }
        Ok(Self(name.to_string()))
    }

    /// Get the blob name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for BlobPath {
    type Error = crate::Error;

    fn try_from(name: String) -> crate::Result<Self> {
        Self::parse(&name)
    }
}

impl fmt::Display for BlobPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sensitive data wrapper that zeroizes on drop.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct SensitiveBytes(Vec<u8>);

impl SensitiveBytes {
    /// Create new sensitive bytes.
    pub fn new(data: Vec<u8>) -> Self {
        Self(data)
    }

    /// Get a reference to the inner bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Get the length.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for SensitiveBytes {
    fn from(value: String) -> Self {
        Self(value.into_bytes())
    }
}

impl fmt::Debug for SensitiveBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SensitiveBytes([REDACTED; {} bytes])", self.0.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_owner_id_creation() {
        let id = OwnerId::new("u1").unwrap();
        assert_eq!(id.as_str(), "u1");
    }

    #[test]
    fn test_owner_id_empty_fails() {
        assert!(OwnerId::new("").is_err());
    }

    #[test]
    fn test_file_id_parse() {
        let id = FileId::generate();
        let parsed = FileId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_file_id_malformed_is_not_found() {
        let err = FileId::parse("../../etc/passwd").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_blob_path_generate_unique() {
        let a = BlobPath::generate();
        let b = BlobPath::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with(BlobPath::PREFIX));
        assert!(BlobPath::parse(a.as_str()).is_ok());
    }

    #[test]
    fn test_blob_path_rejects_traversal() {
        assert!(BlobPath::parse("").is_err());
        assert!(BlobPath::parse("..").is_err());
        assert!(BlobPath::parse("../secret").is_err());
        assert!(BlobPath::parse("a\\b").is_err());
    }

    #[test]
    fn test_deserialize_validates() {
        let path = BlobPath::generate();
        let json = serde_json::to_string(&path).unwrap();
        assert_eq!(serde_json::from_str::<BlobPath>(&json).unwrap(), path);

        assert!(serde_json::from_str::<BlobPath>("\"../etc/passwd\"").is_err());
        assert!(serde_json::from_str::<BlobPath>("\"\"").is_err());
        assert!(serde_json::from_str::<OwnerId>("\"\"").is_err());
        assert_eq!(
            serde_json::from_str::<OwnerId>("\"u1\"").unwrap(),
            OwnerId::new("u1").unwrap()
        );
    }

    #[test]
    fn test_sensitive_bytes_debug_redacted() {
        let secret = SensitiveBytes::from("hunter2".to_string());
        let shown = format!("{:?}", secret);
        assert!(!shown.contains("hunter2"));
        assert_eq!(secret.len(), 7);
    }

    proptest! {
        #[test]
        fn prop_blob_path_never_contains_separator(name in "\\PC*") {
            if let Ok(path) = BlobPath::parse(&name) {
                prop_assert!(!path.as_str().contains('/'));
                prop_assert!(!path.as_str().contains('\\'));
            }
        }
    }
}
