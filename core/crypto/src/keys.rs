//! Key and IV types with secure memory handling.
//!
//! The vault key zeroizes its memory on drop so that the process-wide secret
//! does not linger after the vault is torn down.

use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use filevault_common::{Error, Result};

/// Length of the encryption key in bytes (AES-256).
pub const KEY_LENGTH: usize = 32;

/// Length of the initialization vector in bytes (one AES block).
pub const IV_LENGTH: usize = 16;

/// Process-wide file encryption key derived from the configured passphrase.
///
/// Derived once at startup and shared read-only by every vault operation.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct VaultKey {
    key: [u8; KEY_LENGTH],
}

impl VaultKey {
    /// Create a vault key from raw bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Get the key bytes.
    ///
    /// # Security
    /// The returned slice should be used immediately and not stored.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }
}

impl fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VaultKey([REDACTED])")
    }
}

/// Initialization vector for one file.
///
/// Every upload draws a fresh IV from a cryptographically secure generator.
/// It is stored next to the file metadata and never derived from content.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Iv([u8; IV_LENGTH]);

impl Iv {
    /// Generate a random IV.
    pub fn generate() -> Self {
        Self(rand::random::<[u8; IV_LENGTH]>())
    }

    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; IV_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Create from a slice of unchecked length.
    ///
    /// # Errors
    /// - Returns error if the slice is not exactly IV_LENGTH bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let array: [u8; IV_LENGTH] = bytes.try_into().map_err(|_| {
            Error::Crypto(format!(
                "Invalid IV length: expected {}, got {}",
                IV_LENGTH,
                bytes.len()
            ))
        })?;
        Ok(Self(array))
    }

    /// Decode an IV from lower- or upper-case hex.
    pub fn from_hex(encoded: &str) -> Result<Self> {
        let bytes =
            hex::decode(encoded).map_err(|e| Error::Crypto(format!("Invalid IV encoding: {}", e)))?;
        Self::from_slice(&bytes)
    }

    /// Encode the IV as lower-case hex.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Get the IV bytes.
    pub fn as_bytes(&self) -> &[u8; IV_LENGTH] {
        &self.0
    }
}

impl fmt::Debug for Iv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Iv({})", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_iv_generate_no_collisions() {
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            assert!(seen.insert(Iv::generate()));
        }
    }

    #[test]
    fn test_iv_hex_roundtrip() {
        let iv = Iv::from_bytes([0xAB; IV_LENGTH]);
        assert_eq!(iv.to_hex(), "ab".repeat(IV_LENGTH));
        assert_eq!(Iv::from_hex(&iv.to_hex()).unwrap(), iv);
    }

    #[test]
    fn test_iv_invalid_length() {
        assert!(Iv::from_slice(&[0u8; 12]).is_err());
        assert!(Iv::from_hex("abcd").is_err());
        assert!(Iv::from_hex("zz").is_err());
    }

    #[test]
    fn test_vault_key_debug_redacted() {
        let key = VaultKey::from_bytes([7u8; KEY_LENGTH]);
        assert_eq!(format!("{:?}", key), "VaultKey([REDACTED])");
    }
}
