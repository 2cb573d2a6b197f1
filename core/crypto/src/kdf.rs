//! Key derivation using scrypt.
//!
//! The vault key is derived once per process from the configured passphrase.
//! The salt is a fixed constant, so the same passphrase always yields the
//! same key across restarts. That keeps existing blobs readable, at the cost
//! of making precomputation against the passphrase possible.

use scrypt::{scrypt, Params};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::keys::{VaultKey, KEY_LENGTH};
use filevault_common::{Error, Result};

/// Fixed salt used for every derivation.
pub const FIXED_SALT: &[u8] = b"salt";

/// Parameters for scrypt key derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// log2 of the CPU/memory cost N.
    pub log_n: u8,
    /// Block size.
    pub r: u32,
    /// Degree of parallelism.
    pub p: u32,
}

impl KdfParams {
    /// Standard parameters (N = 16384, r = 8, p = 1).
    ///
    /// Keys derived with these parameters decrypt blobs written by the
    /// original service.
    pub fn standard() -> Self {
        Self {
            log_n: 14,
            r: 8,
            p: 1,
        }
    }

    /// Cheap parameters for tests and throwaway vaults.
    pub fn fast() -> Self {
        Self {
            log_n: 8,
            r: 8,
            p: 1,
        }
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::standard()
    }
}

/// Derive the vault key from a passphrase.
///
/// # Preconditions
/// - `passphrase` must not be empty
///
/// # Postconditions
/// - The derived key is deterministic for a given passphrase and params
///
/// # Errors
/// - Returns error if passphrase is empty
/// - Returns error if scrypt parameters are invalid
pub fn derive_key(passphrase: &[u8], params: &KdfParams) -> Result<VaultKey> {
    if passphrase.is_empty() {
        return Err(Error::InvalidInput(
            "Passphrase cannot be empty".to_string(),
        ));
    }

    let scrypt_params = Params::new(params.log_n, params.r, params.p, KEY_LENGTH)
        .map_err(|e| Error::Crypto(format!("Invalid KDF parameters: {}", e)))?;

    let mut key_bytes = [0u8; KEY_LENGTH];
    scrypt(passphrase, FIXED_SALT, &scrypt_params, &mut key_bytes)
        .map_err(|e| Error::Crypto(format!("Key derivation failed: {}", e)))?;

    let key = VaultKey::from_bytes(key_bytes);
    key_bytes.zeroize();
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_key_deterministic() {
        let params = KdfParams::fast();

        let key1 = derive_key(b"test-passphrase", &params).unwrap();
        let key2 = derive_key(b"test-passphrase", &params).unwrap();

        assert_eq!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_derive_key_different_passphrase() {
        let params = KdfParams::fast();

        let key1 = derive_key(b"passphrase1", &params).unwrap();
        let key2 = derive_key(b"passphrase2", &params).unwrap();

        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_derive_key_params_matter() {
        let key1 = derive_key(b"passphrase", &KdfParams::fast()).unwrap();
        let key2 = derive_key(
            b"passphrase",
            &KdfParams {
                log_n: 9,
                r: 8,
                p: 1,
            },
        )
        .unwrap();

        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_derive_key_empty_passphrase_fails() {
        assert!(derive_key(b"", &KdfParams::fast()).is_err());
    }

    #[test]
    fn test_invalid_params_fail() {
        let params = KdfParams {
            log_n: 0,
            r: 0,
            p: 0,
        };
        assert!(derive_key(b"passphrase", &params).is_err());
    }
}
