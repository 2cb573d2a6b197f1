//! Vault configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use filevault_common::{Error, Result, SensitiveBytes};
use filevault_crypto::KdfParams;

/// Environment variable holding the encryption passphrase.
pub const SECRET_ENV_VAR: &str = "ENCRYPTION_SECRET";

/// Blob directory name under a data directory.
pub const BLOBS_DIRNAME: &str = "blobs";

/// Staging directory name under a data directory.
pub const STAGING_DIRNAME: &str = "staging";

/// Metadata database file name under a data directory.
pub const DATABASE_FILENAME: &str = "vault.db";

/// Vault configuration.
///
/// The passphrase is deliberately not part of this structure; it is read
/// from the environment at startup and only its derived key is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Directory holding encrypted blobs.
    pub blob_root: PathBuf,
    /// Directory for transient download plaintext.
    pub staging_dir: PathBuf,
    /// SQLite metadata database.
    pub database_path: PathBuf,
    /// Key derivation parameters.
    #[serde(default)]
    pub kdf_params: KdfParams,
}

impl VaultConfig {
    /// Lay out all vault state under one data directory.
    pub fn with_data_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            blob_root: dir.join(BLOBS_DIRNAME),
            staging_dir: dir.join(STAGING_DIRNAME),
            database_path: dir.join(DATABASE_FILENAME),
            kdf_params: KdfParams::default(),
        }
    }

    /// Override the key derivation parameters.
    pub fn kdf_params(mut self, params: KdfParams) -> Self {
        self.kdf_params = params;
        self
    }

    /// Load configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Serialize configuration to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Read the encryption passphrase from the environment.
    ///
    /// # Errors
    /// - Returns error if the variable is unset or empty
    pub fn passphrase_from_env() -> Result<SensitiveBytes> {
        match std::env::var(SECRET_ENV_VAR) {
            Ok(value) if !value.is_empty() => Ok(SensitiveBytes::from(value)),
            _ => Err(Error::InvalidInput(format!(
                "{} must be set to a non-empty passphrase",
                SECRET_ENV_VAR
            ))),
        }
    }
}
