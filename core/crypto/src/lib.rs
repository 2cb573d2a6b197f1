//! Cryptographic primitives for the file vault.
//!
//! This module provides:
//! - Process-wide key derivation from a passphrase using scrypt
//! - Per-file initialization vectors from a CSPRNG
//! - Streaming AES-256-CBC encryption and decryption (CipherStream)
//!
//! # Security Notes
//! - Key material is zeroized on drop and never logged
//! - The chaining mode is not authenticated: tampered ciphertext is only
//!   detected when it breaks block alignment or the final padding

pub mod kdf;
pub mod keys;
pub mod stream;

pub use kdf::{derive_key, KdfParams, FIXED_SALT};
pub use keys::{Iv, VaultKey, IV_LENGTH, KEY_LENGTH};
pub use stream::{
    decrypt_bytes, decrypt_stream, encrypt_bytes, encrypt_stream, BlockTransform, CbcDecryptor,
    CbcEncryptor, DecryptingStream, EncryptingStream, ALGORITHM,
};
