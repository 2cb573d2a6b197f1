//! Streaming encryption for large files.
//!
//! Files are encrypted with AES-256 in CBC mode with PKCS#7 padding. The
//! transform is incremental: input is consumed chunk by chunk and output is
//! produced as soon as whole blocks are available, so memory use does not
//! depend on file size.
//!
//! The ciphertext has no header. The IV is kept in the file's metadata record
//! and the algorithm identifier is recorded alongside it.

use std::io::{Read, Write};

use aes::Aes256;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::generic_array::GenericArray;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use futures::{stream, StreamExt};

use crate::keys::{Iv, VaultKey, IV_LENGTH, KEY_LENGTH};
use filevault_common::{ByteStream, Error, Result};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Algorithm identifier recorded with every file.
pub const ALGORITHM: &str = "aes-256-cbc";

/// Cipher block size in bytes.
pub const BLOCK_SIZE: usize = 16;

/// Default read size for the blocking adaptors (64 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// An incremental cipher transform.
///
/// `update` may be called any number of times with arbitrarily sized input;
/// `finish` flushes whatever the mode held back and ends the transform.
pub trait BlockTransform: Send + 'static {
    /// Feed input and return the output that is ready so far.
    fn update(&mut self, input: &[u8]) -> Vec<u8>;

    /// Flush the final output.
    ///
    /// # Errors
    /// - Returns error if the accumulated input cannot be completed, e.g.
    ///   a truncated ciphertext or invalid padding
    fn finish(self) -> Result<Vec<u8>>;
}

fn invalid_length() -> Error {
    Error::Crypto(format!(
        "Invalid key or IV length: expected {} and {} bytes",
        KEY_LENGTH, IV_LENGTH
    ))
}

/// Incremental AES-256-CBC encryptor.
pub struct CbcEncryptor {
    cipher: Aes256CbcEnc,
    pending: Vec<u8>,
}

impl CbcEncryptor {
    /// Create an encryptor from raw key and IV bytes.
    ///
    /// # Errors
    /// - Returns error if key or IV has the wrong length
    pub fn new(key: &[u8], iv: &[u8]) -> Result<Self> {
        let cipher = Aes256CbcEnc::new_from_slices(key, iv).map_err(|_| invalid_length())?;
        Ok(Self {
            cipher,
            pending: Vec::with_capacity(BLOCK_SIZE),
        })
    }

    /// Create an encryptor from typed key material.
    pub fn with_key(key: &VaultKey, iv: &Iv) -> Self {
        Self {
            cipher: Aes256CbcEnc::new(
                GenericArray::from_slice(key.as_bytes()),
                GenericArray::from_slice(iv.as_bytes()),
            ),
            pending: Vec::with_capacity(BLOCK_SIZE),
        }
    }
}

impl BlockTransform for CbcEncryptor {
    fn update(&mut self, input: &[u8]) -> Vec<u8> {
        self.pending.extend_from_slice(input);
        let ready = self.pending.len() - self.pending.len() % BLOCK_SIZE;

        let mut out: Vec<u8> = self.pending.drain(..ready).collect();
        for block in out.chunks_exact_mut(BLOCK_SIZE) {
            self.cipher
                .encrypt_block_mut(GenericArray::from_mut_slice(block));
        }
        out
    }

    fn finish(self) -> Result<Vec<u8>> {
        let Self {
            cipher,
            mut pending,
        } = self;

        // Fewer than BLOCK_SIZE bytes remain; padding always fills one block.
        let len = pending.len();
        pending.resize(BLOCK_SIZE, 0);
        let out = cipher
            .encrypt_padded_mut::<Pkcs7>(&mut pending, len)
            .map_err(|_| Error::Crypto("Padding failed".to_string()))?;
        Ok(out.to_vec())
    }
}

/// Incremental AES-256-CBC decryptor.
///
/// The last complete block is always held back until `finish`, because it
/// carries the padding.
pub struct CbcDecryptor {
    cipher: Aes256CbcDec,
    pending: Vec<u8>,
}

impl CbcDecryptor {
    /// Create a decryptor from raw key and IV bytes.
    ///
    /// # Errors
    /// - Returns error if key or IV has the wrong length
    pub fn new(key: &[u8], iv: &[u8]) -> Result<Self> {
        let cipher = Aes256CbcDec::new_from_slices(key, iv).map_err(|_| invalid_length())?;
        Ok(Self {
            cipher,
            pending: Vec::with_capacity(2 * BLOCK_SIZE),
        })
    }

    /// Create a decryptor from typed key material.
    pub fn with_key(key: &VaultKey, iv: &Iv) -> Self {
        Self {
            cipher: Aes256CbcDec::new(
                GenericArray::from_slice(key.as_bytes()),
                GenericArray::from_slice(iv.as_bytes()),
            ),
            pending: Vec::with_capacity(2 * BLOCK_SIZE),
        }
    }
}

impl BlockTransform for CbcDecryptor {
    fn update(&mut self, input: &[u8]) -> Vec<u8> {
        self.pending.extend_from_slice(input);
        if self.pending.len() <= BLOCK_SIZE {
            return Vec::new();
        }

        // Keep between 1 and BLOCK_SIZE bytes pending.
        let ready = (self.pending.len() - 1) / BLOCK_SIZE * BLOCK_SIZE;
        let mut out: Vec<u8> = self.pending.drain(..ready).collect();
        for block in out.chunks_exact_mut(BLOCK_SIZE) {
            self.cipher
                .decrypt_block_mut(GenericArray::from_mut_slice(block));
        }
        out
    }

    fn finish(self) -> Result<Vec<u8>> {
        let Self {
            cipher,
            mut pending,
        } = self;

        if pending.len() != BLOCK_SIZE {
            return Err(Error::Crypto(
                "Ciphertext length is not a multiple of the block size".to_string(),
            ));
        }

        let out = cipher
            .decrypt_padded_mut::<Pkcs7>(&mut pending)
            .map_err(|_| Error::Crypto("Invalid padding".to_string()))?;
        Ok(out.to_vec())
    }
}

/// Run a byte stream through a block transform.
///
/// The returned stream yields transformed chunks as input arrives, then the
/// final flushed chunk. An input error or a failing `finish` is yielded as
/// the last item.
pub fn transform_stream<T: BlockTransform>(input: ByteStream, transform: T) -> ByteStream {
    let output = stream::unfold(Some((input, transform)), |state| async move {
        let (mut input, mut transform) = state?;
        loop {
            match input.next().await {
                Some(Ok(chunk)) => {
                    let out = transform.update(&chunk);
                    if !out.is_empty() {
                        return Some((Ok(out), Some((input, transform))));
                    }
                }
                Some(Err(e)) => return Some((Err(e), None)),
                None => return Some((transform.finish(), None)),
            }
        }
    });
    Box::pin(output)
}

/// Encrypt a plaintext stream.
pub fn encrypt_stream(plaintext: ByteStream, key: &VaultKey, iv: &Iv) -> ByteStream {
    transform_stream(plaintext, CbcEncryptor::with_key(key, iv))
}

/// Decrypt a ciphertext stream.
pub fn decrypt_stream(ciphertext: ByteStream, key: &VaultKey, iv: &Iv) -> ByteStream {
    transform_stream(ciphertext, CbcDecryptor::with_key(key, iv))
}

/// Blocking encryptor over `Read`/`Write`.
pub struct EncryptingStream<'a> {
    key: &'a [u8],
    iv: &'a [u8],
    chunk_size: usize,
}

impl<'a> EncryptingStream<'a> {
    /// Create a new encrypting stream.
    ///
    /// # Errors
    /// - Returns error if key or IV length is invalid
    pub fn new(key: &'a [u8], iv: &'a [u8]) -> Result<Self> {
        if key.len() != KEY_LENGTH || iv.len() != IV_LENGTH {
            return Err(invalid_length());
        }
        Ok(Self {
            key,
            iv,
            chunk_size: DEFAULT_CHUNK_SIZE,
        })
    }

    /// Set custom chunk size.
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    /// Encrypt data from reader and write to writer.
    ///
    /// Returns the number of plaintext bytes consumed.
    ///
    /// # Errors
    /// - I/O errors from reader/writer
    pub fn encrypt_stream<R: Read, W: Write>(&self, reader: R, writer: W) -> Result<u64> {
        let transform = CbcEncryptor::new(self.key, self.iv)?;
        pump(transform, reader, writer, self.chunk_size)
    }
}

/// Blocking decryptor over `Read`/`Write`.
pub struct DecryptingStream<'a> {
    key: &'a [u8],
    iv: &'a [u8],
    chunk_size: usize,
}

impl<'a> DecryptingStream<'a> {
    /// Create a new decrypting stream.
    ///
    /// # Errors
    /// - Returns error if key or IV length is invalid
    pub fn new(key: &'a [u8], iv: &'a [u8]) -> Result<Self> {
        if key.len() != KEY_LENGTH || iv.len() != IV_LENGTH {
            return Err(invalid_length());
        }
        Ok(Self {
            key,
            iv,
            chunk_size: DEFAULT_CHUNK_SIZE,
        })
    }

    /// Set custom chunk size.
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    /// Decrypt data from reader and write to writer.
    ///
    /// Returns the number of plaintext bytes written.
    ///
    /// # Errors
    /// - I/O errors from reader/writer
    /// - Truncated ciphertext or invalid padding
    pub fn decrypt_stream<R: Read, W: Write>(&self, reader: R, writer: W) -> Result<u64> {
        let transform = CbcDecryptor::new(self.key, self.iv)?;
        let mut counter = CountingWriter {
            inner: writer,
            written: 0,
        };
        pump(transform, reader, &mut counter, self.chunk_size)?;
        Ok(counter.written)
    }
}

/// Drive a transform from a reader into a writer, returning bytes read.
fn pump<T: BlockTransform, R: Read, W: Write>(
    mut transform: T,
    mut reader: R,
    mut writer: W,
    chunk_size: usize,
) -> Result<u64> {
    let mut buffer = vec![0u8; chunk_size];
    let mut total_read = 0u64;

    loop {
        let bytes_read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        total_read += bytes_read as u64;
        writer.write_all(&transform.update(&buffer[..bytes_read]))?;
    }

    writer.write_all(&transform.finish()?)?;
    writer.flush()?;
    Ok(total_read)
}

struct CountingWriter<W> {
    inner: W,
    written: u64,
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// Encrypt a complete byte slice.
///
/// This is a convenience function for when the complete data is available.
pub fn encrypt_bytes(key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let stream = EncryptingStream::new(key, iv)?;
    let mut output = Vec::with_capacity(data.len() + BLOCK_SIZE);
    stream.encrypt_stream(data, &mut output)?;
    Ok(output)
}

/// Decrypt a complete byte slice produced by `encrypt_bytes`.
pub fn decrypt_bytes(key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let stream = DecryptingStream::new(key, iv)?;
    let mut output = Vec::with_capacity(data.len());
    stream.decrypt_stream(data, &mut output)?;
    Ok(output)
}
