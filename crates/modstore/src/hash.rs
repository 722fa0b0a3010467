//! ContentHash: a BLAKE3 content hash truncated to 128 bits (32 hex chars).
//!
//! The hash only guards against accidental corruption and stale client
//! caches. 128 bits of BLAKE3 keeps the sidecar the same shape as an MD5 hex
//! digest while being a far stronger function.
//!
//! Hashing is always incremental: [`ContentHasher`] consumes chunks,
//! [`HashingWriter`] tees a write stream into a sink and the digest in one
//! pass, and [`ContentHash::from_reader`] drains a reader in fixed-size chunks.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, Read, Write};
use std::str::FromStr;
use thiserror::Error;

/// Hex length of a content hash.
pub const HASH_HEX_LEN: usize = 32;

const HASH_BYTES: usize = HASH_HEX_LEN / 2;
const CHUNK_SIZE: usize = 64 * 1024;

/// A content hash - 128 bits (16 bytes, 32 hex chars) of BLAKE3.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

/// Errors that can occur when parsing content hashes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HashError {
    #[error("invalid hash length: expected {HASH_HEX_LEN} hex chars, got {0}")]
    InvalidLength(usize),

    #[error("invalid hex character in hash")]
    InvalidHex,
}

impl ContentHash {
    /// Hash an in-memory buffer.
    pub fn from_data(data: &[u8]) -> Self {
        let mut hasher = ContentHasher::new();
        hasher.update(data);
        hasher.finalize()
    }

    /// Drain a reader through the hasher, returning the hash and byte count.
    pub fn from_reader<R: Read>(mut reader: R) -> io::Result<(Self, u64)> {
        let mut hasher = ContentHasher::new();
        let mut buffer = vec![0u8; CHUNK_SIZE];

        loop {
            let bytes_read = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            hasher.update(&buffer[..bytes_read]);
        }

        let total = hasher.bytes_hashed();
        Ok((hasher.finalize(), total))
    }

    /// Parse a hash string, accepting either case and normalizing to lowercase.
    pub fn parse(s: &str) -> Result<Self, HashError> {
        let s = s.trim();
        if s.len() != HASH_HEX_LEN {
            return Err(HashError::InvalidLength(s.len()));
        }
        if !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(HashError::InvalidHex);
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    /// Compare against a client-asserted digest. Malformed input never matches.
    pub fn matches(&self, asserted: &str) -> bool {
        Self::parse(asserted).map(|h| h == *self).unwrap_or(false)
    }

    /// Get the full hash as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume and return the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ContentHash {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for ContentHash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Incremental hasher producing a [`ContentHash`].
#[derive(Debug, Clone, Default)]
pub struct ContentHasher {
    inner: blake3::Hasher,
    bytes_hashed: u64,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
        self.bytes_hashed += data.len() as u64;
    }

    pub fn bytes_hashed(&self) -> u64 {
        self.bytes_hashed
    }

    pub fn finalize(&self) -> ContentHash {
        let digest = self.inner.finalize();
        ContentHash(hex::encode(&digest.as_bytes()[..HASH_BYTES]))
    }
}

impl Write for ContentHasher {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Tee: every byte accepted by the sink is also fed to the digest.
///
/// Only bytes the inner writer actually accepted are hashed, so a short
/// write never desynchronizes the digest from the file contents.
#[derive(Debug)]
pub struct HashingWriter<W: Write> {
    inner: W,
    hasher: ContentHasher,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: ContentHasher::new(),
        }
    }

    /// Bytes written through so far.
    pub fn bytes_written(&self) -> u64 {
        self.hasher.bytes_hashed()
    }

    /// Split into the sink, the final hash and the byte count.
    pub fn into_parts(self) -> (W, ContentHash, u64) {
        let hash = self.hasher.finalize();
        let size = self.hasher.bytes_hashed();
        (self.inner, hash, size)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
