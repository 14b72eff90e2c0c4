// src/hash.rs

//! Checksums for downloaded artifacts
//!
//! Repodata records list an `md5` and, in newer channels, a `sha256` for
//! every archive. Both are carried as lowercase hex; which algorithm a bare
//! digest belongs to follows from its length (32 or 64 hex digits).
//!
//! Files are verified by streaming them from disk, never by loading them.

use md5::Md5;
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

const READ_BUFFER: usize = 64 * 1024;

/// Digest algorithms found in conda repodata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    /// Legacy, the only checksum in old repodata
    Md5,
}

impl HashAlgorithm {
    /// Digest size in bytes
    pub const fn output_len(self) -> usize {
        match self {
            Self::Sha256 => 32,
            Self::Md5 => 16,
        }
    }

    /// Digest size in hex digits
    pub const fn hex_len(self) -> usize {
        self.output_len() * 2
    }

    /// Name used in repodata keys and `algo:digest` strings
    pub const fn name(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Md5 => "md5",
        }
    }

    /// Algorithm of a bare hex digest, judged by its length
    pub fn for_hex_len(len: usize) -> Option<Self> {
        [Self::Sha256, Self::Md5]
            .into_iter()
            .find(|algorithm| algorithm.hex_len() == len)
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(Self::Sha256),
            "md5" => Ok(Self::Md5),
            _ => Err(HashError::UnknownAlgorithm(s.to_string())),
        }
    }
}

/// A digest string that cannot be used
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HashError {
    #[error("unknown checksum algorithm '{0}'")]
    UnknownAlgorithm(String),

    #[error("{algorithm} digest must have {expected} hex digits, got {got}")]
    InvalidLength {
        algorithm: HashAlgorithm,
        expected: usize,
        got: usize,
    },

    #[error("'{0}' is not a hex digest")]
    InvalidHex(String),
}

/// Expected or computed digest of an artifact
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Hash {
    pub algorithm: HashAlgorithm,
    value: String,
}

impl Hash {
    /// Checked constructor; the digest is normalized to lowercase
    pub fn new(algorithm: HashAlgorithm, value: impl Into<String>) -> Result<Self, HashError> {
        let value = value.into().trim().to_ascii_lowercase();

        if !value.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(HashError::InvalidHex(value));
        }
        if value.len() != algorithm.hex_len() {
            return Err(HashError::InvalidLength {
                algorithm,
                expected: algorithm.hex_len(),
                got: value.len(),
            });
        }

        Ok(Self { algorithm, value })
    }

    /// Hex SHA-256 as found in a repodata `sha256` field
    pub fn sha256(value: impl Into<String>) -> Result<Self, HashError> {
        Self::new(HashAlgorithm::Sha256, value)
    }

    /// Hex MD5 as found in a repodata `md5` field
    pub fn md5(value: impl Into<String>) -> Result<Self, HashError> {
        Self::new(HashAlgorithm::Md5, value)
    }

    /// Lowercase hex digest
    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// Parse `algo:digest`, or a bare digest whose length names the algorithm
    pub fn parse_prefixed(s: &str) -> Result<Self, HashError> {
        match s.split_once(':') {
            Some((algorithm, digest)) => Self::new(algorithm.parse()?, digest),
            None => {
                let digest = s.trim();
                let algorithm = HashAlgorithm::for_hex_len(digest.len()).ok_or(
                    HashError::InvalidLength {
                        algorithm: HashAlgorithm::Sha256,
                        expected: HashAlgorithm::Sha256.hex_len(),
                        got: digest.len(),
                    },
                )?;
                Self::new(algorithm, digest)
            }
        }
    }

    /// `algo:digest` form
    pub fn to_prefixed_string(&self) -> String {
        format!("{}:{}", self.algorithm, self.value)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl FromStr for Hash {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_prefixed(s)
    }
}

/// Incremental digest computation
pub enum Hasher {
    Sha256(Sha256),
    Md5(Md5),
}

impl Hasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Sha256 => Self::Sha256(Sha256::new()),
            HashAlgorithm::Md5 => Self::Md5(Md5::new()),
        }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        match self {
            Self::Sha256(_) => HashAlgorithm::Sha256,
            Self::Md5(_) => HashAlgorithm::Md5,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha256(state) => state.update(data),
            Self::Md5(state) => state.update(data),
        }
    }

    pub fn finalize(self) -> Hash {
        let (algorithm, value) = match self {
            Self::Sha256(state) => (HashAlgorithm::Sha256, hex::encode(state.finalize())),
            Self::Md5(state) => (HashAlgorithm::Md5, hex::encode(state.finalize())),
        };
        Hash { algorithm, value }
    }
}

/// Digest of an in-memory buffer
pub fn hash_bytes(algorithm: HashAlgorithm, data: &[u8]) -> Hash {
    let mut hasher = Hasher::new(algorithm);
    hasher.update(data);
    hasher.finalize()
}

/// Digest of everything a reader yields
pub fn hash_reader<R: Read>(algorithm: HashAlgorithm, reader: &mut R) -> io::Result<Hash> {
    let mut hasher = Hasher::new(algorithm);
    let mut buffer = vec![0u8; READ_BUFFER];
    loop {
        match reader.read(&mut buffer)? {
            0 => return Ok(hasher.finalize()),
            n => hasher.update(&buffer[..n]),
        }
    }
}

/// Digest of a file on disk
pub fn hash_file(algorithm: HashAlgorithm, path: &Path) -> io::Result<Hash> {
    let mut reader = BufReader::with_capacity(READ_BUFFER, File::open(path)?);
    hash_reader(algorithm, &mut reader)
}

/// Hex SHA-256 of a buffer
pub fn sha256(data: &[u8]) -> String {
    hash_bytes(HashAlgorithm::Sha256, data).value
}

/// Hex MD5 of a buffer (cache keys, legacy checksums)
pub fn md5(data: &[u8]) -> String {
    hash_bytes(HashAlgorithm::Md5, data).value
}

/// Digest did not match the expected value
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{algorithm} mismatch: expected {expected}, got {actual}")]
pub struct VerifyError {
    pub algorithm: HashAlgorithm,
    pub expected: String,
    pub actual: String,
}

impl VerifyError {
    fn new(expected: &Hash, actual: impl Into<String>) -> Self {
        Self {
            algorithm: expected.algorithm,
            expected: expected.value.clone(),
            actual: actual.into(),
        }
    }
}

/// Check a buffer against an expected digest
///
/// ```
/// use condafetch::hash::{Hash, verify_bytes};
///
/// let expected = Hash::md5("5eb63bbbe01eeed093cb22bb8f5acdc3").unwrap();
/// assert!(verify_bytes(b"hello world", &expected).is_ok());
/// ```
pub fn verify_bytes(data: &[u8], expected: &Hash) -> Result<(), VerifyError> {
    let actual = hash_bytes(expected.algorithm, data);
    if actual == *expected {
        Ok(())
    } else {
        Err(VerifyError::new(expected, actual.value))
    }
}

/// Check a file against an expected digest
///
/// An unreadable file is reported as a mismatch.
pub fn verify_file(path: &Path, expected: &Hash) -> Result<(), VerifyError> {
    match hash_file(expected.algorithm, path) {
        Ok(actual) if actual == *expected => Ok(()),
        Ok(actual) => Err(VerifyError::new(expected, actual.value)),
        Err(e) => Err(VerifyError::new(expected, format!("<unreadable: {e}>"))),
    }
}
