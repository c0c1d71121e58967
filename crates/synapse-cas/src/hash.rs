//! SHA-256 blob identity.

use std::fmt;
use std::io::{self, Read};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Read buffer for streaming hashes
pub(crate) const HASH_BUF_SIZE: usize = 64 * 1024;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("not a sha256 hex digest: {0:?}")]
pub struct InvalidHash(pub String);

/// Lowercase 64-char hex SHA-256 digest. Primary key of a blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BlobHash(String);

impl BlobHash {
    /// Parse a hex digest. Uppercase input is accepted and normalized.
    pub fn parse(hex: &str) -> Result<Self, InvalidHash> {
        if hex.len() != 64 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(InvalidHash(hex.to_string()));
        }
        Ok(Self(hex.to_ascii_lowercase()))
    }

    /// Hash an in-memory buffer.
    pub fn of_bytes(data: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(data)))
    }

    /// Hash everything `reader` yields, returning the digest and byte count.
    pub fn of_reader<R: Read>(mut reader: R) -> io::Result<(Self, u64)> {
        let mut hasher = Sha256::new();
        let mut buffer = vec![0_u8; HASH_BUF_SIZE];
        let mut total = 0u64;
        loop {
            let read = reader.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
            total += read as u64;
        }
        Ok((Self::from_digest(hasher), total))
    }

    pub(crate) fn from_digest(hasher: Sha256) -> Self {
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Two-char fan-out directory name
    pub fn prefix(&self) -> &str {
        &self.0[..2]
    }

    /// First 12 chars, for log lines and reports
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for BlobHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for BlobHash {
    type Err = InvalidHash;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for BlobHash {
    type Error = InvalidHash;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<BlobHash> for String {
    fn from(hash: BlobHash) -> Self {
        hash.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // sha256("hello")
    const HELLO: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn test_of_bytes_matches_known_digest() {
        assert_eq!(BlobHash::of_bytes(b"hello").as_str(), HELLO);
    }

    #[test]
    fn test_of_reader_matches_of_bytes() {
        let data = vec![7u8; HASH_BUF_SIZE * 2 + 13];
        let (hash, size) = BlobHash::of_reader(&data[..]).unwrap();
        assert_eq!(hash, BlobHash::of_bytes(&data));
        assert_eq!(size, data.len() as u64);
    }

    #[test]
    fn test_parse_normalizes_case() {
        let upper = HELLO.to_ascii_uppercase();
        assert_eq!(BlobHash::parse(&upper).unwrap().as_str(), HELLO);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(BlobHash::parse("abc").is_err());
        assert!(BlobHash::parse(&"g".repeat(64)).is_err());
    }

    #[test]
    fn test_serde_uses_hex_string() {
        let hash = BlobHash::parse(HELLO).unwrap();
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{}\"", HELLO));
        assert!(serde_json::from_str::<BlobHash>("\"nope\"").is_err());
    }

    #[test]
    fn test_prefix_and_short() {
        let hash = BlobHash::parse(HELLO).unwrap();
        assert_eq!(hash.prefix(), "2c");
        assert_eq!(hash.short(), "2cf24dba5fb0");
    }
}
