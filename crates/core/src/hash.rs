//! Content hashing.
//!
//! Stored files are identified by the SHA-1 digest of their bytes, rendered
//! as 40 lowercase hex characters. The digest doubles as the opaque
//! content-address token handed back to clients.

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::fmt;

/// Length of a hex-encoded content hash.
pub const HEX_LEN: usize = 40;

/// A content hash (SHA-1 of file contents).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash([u8; 20]);

impl ContentHash {
    /// Compute the hash of the given data.
    pub fn compute(data: &[u8]) -> Self {
        let digest = Sha1::digest(data);
        Self(digest.into())
    }

    /// Parse from a 40-character hex string (case-insensitive).
    pub fn from_hex(s: &str) -> crate::Result<Self> {
        if s.len() != HEX_LEN {
            return Err(crate::Error::InvalidChecksum(format!(
                "expected {} hex characters, got {}",
                HEX_LEN,
                s.len()
            )));
        }
        let mut bytes = [0u8; 20];
        hex::decode_to_slice(s.to_ascii_lowercase(), &mut bytes)
            .map_err(|e| crate::Error::InvalidChecksum(e.to_string()))?;
        Ok(Self(bytes))
    }

    /// Encode as a lowercase hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", &self.to_hex()[..12])
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl TryFrom<String> for ContentHash {
    type Error = crate::Error;

    fn try_from(s: String) -> crate::Result<Self> {
        Self::from_hex(&s)
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.to_hex()
    }
}

/// Incremental hasher for streamed uploads and chunk assembly.
#[derive(Default)]
pub struct ContentHasher {
    inner: Sha1,
    bytes: u64,
}

impl ContentHasher {
    /// Create a new hasher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed data into the hasher.
    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
        self.bytes += data.len() as u64;
    }

    /// Total bytes hashed so far.
    pub fn bytes_hashed(&self) -> u64 {
        self.bytes
    }

    /// Finalize into a content hash.
    pub fn finalize(self) -> ContentHash {
        ContentHash(self.inner.finalize().into())
    }

    /// Finalize and verify against an expected hash.
    pub fn verify(self, expected: &ContentHash) -> crate::Result<ContentHash> {
        let actual = self.finalize();
        if &actual != expected {
            return Err(crate::Error::ChecksumMismatch {
                expected: expected.to_hex(),
                actual: actual.to_hex(),
            });
        }
        Ok(actual)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_known_digest() {
        // SHA-1 of the empty string.
        let hash = ContentHash::compute(b"");
        assert_eq!(hash.to_hex(), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
    }

    #[test]
    fn test_from_hex_roundtrip() {
        let hash = ContentHash::compute(b"stowage");
        let parsed = ContentHash::from_hex(&hash.to_hex()).unwrap();
        assert_eq!(hash, parsed);
    }

    #[test]
    fn test_from_hex_accepts_uppercase() {
        let hash = ContentHash::compute(b"stowage");
        let parsed = ContentHash::from_hex(&hash.to_hex().to_uppercase()).unwrap();
        assert_eq!(hash, parsed);
    }

    #[test]
    fn test_from_hex_rejects_bad_input() {
        assert!(ContentHash::from_hex("abcd").is_err());
        assert!(ContentHash::from_hex(&"g".repeat(40)).is_err());
    }

    #[test]
    fn test_incremental_matches_oneshot() {
        let mut hasher = ContentHasher::new();
        hasher.update(b"sto");
        hasher.update(b"wage");
        assert_eq!(hasher.bytes_hashed(), 7);
        assert_eq!(hasher.finalize(), ContentHash::compute(b"stowage"));
    }

    #[test]
    fn test_verify_mismatch() {
        let mut hasher = ContentHasher::new();
        hasher.update(b"other");
        let expected = ContentHash::compute(b"stowage");
        assert!(hasher.verify(&expected).is_err());
    }

    #[test]
    fn test_serde_as_hex_string() {
        let hash = ContentHash::compute(b"stowage");
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{}\"", hash.to_hex()));
        let back: ContentHash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hash);
    }
}
