//! Content digests: BLAKE3 keys identifying cached payloads.

use serde::{Deserialize, Serialize};

/// A 32-byte BLAKE3 hash identifying a payload's content. Used as the cache key.
///
/// Digests order lexicographically so eviction queues can use them as a
/// final tiebreak component.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ContentDigest(pub [u8; 32]);

impl ContentDigest {
    /// Return the digest as a lowercase hex string
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
    /// Return the raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Compute the BLAKE3 digest of a payload
pub fn digest_of(data: &[u8]) -> ContentDigest {
    let hash = blake3::hash(data);
    ContentDigest(*hash.as_bytes())
}
