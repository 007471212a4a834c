//! Content hashing helpers
//!
//! SHA-256 over file bytes, hex-encoded. The digest only needs to be
//! collision-safe for change detection, but a full-strength hash costs
//! little here.

use sha2::{Digest, Sha256};

use starsync_core::domain::ContentHash;

/// Digests a byte slice in one call
pub fn digest_bytes(bytes: &[u8]) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    finalize(hasher)
}

/// Incremental digest for streamed content
#[derive(Default)]
pub struct StreamingDigest {
    hasher: Sha256,
}

impl StreamingDigest {
    /// Creates an empty digest
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds more bytes into the digest
    pub fn update(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Consumes the digest and returns the hex-encoded hash
    pub fn finish(self) -> ContentHash {
        finalize(self.hasher)
    }
}

fn finalize(hasher: Sha256) -> ContentHash {
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    ContentHash::new(hex).expect("sha256 hex digest is always valid")
}
