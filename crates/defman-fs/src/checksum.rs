//! SHA-256 checksum utilities
//!
//! Every content hash in defman uses the canonical `sha256:<hex>` form so
//! hashes recorded at scan time compare directly with hashes of deployed files.

use sha2::{Digest, Sha256};

/// Prefix for all checksums produced by this module
const PREFIX: &str = "sha256:";

/// Compute the SHA-256 checksum of raw bytes.
pub fn compute_checksum(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{}{:x}", PREFIX, hasher.finalize())
}
