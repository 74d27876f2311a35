//! One-way masking of personally identifiable fields

use sha2::{Digest, Sha256};

/// Length of a masked value: a SHA-256 digest rendered as hex.
pub const MASKED_LEN: usize = 64;

/// Mask a sensitive value with SHA-256, rendered as lowercase hex.
///
/// Total over all inputs; the empty string maps to the digest of the empty string.
pub fn mask(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())
}

/// Returns true if `value` looks like the output of [`mask`].
pub fn is_masked(value: &str) -> bool {
    value.len() == MASKED_LEN && value.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
