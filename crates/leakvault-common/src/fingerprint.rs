//! Content addressing for ingestion units and composite keys
//!
//! The file registry only enforces uniqueness of whatever string it is given;
//! which strategy produced that string is decided here.

use crate::error::{IngestError, Result};
use sha2::{Digest, Sha256};

/// Separator placed between fields before hashing a composite key.
const FIELD_SEPARATOR: u8 = 0x1f;

/// Strategy used to derive the fingerprint of an ingestion unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FingerprintSource<'a> {
    /// Pull path: hash over the file name followed by its decimal size
    NameAndSize { name: &'a str, size: u64 },
    /// Push path: hash supplied by the collecting agent
    Supplied(&'a str),
}

impl FingerprintSource<'_> {
    /// Compute the fingerprint string stored in the registry.
    pub fn compute(&self) -> Result<String> {
        match self {
            FingerprintSource::NameAndSize { name, size } => {
                Ok(name_size_fingerprint(name, *size))
            }
            FingerprintSource::Supplied(raw) => supplied_fingerprint(raw),
        }
    }
}

/// SHA-256 hex over `name || size`.
pub fn name_size_fingerprint(name: &str, size: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update(size.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Normalise a caller-supplied hash. Empty values are malformed.
pub fn supplied_fingerprint(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(IngestError::MalformedInput(
            "fingerprint hash must not be empty".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}

/// Digest of a composite key. Fields are trimmed and joined by a unit
/// separator so that `("a:b", "c")` and `("a", "b:c")` never collide.
pub fn composite_digest(fields: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (index, field) in fields.iter().enumerate() {
        if index > 0 {
            hasher.update([FIELD_SEPARATOR]);
        }
        hasher.update(field.trim().as_bytes());
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_name_size_fingerprint_is_stable() {
        let a = name_size_fingerprint("combo.txt", 1024);
        let b = name_size_fingerprint("combo.txt", 1024);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, name_size_fingerprint("combo.txt", 1025));
        assert_ne!(a, name_size_fingerprint("combo2.txt", 1024));
    }

    #[test]
    fn test_name_size_matches_plain_sha256() {
        // "ab" followed by size 12 hashes the bytes "ab12"
        let expected = hex::encode(Sha256::digest(b"ab12"));
        assert_eq!(name_size_fingerprint("ab", 12), expected);
    }

    #[test]
    fn test_supplied_fingerprint_trims_and_rejects_empty() {
        assert_eq!(supplied_fingerprint("  abc  ").unwrap(), "abc");
        assert!(matches!(
            supplied_fingerprint("   "),
            Err(IngestError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_source_dispatch() {
        let pulled = FingerprintSource::NameAndSize {
            name: "dump.txt",
            size: 10,
        };
        assert_eq!(pulled.compute().unwrap(), name_size_fingerprint("dump.txt", 10));

        let pushed = FingerprintSource::Supplied("deadbeef");
        assert_eq!(pushed.compute().unwrap(), "deadbeef");
    }

    #[test]
    fn test_composite_digest_field_boundaries() {
        assert_ne!(composite_digest(&["a:b", "c"]), composite_digest(&["a", "b:c"]));
        assert_eq!(
            composite_digest(&[" https://x.y ", "alice", "pw "]),
            composite_digest(&["https://x.y", "alice", "pw"])
        );
        assert_ne!(
            composite_digest(&["https://x.y", "Alice", "pw"]),
            composite_digest(&["https://x.y", "alice", "pw"])
        );
    }
}
