//! Verified module artifacts.

use crate::locator::ModuleLocator;
use sha2::{Digest, Sha256};
use warden_core::{WardenError, WardenResult};

/// A fetched, checksum-verified module.
///
/// Immutable once built; the cache retains the backing file indefinitely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleArtifact {
    /// The locator this artifact satisfies
    pub locator: ModuleLocator,
    /// Module bytes
    pub bytes: Vec<u8>,
    /// Verified length in bytes
    pub length: usize,
    /// Cache file backing this artifact, when one was written
    pub cache_path: Option<std::path::PathBuf>,
    /// Detached signature bytes, when the locator carried one
    pub signature: Option<Vec<u8>>,
}

impl ModuleArtifact {
    /// Build an artifact after checking the bytes against the locator's
    /// expected checksum.
    ///
    /// # Errors
    ///
    /// Returns `checksum_mismatch` if the digest differs
    pub fn verified(locator: ModuleLocator, bytes: Vec<u8>) -> WardenResult<Self> {
        let actual = sha256_hex(&bytes);
        if actual != locator.checksum {
            return Err(WardenError::Artifact {
                reason: "checksum_mismatch".to_string(),
            });
        }
        let length = bytes.len();
        Ok(Self {
            locator,
            bytes,
            length,
            cache_path: None,
            signature: None,
        })
    }

    /// Attach the cache file path
    #[must_use]
    pub fn with_cache_path(mut self, path: std::path::PathBuf) -> Self {
        self.cache_path = Some(path);
        self
    }

    /// Attach detached signature bytes
    #[must_use]
    pub fn with_signature(mut self, signature: Vec<u8>) -> Self {
        self.signature = Some(signature);
        self
    }
}

/// SHA-256 digest as lowercase hex
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locator_for(bytes: &[u8]) -> ModuleLocator {
        ModuleLocator::parse("file:///m.wasm", &sha256_hex(bytes), None).unwrap()
    }

    #[test]
    fn test_verified_accepts_matching_bytes() {
        let bytes = b"\0asm\x01\0\0\0".to_vec();
        let artifact = ModuleArtifact::verified(locator_for(&bytes), bytes.clone()).unwrap();
        assert_eq!(artifact.length, bytes.len());
        assert!(artifact.cache_path.is_none());
    }

    #[test]
    fn test_verified_rejects_tampered_bytes() {
        let bytes = b"\0asm\x01\0\0\0".to_vec();
        let locator = locator_for(&bytes);
        let mut tampered = bytes;
        tampered.push(0xFF);
        let err = ModuleArtifact::verified(locator, tampered).unwrap_err();
        assert_eq!(err.public_reason(), "checksum_mismatch");
    }

    #[test]
    fn test_sha256_hex_stable() {
        // known digest of the empty input
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
