//! Artifact signature verification.
//!
//! Detached ed25519 signatures over the raw module bytes, checked against
//! a configured table of trusted signers. Verification yields the signer
//! name, which feeds the decision service.

use ed25519_dalek::{Signature as DalekSignature, Verifier, VerifyingKey};
use std::collections::BTreeMap;
use warden_core::{WardenError, WardenResult};

/// Trusted signer table: name → verifying key
#[derive(Debug, Clone, Default)]
pub struct TrustedKeys {
    keys: BTreeMap<String, VerifyingKey>,
}

impl TrustedKeys {
    /// Build from configured hex-encoded public keys.
    ///
    /// Unparseable entries are skipped with a warning rather than taking
    /// the policy engine down at startup.
    #[must_use]
    pub fn from_hex_table(table: &BTreeMap<String, String>) -> Self {
        let mut keys = BTreeMap::new();
        for (name, hex_key) in table {
            match parse_hex_key(hex_key) {
                Some(key) => {
                    keys.insert(name.clone(), key);
                }
                None => {
                    tracing::warn!(signer = %name, "skipping unparseable trusted key");
                }
            }
        }
        Self { keys }
    }

    /// Number of usable keys
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether no keys are configured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Verify a detached signature over `message`, returning the name of
    /// the first trusted signer whose key validates it.
    ///
    /// # Errors
    ///
    /// Returns a hard artifact deny when the signature is malformed or no
    /// trusted key validates it
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> WardenResult<String> {
        let sig_bytes: [u8; 64] = decode_signature(signature).ok_or_else(|| {
            WardenError::Artifact {
                reason: "signature_invalid".to_string(),
            }
        })?;
        let sig = DalekSignature::from_bytes(&sig_bytes);
        for (name, key) in &self.keys {
            if key.verify(message, &sig).is_ok() {
                return Ok(name.clone());
            }
        }
        Err(WardenError::Artifact {
            reason: "signature_untrusted".to_string(),
        })
    }
}

fn parse_hex_key(hex_key: &str) -> Option<VerifyingKey> {
    let bytes = hex::decode(hex_key.trim()).ok()?;
    let arr: [u8; 32] = bytes.try_into().ok()?;
    VerifyingKey::from_bytes(&arr).ok()
}

/// Accept raw 64-byte signatures or their hex encoding (sidecar files are
/// commonly hex).
fn decode_signature(raw: &[u8]) -> Option<[u8; 64]> {
    if raw.len() == 64 {
        return raw.try_into().ok();
    }
    let text = std::str::from_utf8(raw).ok()?;
    let bytes = hex::decode(text.trim()).ok()?;
    bytes.try_into().ok()
}
