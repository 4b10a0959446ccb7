//! Content locators for module artifacts.

use serde::{Deserialize, Serialize};
use warden_core::{WardenError, WardenResult};

/// Where the module bytes come from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocatorSource {
    /// Direct HTTP(S) URL
    Url(String),
    /// Local file path (tests, air-gapped deploys)
    File(String),
    /// Content id resolved via content node then mirror
    Cid(String),
}

/// A parsed module locator with its expected checksum
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleLocator {
    /// Byte source
    pub source: LocatorSource,
    /// Expected SHA-256 of the bytes, lowercase hex
    pub checksum: String,
    /// Optional detached-signature location
    pub signature_url: Option<String>,
}

impl ModuleLocator {
    /// Parse a locator string and pair it with the expected checksum.
    ///
    /// Accepted forms: `https://…`, `http://…`, `file:///…`,
    /// `ipfs://<cid>`, `cid:<cid>`.
    ///
    /// # Errors
    ///
    /// Returns a validation error for empty or unrecognized locators and
    /// for checksums that are not 64 hex characters
    pub fn parse(
        locator: &str,
        checksum: &str,
        signature_url: Option<String>,
    ) -> WardenResult<Self> {
        let checksum = checksum.trim().to_lowercase();
        if checksum.len() != 64 || !checksum.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(WardenError::Validation {
                field: "checksum".to_string(),
                reason: "expected 64 hex characters".to_string(),
            });
        }

        let locator = locator.trim();
        let source = if let Some(path) = locator.strip_prefix("file://") {
            if path.is_empty() {
                return Err(bad_locator("empty file path"));
            }
            LocatorSource::File(path.to_string())
        } else if locator.starts_with("http://") || locator.starts_with("https://") {
            // validate eagerly so a bad URL denies before any network call
            url::Url::parse(locator).map_err(|_| bad_locator("unparseable url"))?;
            LocatorSource::Url(locator.to_string())
        } else if let Some(cid) = locator.strip_prefix("ipfs://") {
            LocatorSource::Cid(cid.to_string())
        } else if let Some(cid) = locator.strip_prefix("cid:") {
            LocatorSource::Cid(cid.to_string())
        } else {
            return Err(bad_locator("unrecognized scheme"));
        };

        Ok(Self {
            source,
            checksum,
            signature_url,
        })
    }
}

fn bad_locator(reason: &str) -> WardenError {
    WardenError::Validation {
        field: "locator".to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUM: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    #[test]
    fn test_parse_url() {
        let loc = ModuleLocator::parse("https://mirror.example/m.wasm", SUM, None).unwrap();
        assert!(matches!(loc.source, LocatorSource::Url(_)));
    }

    #[test]
    fn test_parse_file() {
        let loc = ModuleLocator::parse("file:///tmp/m.wasm", SUM, None).unwrap();
        assert_eq!(loc.source, LocatorSource::File("/tmp/m.wasm".to_string()));
    }

    #[test]
    fn test_parse_cid_forms() {
        let a = ModuleLocator::parse("ipfs://bafyfoo", SUM, None).unwrap();
        let b = ModuleLocator::parse("cid:bafyfoo", SUM, None).unwrap();
        assert_eq!(a.source, LocatorSource::Cid("bafyfoo".to_string()));
        assert_eq!(a.source, b.source);
    }

    #[test]
    fn test_checksum_normalized() {
        let upper = SUM.to_uppercase();
        let loc = ModuleLocator::parse("file:///m.wasm", &upper, None).unwrap();
        assert_eq!(loc.checksum, SUM);
    }

    #[test]
    fn test_bad_checksum_rejected() {
        assert!(ModuleLocator::parse("file:///m.wasm", "abc", None).is_err());
        assert!(ModuleLocator::parse("file:///m.wasm", &"zz".repeat(32), None).is_err());
    }

    #[test]
    fn test_unknown_scheme_rejected() {
        assert!(ModuleLocator::parse("ftp://host/m.wasm", SUM, None).is_err());
        assert!(ModuleLocator::parse("", SUM, None).is_err());
    }
}
