//! Capability types for capability-based syscall gating.
//!
//! A capability is a coarse-grained permission a module must request up
//! front and that the configured grants must cover. The fine-grained
//! constraints (host allowlists, namespace lists, quotas) live on the
//! grants, not the capability names.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;

/// A coarse-grained permission grantable to a module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    /// Emit events to the bus
    Emit,
    /// Outbound HTTP fetch through the gateway
    Http,
    /// Namespaced scratch key-value access
    Kv,
}

impl Capability {
    /// Stable lowercase name used on the wire and in metric labels
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Emit => "emit",
            Self::Http => "http",
            Self::Kv => "kv",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "emit" => Ok(Self::Emit),
            "http" => Ok(Self::Http),
            "kv" => Ok(Self::Kv),
            other => Err(format!("unknown capability: {other}")),
        }
    }
}

/// A set of capabilities granted to a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet {
    capabilities: BTreeSet<Capability>,
}

impl CapabilitySet {
    /// Create a new empty capability set
    #[must_use]
    pub fn new() -> Self {
        Self {
            capabilities: BTreeSet::new(),
        }
    }

    /// Create from a list of capability names, rejecting unknown names
    ///
    /// # Errors
    ///
    /// Returns the first unknown name
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, String> {
        let mut set = Self::new();
        for name in names {
            set.grant(name.as_ref().parse()?);
        }
        Ok(set)
    }

    /// Grant a capability
    pub fn grant(&mut self, capability: Capability) {
        self.capabilities.insert(capability);
    }

    /// Check if a capability is granted
    #[must_use]
    pub fn has(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// Check that every capability in this set is also in `other`
    #[must_use]
    pub fn is_subset(&self, other: &CapabilitySet) -> bool {
        self.capabilities.is_subset(&other.capabilities)
    }

    /// Get the number of capabilities
    #[must_use]
    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    /// Iterate over capabilities
    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.capabilities.iter()
    }
}

/// Fine-grained constraints attached to the capability grants
///
/// One instance is configured per deployment and shared by the policy
/// engine (upfront checks) and the gateway (per-syscall checks).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityGrants {
    /// Capabilities the deployment is willing to grant at all
    pub granted: CapabilitySet,
    /// HTTP host allowlist: exact hosts or `*.domain` suffix patterns
    pub http_hosts: Vec<String>,
    /// KV namespaces modules may touch
    pub kv_namespaces: Vec<String>,
    /// Maximum keys per KV namespace
    pub kv_max_keys: usize,
    /// Maximum serialized value size in bytes
    pub kv_max_value_bytes: usize,
}

impl CapabilityGrants {
    /// Check whether an HTTP host is covered by the allowlist
    #[must_use]
    pub fn http_host_allowed(&self, host: &str) -> bool {
        matches_host(&self.http_hosts, host)
    }

    /// Check whether a KV namespace is in the configured list
    #[must_use]
    pub fn kv_namespace_allowed(&self, namespace: &str) -> bool {
        self.kv_namespaces.iter().any(|n| n == namespace)
    }
}

impl Default for CapabilityGrants {
    fn default() -> Self {
        let mut granted = CapabilitySet::new();
        granted.grant(Capability::Emit);
        Self {
            granted,
            http_hosts: Vec::new(),
            kv_namespaces: Vec::new(),
            kv_max_keys: 256,
            kv_max_value_bytes: 16 * 1024,
        }
    }
}

/// Check if a hostname matches an allowlist entry.
///
/// Entries are exact hostnames or `*.domain` suffix patterns; a suffix
/// pattern also matches the bare domain itself.
#[must_use]
pub fn matches_host(allowlist: &[String], host: &str) -> bool {
    allowlist.iter().any(|pattern| {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return false;
        }
        if let Some(suffix) = pattern.strip_prefix("*.") {
            return host == suffix || host.ends_with(&format!(".{suffix}"));
        }
        pattern == host
    })
}

/// Check if a module name matches an allowlist entry.
///
/// Entries are exact names or `prefix*` wildcard patterns.
#[must_use]
pub fn matches_module(allowlist: &[String], module: &str) -> bool {
    allowlist.iter().any(|pattern| {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return false;
        }
        if let Some(prefix) = pattern.strip_suffix('*') {
            return module.starts_with(prefix);
        }
        pattern == module
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_from_str() {
        assert_eq!("emit".parse::<Capability>().unwrap(), Capability::Emit);
        assert_eq!("http".parse::<Capability>().unwrap(), Capability::Http);
        assert_eq!("kv".parse::<Capability>().unwrap(), Capability::Kv);
        assert!("disk".parse::<Capability>().is_err());
    }

    #[test]
    fn test_capability_set_grant_and_has() {
        let mut caps = CapabilitySet::new();
        assert!(caps.is_empty());
        caps.grant(Capability::Emit);
        assert!(caps.has(Capability::Emit));
        assert!(!caps.has(Capability::Http));
        assert_eq!(caps.len(), 1);
    }

    #[test]
    fn test_capability_set_from_names() {
        let caps = CapabilitySet::from_names(&["emit", "kv"]).unwrap();
        assert!(caps.has(Capability::Emit));
        assert!(caps.has(Capability::Kv));
        assert!(CapabilitySet::from_names(&["emit", "nope"]).is_err());
    }

    #[test]
    fn test_capability_subset() {
        let requested = CapabilitySet::from_names(&["emit"]).unwrap();
        let granted = CapabilitySet::from_names(&["emit", "http"]).unwrap();
        assert!(requested.is_subset(&granted));
        assert!(!granted.is_subset(&requested));
    }

    #[test]
    fn test_matches_host_exact() {
        let allow = vec!["api.example.com".to_string()];
        assert!(matches_host(&allow, "api.example.com"));
        assert!(!matches_host(&allow, "example.com"));
        assert!(!matches_host(&allow, "evil-api.example.com.attacker.io"));
    }

    #[test]
    fn test_matches_host_suffix_wildcard() {
        let allow = vec!["*.example.com".to_string()];
        assert!(matches_host(&allow, "example.com"));
        assert!(matches_host(&allow, "api.example.com"));
        assert!(matches_host(&allow, "deep.api.example.com"));
        assert!(!matches_host(&allow, "badexample.com"));
    }

    #[test]
    fn test_matches_host_empty_entry_ignored() {
        let allow = vec![String::new(), "  ".to_string()];
        assert!(!matches_host(&allow, "example.com"));
    }

    #[test]
    fn test_matches_module_exact_and_prefix() {
        let allow = vec!["wasm/ci/*".to_string(), "wasm/pulse/beat".to_string()];
        assert!(matches_module(&allow, "wasm/ci/lint"));
        assert!(matches_module(&allow, "wasm/pulse/beat"));
        assert!(!matches_module(&allow, "wasm/pulse/other"));
        assert!(!matches_module(&allow, "wasm/other"));
    }

    #[test]
    fn test_grants_default_emit_only() {
        let grants = CapabilityGrants::default();
        assert!(grants.granted.has(Capability::Emit));
        assert!(!grants.granted.has(Capability::Http));
        assert!(!grants.http_host_allowed("example.com"));
    }

    #[test]
    fn test_grants_namespace_membership() {
        let grants = CapabilityGrants {
            kv_namespaces: vec!["scratch".to_string()],
            ..CapabilityGrants::default()
        };
        assert!(grants.kv_namespace_allowed("scratch"));
        assert!(!grants.kv_namespace_allowed("secrets"));
    }

    #[test]
    fn test_capability_serde_lowercase() {
        let json = serde_json::to_string(&Capability::Http).unwrap();
        assert_eq!(json, "\"http\"");
    }
}
