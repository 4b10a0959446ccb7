//! Deployment configuration.
//!
//! Loaded from a TOML file; every section and field has a default so a
//! partial file (or none at all) yields a working, locked-down instance.

use crate::capability::{CapabilityGrants, CapabilitySet};
use crate::limits::ResourceLimits;
use serde::{Deserialize, Serialize};

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    /// Master enable switch; a disabled instance rejects all submissions
    pub enabled: bool,
    /// Emergency freeze: accept requests but never execute them
    pub frozen: bool,
    /// Canary fraction in `0..=1`; 0 means always dry-run, 1 always live
    pub canary_fraction: f64,
    /// Environment label used by label rules (e.g. `production`)
    pub environment: String,
    /// Module allowlist: exact names or `prefix*` patterns
    pub allow_modules: Vec<String>,
    /// Capability names the deployment grants
    pub allow_caps: Vec<String>,
    /// Default resource limits; requests may only tighten these
    pub limits: ResourceLimits,
    /// Gateway section
    pub gateway: GatewayConfig,
    /// Fetcher section
    pub fetch: FetchConfig,
    /// Policy section
    pub policy: PolicyConfig,
    /// Ingress section
    pub ingress: IngressConfig,
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            frozen: false,
            canary_fraction: 1.0,
            environment: "development".to_string(),
            allow_modules: Vec::new(),
            allow_caps: vec!["emit".to_string()],
            limits: ResourceLimits::default(),
            gateway: GatewayConfig::default(),
            fetch: FetchConfig::default(),
            policy: PolicyConfig::default(),
            ingress: IngressConfig::default(),
        }
    }
}

impl WardenConfig {
    /// Parse from TOML text
    ///
    /// # Errors
    ///
    /// Returns error if the TOML is malformed
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Capability set granted by this deployment
    ///
    /// Unknown capability names are ignored rather than granted.
    #[must_use]
    pub fn granted_capabilities(&self) -> CapabilitySet {
        let mut set = CapabilitySet::new();
        for name in &self.allow_caps {
            if let Ok(cap) = name.parse() {
                set.grant(cap);
            }
        }
        set
    }

    /// Build the grant table shared by policy and gateway
    #[must_use]
    pub fn capability_grants(&self) -> CapabilityGrants {
        CapabilityGrants {
            granted: self.granted_capabilities(),
            http_hosts: self.gateway.http_hosts.clone(),
            kv_namespaces: self.gateway.kv_namespaces.clone(),
            kv_max_keys: self.gateway.kv_max_keys,
            kv_max_value_bytes: self.gateway.kv_max_value_bytes,
        }
    }
}

/// Syscall gateway configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// HTTP host allowlist: exact hosts or `*.domain` suffix patterns
    pub http_hosts: Vec<String>,
    /// Token bucket refill rate, requests per second
    pub http_rps: u32,
    /// Token bucket burst size
    pub http_burst: u32,
    /// Response-body read cap in KiB; excess is discarded
    pub http_max_kb: u64,
    /// Per-syscall HTTP timeout in milliseconds
    pub http_timeout_ms: u64,
    /// KV namespaces modules may touch
    pub kv_namespaces: Vec<String>,
    /// Maximum keys per namespace
    pub kv_max_keys: usize,
    /// Maximum serialized value size in bytes
    pub kv_max_value_bytes: usize,
    /// Event bus endpoint the emit syscall forwards to, when set
    pub bus_url: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            http_hosts: Vec::new(),
            http_rps: 5,
            http_burst: 5,
            http_max_kb: 64,
            http_timeout_ms: 2_000,
            kv_namespaces: Vec::new(),
            kv_max_keys: 256,
            kv_max_value_bytes: 16 * 1024,
            bus_url: None,
        }
    }
}

/// Artifact fetcher configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Artifact cache directory
    pub cache_dir: String,
    /// Local content node base URL, tried before the mirror
    pub content_node: Option<String>,
    /// HTTP mirror base URL, the last fallback for cid locators
    pub mirror: String,
    /// Per-attempt fetch timeout in milliseconds
    pub timeout_ms: u64,
    /// Retries per fetch step
    pub retries: u32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            cache_dir: "/tmp/warden/module-cache".to_string(),
            content_node: None,
            mirror: "https://ipfs.io".to_string(),
            timeout_ms: 5_000,
            retries: 1,
        }
    }
}

/// Policy engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Require a valid artifact signature before execution
    pub verify_signatures: bool,
    /// Trusted signers: name → hex-encoded ed25519 public key
    pub trusted_keys: std::collections::BTreeMap<String, String>,
    /// External decision service URL; absent means the stage is skipped
    pub decision_service: Option<String>,
    /// Decision service timeout in milliseconds
    pub decision_timeout_ms: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            verify_signatures: false,
            trusted_keys: std::collections::BTreeMap::new(),
            decision_service: None,
            decision_timeout_ms: 1_000,
        }
    }
}

/// Ingress configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngressConfig {
    /// Maximum concurrently-executing runs
    pub max_concurrent: usize,
    /// Bounded wait-queue depth beyond `max_concurrent`
    pub queue_depth: usize,
    /// Idempotency cache TTL in seconds
    pub idempotency_ttl_secs: u64,
    /// Terminal run retention in seconds
    pub run_ttl_secs: u64,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            queue_depth: 16,
            idempotency_ttl_secs: 300,
            run_ttl_secs: 3_600,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::Capability;

    #[test]
    fn test_default_is_locked_down() {
        let config = WardenConfig::default();
        assert!(config.enabled);
        assert!(!config.frozen);
        assert!(config.allow_modules.is_empty());
        assert!(config.gateway.http_hosts.is_empty());
        let caps = config.granted_capabilities();
        assert!(caps.has(Capability::Emit));
        assert!(!caps.has(Capability::Http));
    }

    #[test]
    fn test_empty_toml_gives_defaults() {
        let config = WardenConfig::from_toml_str("").unwrap();
        assert_eq!(config, WardenConfig::default());
    }

    #[test]
    fn test_partial_toml_overrides() {
        let text = r#"
            canary_fraction = 0.25
            allow_modules = ["wasm/ci/*"]

            [gateway]
            http_hosts = ["*.example.com"]
            http_burst = 2

            [ingress]
            idempotency_ttl_secs = 60
        "#;
        let config = WardenConfig::from_toml_str(text).unwrap();
        assert_eq!(config.canary_fraction, 0.25);
        assert_eq!(config.allow_modules, vec!["wasm/ci/*".to_string()]);
        assert_eq!(config.gateway.http_burst, 2);
        // untouched sections keep their defaults
        assert_eq!(config.gateway.http_rps, 5);
        assert_eq!(config.ingress.idempotency_ttl_secs, 60);
        assert_eq!(config.ingress.max_concurrent, 4);
    }

    #[test]
    fn test_unknown_caps_not_granted() {
        let config = WardenConfig {
            allow_caps: vec!["emit".to_string(), "filesystem".to_string()],
            ..WardenConfig::default()
        };
        let caps = config.granted_capabilities();
        assert_eq!(caps.len(), 1);
    }

    #[test]
    fn test_capability_grants_mirror_gateway_section() {
        let text = r#"
            allow_caps = ["emit", "kv"]

            [gateway]
            kv_namespaces = ["scratch"]
            kv_max_keys = 8
        "#;
        let config = WardenConfig::from_toml_str(text).unwrap();
        let grants = config.capability_grants();
        assert!(grants.granted.has(Capability::Kv));
        assert!(grants.kv_namespace_allowed("scratch"));
        assert_eq!(grants.kv_max_keys, 8);
    }

    #[test]
    fn test_malformed_toml_rejected() {
        assert!(WardenConfig::from_toml_str("enabled = \"maybe").is_err());
    }
}
