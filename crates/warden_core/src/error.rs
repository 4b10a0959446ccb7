//! Error taxonomy for the execution sandbox.
//!
//! Every failure a caller can observe maps onto one of seven kinds. The
//! user-visible surface is always `kind` + a stable reason string; internal
//! detail (paths, transport errors, stack traces) stays in logs.

use serde::{Deserialize, Serialize};

/// Warden result type
pub type WardenResult<T> = Result<T, WardenError>;

/// Stable taxonomy tag carried on every user-visible error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed request; no run was created
    Validation,
    /// Policy denied; run created but never executed
    PolicyDenied,
    /// Artifact fetch/checksum/signature failure; never executed
    Artifact,
    /// A resource budget was exceeded; partial execution then terminated
    ResourceViolation,
    /// The sandbox faulted
    Runtime,
    /// A syscall was denied; surfaced to the module, non-fatal to the run
    GatewayDenied,
    /// A collaborator (event sink, decision service) was unreachable
    Transient,
}

impl ErrorKind {
    /// Stable label used in metrics and wire responses
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::PolicyDenied => "policy_denied",
            Self::Artifact => "artifact",
            Self::ResourceViolation => "resource_violation",
            Self::Runtime => "runtime",
            Self::GatewayDenied => "gateway_denied",
            Self::Transient => "transient",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Warden error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WardenError {
    /// Malformed request
    #[error("validation failed for {field}: {reason}")]
    Validation {
        /// Offending field
        field: String,
        /// What was wrong with it
        reason: String,
    },

    /// Policy denied the run
    #[error("policy denied: {reason}")]
    PolicyDenied {
        /// Stable deny reason (e.g. `module_allowlist`, `signature`)
        reason: String,
    },

    /// Artifact could not be fetched or verified
    #[error("artifact error: {reason}")]
    Artifact {
        /// Stable failure reason (e.g. `checksum_mismatch`, `not_found`)
        reason: String,
    },

    /// A resource budget was exceeded
    #[error("resource violation: {resource} exceeded")]
    ResourceViolation {
        /// Which budget was exhausted (`fuel`, `memory`, `wall_clock`)
        resource: String,
    },

    /// The sandbox faulted
    #[error("runtime error: {reason}")]
    Runtime {
        /// Stable fault reason (e.g. `bad_entry`, `trap`)
        reason: String,
    },

    /// A syscall was denied by the gateway
    #[error("gateway denied {kind}: {reason}")]
    GatewayDenied {
        /// Syscall kind (`emit`, `http.fetch`, `kv.get`, `kv.set`)
        kind: String,
        /// Stable deny reason (e.g. `capability`, `rate_limited`)
        reason: String,
    },

    /// A collaborator was unreachable
    #[error("transient failure talking to {collaborator}")]
    Transient {
        /// Which collaborator failed
        collaborator: String,
    },
}

impl WardenError {
    /// Taxonomy tag for this error
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::PolicyDenied { .. } => ErrorKind::PolicyDenied,
            Self::Artifact { .. } => ErrorKind::Artifact,
            Self::ResourceViolation { .. } => ErrorKind::ResourceViolation,
            Self::Runtime { .. } => ErrorKind::Runtime,
            Self::GatewayDenied { .. } => ErrorKind::GatewayDenied,
            Self::Transient { .. } => ErrorKind::Transient,
        }
    }

    /// Sanitized reason string safe to return to callers.
    ///
    /// Never contains paths, addresses, or transport detail.
    #[must_use]
    pub fn public_reason(&self) -> String {
        match self {
            Self::Validation { field, .. } => format!("invalid {field}"),
            Self::PolicyDenied { reason } => reason.clone(),
            Self::Artifact { reason } => reason.clone(),
            Self::ResourceViolation { resource } => format!("{resource}_exceeded"),
            Self::Runtime { reason } => reason.clone(),
            Self::GatewayDenied { reason, .. } => reason.clone(),
            Self::Transient { collaborator } => format!("{collaborator}_unavailable"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        let err = WardenError::PolicyDenied {
            reason: "module_allowlist".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::PolicyDenied);
        assert_eq!(err.kind().label(), "policy_denied");
    }

    #[test]
    fn test_display() {
        let err = WardenError::ResourceViolation {
            resource: "fuel".to_string(),
        };
        assert_eq!(err.to_string(), "resource violation: fuel exceeded");
    }

    #[test]
    fn test_public_reason_sanitized() {
        let err = WardenError::Validation {
            field: "entry".to_string(),
            reason: "/internal/path/leaked".to_string(),
        };
        let public = err.public_reason();
        assert!(!public.contains("/internal"));
        assert_eq!(public, "invalid entry");
    }

    #[test]
    fn test_transient_public_reason() {
        let err = WardenError::Transient {
            collaborator: "decision_service".to_string(),
        };
        assert_eq!(err.public_reason(), "decision_service_unavailable");
    }

    #[test]
    fn test_kind_serde_snake_case() {
        let json = serde_json::to_string(&ErrorKind::ResourceViolation).unwrap();
        assert_eq!(json, "\"resource_violation\"");
    }
}
