//! Shared trait seams.
//!
//! The ingress service, gateway, and runtime are wired together through
//! these traits so tests can inject stubs and no component reaches for a
//! global.

use crate::capability::CapabilitySet;
use crate::error::WardenError;
use crate::limits::{ResourceLimits, Usage};
use crate::run::RunState;
use async_trait::async_trait;

/// Durable event bus boundary.
///
/// Receives both lifecycle events and module-emitted events. Failures are
/// transient: callers log and continue, they never fail a run over the
/// sink.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Forward one event payload
    async fn publish(&self, event: serde_json::Value) -> Result<(), WardenError>;
}

/// One dispatched syscall, recorded for the lifecycle stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyscallRecord {
    /// Syscall kind (`emit`, `http.fetch`, `kv.get`, `kv.set`)
    pub kind: String,
    /// Whether the gateway allowed it
    pub ok: bool,
}

/// Outcome of executing one run to completion or truncation
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExecutionOutcome {
    /// Module result from the terminal `return` marker, if any
    pub result: Option<serde_json::Value>,
    /// Measured usage; always populated, success or failure
    pub usage: Usage,
    /// Syscalls dispatched through the gateway, in order
    pub syscalls: Vec<SyscallRecord>,
    /// Gateway replies, as input-channel lines
    pub replies: Vec<String>,
}

/// The resource-limited runtime boundary invoked by the ingress service.
///
/// Never called for denied, dry-run, or frozen runs; the bytes are
/// already checksum-verified and the capability set and limits come from
/// the policy decision.
#[async_trait]
pub trait RunExecutor: Send + Sync {
    /// Execute a live run
    async fn execute(
        &self,
        state: &RunState,
        module_bytes: &[u8],
        capabilities: &CapabilitySet,
        limits: &ResourceLimits,
    ) -> Result<ExecutionOutcome, ExecutionError>;
}

/// Execution failure paired with whatever usage was measured before it
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionError {
    /// The underlying error
    pub error: WardenError,
    /// Partial usage up to the failure point
    pub usage: Usage,
}

impl ExecutionError {
    /// Failure before any sandbox existed (fetch, verify, bad module)
    #[must_use]
    pub fn before_execution(error: WardenError) -> Self {
        Self {
            error,
            usage: Usage::empty(),
        }
    }

    /// Failure mid-execution with partial usage
    #[must_use]
    pub const fn with_usage(error: WardenError, usage: Usage) -> Self {
        Self { error, usage }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_before_execution_has_empty_usage() {
        let err = ExecutionError::before_execution(WardenError::Artifact {
            reason: "not_found".to_string(),
        });
        assert!(err.usage.is_empty());
        assert_eq!(err.error.kind(), ErrorKind::Artifact);
    }

    #[test]
    fn test_with_usage_preserves_partials() {
        let usage = Usage {
            fuel_used: 42,
            ..Usage::empty()
        };
        let err = ExecutionError::with_usage(
            WardenError::ResourceViolation {
                resource: "fuel".to_string(),
            },
            usage,
        );
        assert_eq!(err.usage.fuel_used, 42);
    }

    #[test]
    fn test_outcome_default_is_empty() {
        let outcome = ExecutionOutcome::default();
        assert!(outcome.result.is_none());
        assert!(outcome.syscalls.is_empty());
        assert!(outcome.usage.is_empty());
    }
}
