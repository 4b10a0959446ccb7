//! Run state tracked end-to-end for one execution request.

use crate::error::ErrorKind;
use crate::id::RunId;
use crate::limits::{LimitHints, Usage};
use crate::time::Timestamp;
use serde::{Deserialize, Serialize};

/// A request to execute a module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    /// Content locator for the module bytes (url, file, or cid form)
    pub locator: String,
    /// Expected SHA-256 checksum of the module bytes, hex-encoded
    pub checksum: String,
    /// Logical module name checked against the allowlist
    pub module: String,
    /// Entry-point export to invoke
    #[serde(default = "default_entry")]
    pub entry: String,
    /// Arguments handed to the module on its input channel
    #[serde(default)]
    pub args: Vec<serde_json::Value>,
    /// Requested capabilities (names)
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Labels attached by the caller (e.g. `test`, `critical`, `approved`)
    #[serde(default)]
    pub labels: Vec<String>,
    /// Explicit idempotency key; computed from the request when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    /// Caller identity used in the computed idempotency key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller: Option<String>,
    /// Optional limit hints; may only tighten configured defaults
    #[serde(default)]
    pub limits: LimitHints,
    /// Optional URL of a detached signature over the module bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_url: Option<String>,
}

fn default_entry() -> String {
    "_start".to_string()
}

/// How the run is (or was) admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Canary-admitted full execution
    Live,
    /// Canary miss: accepted, policy-checked, never instantiated
    DryRun,
    /// Emergency freeze: accepted, never executed
    Frozen,
    /// Served from the idempotency cache
    Cached,
}

impl RunMode {
    /// Stable wire label
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::DryRun => "dry-run",
            Self::Frozen => "frozen",
            Self::Cached => "cached",
        }
    }
}

/// Lifecycle status; transitions are monotonic and never reverse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Request validated and recorded
    Accepted,
    /// Sandbox executing
    Running,
    /// Terminal: completed with a result
    Finished,
    /// Terminal: failed
    Error,
}

impl RunStatus {
    const fn rank(self) -> u8 {
        match self {
            Self::Accepted => 0,
            Self::Running => 1,
            Self::Finished => 2,
            Self::Error => 2,
        }
    }

    /// Whether this status is terminal
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Error)
    }
}

/// Sanitized error surfaced on a failed run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunError {
    /// Taxonomy tag
    pub kind: ErrorKind,
    /// Stable reason string
    pub reason: String,
}

/// Everything tracked for one run.
///
/// Created at acceptance, mutated only by the runtime path, frozen at a
/// terminal status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    /// Run identifier
    pub run_id: RunId,
    /// The originating request
    pub request: RunRequest,
    /// Admission mode
    pub mode: RunMode,
    /// Lifecycle status
    pub status: RunStatus,
    /// Measured usage; empty until execution starts
    pub usage: Usage,
    /// Module result from the terminal `return` marker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Sanitized error, when terminal status is `error`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RunError>,
    /// Acceptance timestamp
    pub created_at: Timestamp,
    /// Execution start, when a sandbox was instantiated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<Timestamp>,
    /// Terminal timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<Timestamp>,
}

impl RunState {
    /// Create a freshly-accepted run
    #[must_use]
    pub fn accepted(run_id: RunId, request: RunRequest, mode: RunMode) -> Self {
        Self {
            run_id,
            request,
            mode,
            status: RunStatus::Accepted,
            usage: Usage::empty(),
            result: None,
            error: None,
            created_at: Timestamp::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Advance the status. Transitions only move forward; once terminal,
    /// the state is frozen and further transitions are rejected.
    ///
    /// # Errors
    ///
    /// Returns the rejected transition as `(from, to)`
    pub fn advance(&mut self, to: RunStatus) -> Result<(), (RunStatus, RunStatus)> {
        if self.status.is_terminal() || to.rank() <= self.status.rank() {
            return Err((self.status, to));
        }
        if to == RunStatus::Running {
            self.started_at = Some(Timestamp::now());
        }
        if to.is_terminal() {
            self.finished_at = Some(Timestamp::now());
        }
        self.status = to;
        Ok(())
    }

    /// Mark finished with an optional result value
    ///
    /// # Errors
    ///
    /// Returns the rejected transition if the run is already terminal
    pub fn finish(
        &mut self,
        result: Option<serde_json::Value>,
        usage: Usage,
    ) -> Result<(), (RunStatus, RunStatus)> {
        self.advance(RunStatus::Finished)?;
        self.result = result;
        self.usage = usage;
        Ok(())
    }

    /// Mark errored with a sanitized reason
    ///
    /// # Errors
    ///
    /// Returns the rejected transition if the run is already terminal
    pub fn fail(
        &mut self,
        kind: ErrorKind,
        reason: String,
        usage: Usage,
    ) -> Result<(), (RunStatus, RunStatus)> {
        self.advance(RunStatus::Error)?;
        self.error = Some(RunError { kind, reason });
        self.usage = usage;
        Ok(())
    }
}
