//! Warden core types.
//!
//! Shared, mostly-pure types for the execution sandbox: identifiers,
//! capabilities, resource limits, run state, the error taxonomy,
//! configuration, and the in-process metrics registry. No I/O lives here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod capability;
pub mod config;
pub mod error;
pub mod id;
pub mod limits;
pub mod metrics;
pub mod run;
pub mod time;
pub mod traits;

// Re-exports
pub use capability::{Capability, CapabilityGrants, CapabilitySet};
pub use config::WardenConfig;
pub use error::{ErrorKind, WardenError, WardenResult};
pub use id::{EventId, RunId};
pub use limits::{LimitHints, ResourceLimits, Usage};
pub use run::{RunMode, RunRequest, RunState, RunStatus};
pub use time::Timestamp;
pub use traits::{EventSink, ExecutionError, ExecutionOutcome, RunExecutor, SyscallRecord};
