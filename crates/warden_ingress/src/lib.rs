//! Ingress API for Warden.
//!
//! Composes policy, fetch, and the runtime behind `submit`, `get_status`,
//! and `event_stream`. Owns the injected stores: the run table, the
//! idempotency cache, and the lifecycle broadcaster. Live work happens on
//! independent tasks behind a global concurrency semaphore with a bounded
//! wait queue.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod canary;
pub mod events;
pub mod idempotency;
pub mod runs;
pub mod service;

pub use canary::admit;
pub use events::{EventBroadcaster, RunEvent, RunEventKind};
pub use idempotency::IdempotencyStore;
pub use runs::RunTable;
pub use service::{IngressService, SubmitResponse};
