//! Resource-limited WASM sandbox.
//!
//! One sandbox per run, never pooled: a fresh engine and store with a hard
//! linear-memory ceiling, a deterministic fuel budget, and epoch-based
//! wall-clock interruption. The module's only I/O is its stdio pair; all
//! host effects go through the syscall gateway via the line protocol.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod fuel;
pub mod memory;
pub mod protocol;
pub mod sandbox;

pub use fuel::FuelMeter;
pub use memory::MemoryCeiling;
pub use protocol::{GuestLine, Sysret, SyscallEnvelope};
pub use sandbox::{Sandbox, SandboxOutcome, SandboxRun};
