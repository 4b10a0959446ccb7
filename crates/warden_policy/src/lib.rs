//! Policy engine for Warden.
//!
//! Evaluation is an ordered pipeline of allow/deny/error stages that
//! short-circuits on the first deny or error: structural validation,
//! module allowlist, capability subset, label rules, then (artifact in
//! hand) signature verification and the external decision service.
//! A deny always precedes sandbox instantiation.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod decision;
pub mod engine;
pub mod labels;
pub mod signature;

pub use decision::DecisionClient;
pub use engine::{PolicyDecision, PolicyEngine};
pub use labels::LabelRule;
