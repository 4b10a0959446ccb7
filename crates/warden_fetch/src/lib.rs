//! Module artifact resolution for Warden.
//!
//! The fetch boundary turns a content locator into verified module bytes
//! via cache, then local content node, then HTTP mirror. Everything past
//! this crate only ever sees checksum-verified artifacts.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod artifact;
pub mod locator;
pub mod resolver;

pub use artifact::ModuleArtifact;
pub use locator::{LocatorSource, ModuleLocator};
pub use resolver::Resolver;
