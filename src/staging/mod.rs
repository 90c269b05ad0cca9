//! Library staging
//!
//! Copies the runtime's search directories into the jail so they resolve
//! after the root changes.

pub mod clone;

pub use clone::{CloneReport, LibraryCloner};
