//! Thin wrappers around Linux kernel primitives.
//!
//! Dependency direction: chroot -> credentials

pub mod chroot;
pub mod credentials;
