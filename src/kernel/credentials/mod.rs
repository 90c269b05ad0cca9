//! UID/GID handling for the jailed child.
//!
//! CRITICAL: setresgid MUST be called BEFORE setresuid.

mod transition;

pub use transition::{classify, reassert_real_identity, Identity, IdentityChange};
