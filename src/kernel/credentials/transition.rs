//! Re-assertion of the caller's real UID/GID.
//!
//! CRITICAL: setresgid MUST be called BEFORE setresuid; once the UID is
//! unprivileged the GID can no longer be changed.

use crate::config::types::{JailError, Result};
use nix::unistd::{getegid, geteuid, getgid, getuid, setgroups, setresgid, setresuid, Gid, Uid};

/// A UID/GID pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Identity {
    pub uid: u32,
    pub gid: u32,
}

impl Identity {
    pub fn real() -> Self {
        Self {
            uid: getuid().as_raw(),
            gid: getgid().as_raw(),
        }
    }

    pub fn effective() -> Self {
        Self {
            uid: geteuid().as_raw(),
            gid: getegid().as_raw(),
        }
    }
}

/// Effect of collapsing the effective identity onto the real one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdentityChange {
    /// Effective and real identities already match
    Unchanged,
    /// Effective identity is replaced by the real one
    Downgrade,
}

pub fn classify(real: Identity, effective: Identity) -> IdentityChange {
    if real == effective {
        IdentityChange::Unchanged
    } else {
        IdentityChange::Downgrade
    }
}

/// Set real, effective and saved IDs to the caller's real UID/GID.
///
/// Supplementary groups are cleared only when an effective root drops to a
/// non-root real UID. Returns what changed.
pub fn reassert_real_identity() -> Result<IdentityChange> {
    let real = Identity::real();
    let effective = Identity::effective();
    let change = classify(real, effective);

    if effective.uid == 0 && real.uid != 0 {
        setgroups(&[]).map_err(|e| {
            JailError::Privilege(format!("Failed to clear supplementary groups: {}", e))
        })?;
        log::debug!("Cleared supplementary groups");
    }

    // CRITICAL: GID before UID
    let gid = Gid::from_raw(real.gid);
    setresgid(gid, gid, gid)
        .map_err(|e| JailError::Privilege(format!("Failed to setresgid({}): {}", real.gid, e)))?;

    let uid = Uid::from_raw(real.uid);
    setresuid(uid, uid, uid)
        .map_err(|e| JailError::Privilege(format!("Failed to setresuid({}): {}", real.uid, e)))?;

    verify_identity(real)?;

    log::info!(
        "Identity set to UID={}, GID={} ({:?})",
        real.uid,
        real.gid,
        change
    );
    Ok(change)
}

fn verify_identity(expected: Identity) -> Result<()> {
    let real = Identity::real();
    let effective = Identity::effective();

    if real != expected || effective != expected {
        return Err(JailError::Privilege(format!(
            "Identity verification failed: expected {:?}, got real={:?}, effective={:?}",
            expected, real, effective
        )));
    }
    Ok(())
}
