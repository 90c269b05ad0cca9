/// Filesystem root transition for the jailed child
use crate::config::types::{JailError, Result};
use std::path::{Path, PathBuf};

/// Absolute, existing jail root.
pub fn validate_jail_root(root: &Path) -> Result<PathBuf> {
    let canonical = root.canonicalize().map_err(|e| {
        JailError::Config(format!("Invalid jail root {}: {}", root.display(), e))
    })?;
    if !canonical.is_dir() {
        return Err(JailError::Config(format!(
            "Jail root {} is not a directory",
            canonical.display()
        )));
    }
    Ok(canonical)
}

/// Make `root` the filesystem root of this process and move into it.
///
/// Must only be called in the forked child: there is no way back.
pub fn enter_jail(root: &Path) -> Result<()> {
    nix::unistd::chroot(root)
        .map_err(|e| JailError::Chroot(format!("chroot({}) failed: {}", root.display(), e)))?;

    // Change to root directory within chroot
    nix::unistd::chdir("/")
        .map_err(|e| JailError::Chroot(format!("Failed to change to chroot root: {}", e)))?;

    log::debug!("Entered jail {}", root.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jail_root_must_exist() {
        let missing = std::env::temp_dir().join("jailcall-missing-jail-root");
        assert!(matches!(
            validate_jail_root(&missing),
            Err(JailError::Config(_))
        ));
    }

    #[test]
    fn jail_root_must_be_a_directory() {
        let file = std::env::temp_dir().join(format!("jailcall-root-file-{}", uuid::Uuid::new_v4()));
        std::fs::write(&file, b"").unwrap();
        assert!(validate_jail_root(&file).is_err());
        let _ = std::fs::remove_file(&file);
    }

    #[test]
    fn jail_root_is_canonicalized() {
        let root = validate_jail_root(Path::new("/tmp/../tmp")).unwrap();
        assert!(root.is_absolute());
        assert!(!root.to_string_lossy().contains(".."));
    }
}
