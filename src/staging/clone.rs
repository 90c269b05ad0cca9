/// Staging of runtime libraries inside the jail
use crate::config::types::{JailError, Result};
use crate::runtime::search::{join_under, RuntimeSearchPathList};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// What one cloning pass did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CloneReport {
    /// `<jail-root>/<staging-prefix>` on the host
    pub staging_root: PathBuf,
    /// Staging root already existed; nothing was copied
    pub skipped: bool,
    pub dirs: usize,
    pub files: usize,
    pub symlinks: usize,
}

/// Copies search directories to `<jail-root>/<staging-prefix>/<path>`.
#[derive(Clone, Debug)]
pub struct LibraryCloner {
    jail_root: PathBuf,
    staging_prefix: PathBuf,
}

impl LibraryCloner {
    pub fn new(jail_root: impl Into<PathBuf>, staging_prefix: impl Into<PathBuf>) -> Self {
        Self {
            jail_root: jail_root.into(),
            staging_prefix: staging_prefix.into(),
        }
    }

    /// Host path of the staging root for this jail.
    pub fn staging_root(&self) -> PathBuf {
        join_under(&self.jail_root, &self.staging_prefix)
    }

    /// Host path where `path` is staged.
    pub fn staged_location(&self, path: &Path) -> PathBuf {
        join_under(&self.staging_root(), path)
    }

    /// Copy every search path unless the staging root already exists.
    ///
    /// Freshness is judged on the staging root alone. A pass that fails
    /// halfway leaves its partial tree behind and later passes skip it.
    pub fn clone_tree(&self, search_paths: &RuntimeSearchPathList) -> Result<CloneReport> {
        let staging_root = self.staging_root();
        let mut report = CloneReport {
            staging_root: staging_root.clone(),
            ..CloneReport::default()
        };

        if staging_root.is_dir() {
            log::info!(
                "Staging root {} exists, skipping library copy",
                staging_root.display()
            );
            report.skipped = true;
            return Ok(report);
        }

        for source in search_paths.paths() {
            let target = self.staged_location(source);
            log::debug!("Copying {} to {}", source.display(), target.display());
            copy_tree(source, &target, &mut report).map_err(|e| {
                log::error!(
                    "Library staging aborted, partial tree left at {}",
                    staging_root.display()
                );
                e
            })?;
        }

        log::info!(
            "Staged {} search paths under {} ({} dirs, {} files, {} symlinks)",
            search_paths.len(),
            staging_root.display(),
            report.dirs,
            report.files,
            report.symlinks
        );
        Ok(report)
    }
}

fn clone_error(path: &Path, err: impl std::fmt::Display) -> JailError {
    JailError::Clone {
        path: path.to_path_buf(),
        reason: err.to_string(),
    }
}

/// Recursive verbatim copy: directories keep their modes, symlinks are
/// recreated rather than followed.
fn copy_tree(source: &Path, target: &Path, report: &mut CloneReport) -> Result<()> {
    for entry in WalkDir::new(source).follow_links(false) {
        let entry = entry.map_err(|e| clone_error(source, e))?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| clone_error(entry.path(), e))?;
        let destination = target.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&destination).map_err(|e| clone_error(&destination, e))?;
            let permissions = entry
                .metadata()
                .map_err(|e| clone_error(entry.path(), e))?
                .permissions();
            fs::set_permissions(&destination, permissions)
                .map_err(|e| clone_error(&destination, e))?;
            report.dirs += 1;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path()).map_err(|e| clone_error(entry.path(), e))?;
            std::os::unix::fs::symlink(&link, &destination)
                .map_err(|e| clone_error(&destination, e))?;
            report.symlinks += 1;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &destination).map_err(|e| clone_error(entry.path(), e))?;
            report.files += 1;
        } else {
            log::debug!("Skipping special file {}", entry.path().display());
        }
    }
    Ok(())
}
