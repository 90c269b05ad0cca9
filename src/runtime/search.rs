/// Library search path discovery and in-jail remapping
use crate::config::loader::CallerConfig;
use glob::glob;
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Caller-controlled search directories, consulted before anything else.
pub const LIBRARY_PATH_ENV: &str = "JAILCALL_LIBRARY_PATH";

const LD_LIBRARY_PATH_ENV: &str = "LD_LIBRARY_PATH";
const LD_SO_CONF: &str = "/etc/ld.so.conf";
const DEFAULT_LIBRARY_DIRS: &[&str] = &["/lib64", "/usr/lib64", "/lib", "/usr/lib"];
const MAX_INCLUDE_DEPTH: usize = 8;

/// Every directory the loader of this process consults, in lookup order.
pub fn collect_search_entries(config: &CallerConfig) -> Vec<PathBuf> {
    let mut entries = match &config.search_paths {
        Some(paths) => paths.clone(),
        None => {
            let mut entries = Vec::new();
            for var in [LIBRARY_PATH_ENV, LD_LIBRARY_PATH_ENV] {
                if let Some(value) = std::env::var_os(var) {
                    entries.extend(std::env::split_paths(&value));
                }
            }
            entries.extend(parse_ld_so_conf(Path::new(LD_SO_CONF)));
            entries.extend(DEFAULT_LIBRARY_DIRS.iter().map(PathBuf::from));
            entries
        }
    };
    entries.extend(config.extra_search_paths.iter().cloned());
    entries
}

/// Directories listed in an ld.so.conf style file, following `include` lines.
pub fn parse_ld_so_conf(path: &Path) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    parse_ld_so_conf_into(path, 0, &mut dirs);
    dirs
}

fn parse_ld_so_conf_into(path: &Path, depth: usize, dirs: &mut Vec<PathBuf>) {
    if depth > MAX_INCLUDE_DEPTH {
        log::warn!("ld.so.conf include depth exceeded at {}", path.display());
        return;
    }
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            log::debug!("Skipping {}: {}", path.display(), e);
            return;
        }
    };
    let base = path.parent().unwrap_or(Path::new("/"));

    for line in content.lines() {
        let line = line.split('#').next().unwrap_or_default().trim();
        if line.is_empty() {
            continue;
        }
        if let Some(pattern) = line.strip_prefix("include") {
            for include in expand_include(base, pattern.trim()) {
                parse_ld_so_conf_into(&include, depth + 1, dirs);
            }
            continue;
        }
        for token in line.split(|c: char| c.is_whitespace() || c == ':' || c == ',') {
            // Old-style "dir=type" entries carry a hardware class suffix.
            let dir = token.split('=').next().unwrap_or_default();
            if dir.starts_with('/') {
                dirs.push(PathBuf::from(dir));
            }
        }
    }
}

/// Files matched by an `include` pattern, relative patterns taken from `base`.
fn expand_include(base: &Path, pattern: &str) -> Vec<PathBuf> {
    if pattern.is_empty() {
        return Vec::new();
    }
    let pattern = if Path::new(pattern).is_absolute() {
        PathBuf::from(pattern)
    } else {
        base.join(pattern)
    };
    let Some(pattern) = pattern.to_str() else {
        log::debug!("Skipping non UTF-8 include pattern {}", pattern.display());
        return Vec::new();
    };

    let mut matches: Vec<PathBuf> = match glob(pattern) {
        Ok(paths) => paths.filter_map(|entry| entry.ok()).collect(),
        Err(e) => {
            log::warn!("Invalid include pattern {}: {}", pattern, e);
            Vec::new()
        }
    };
    matches.sort();
    matches
}

/// Distinct, non-nested search directories worth staging.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RuntimeSearchPathList {
    paths: Vec<PathBuf>,
}

impl RuntimeSearchPathList {
    /// Keep entries that exist as directories and are not nested in a kept
    /// entry or in `cwd`. Shorter paths are considered first.
    ///
    /// A `cwd` of `/` excludes nothing; every absolute path lives under it.
    pub fn select(entries: &[PathBuf], cwd: &Path) -> Self {
        let mut sorted: Vec<&PathBuf> = entries.iter().collect();
        sorted.sort_by_key(|p| p.as_os_str().len());

        let exclude_cwd = cwd != Path::new("/") && !cwd.as_os_str().is_empty();
        let mut paths: Vec<PathBuf> = Vec::new();
        for entry in sorted {
            if entry.as_os_str().is_empty() {
                continue;
            }
            if exclude_cwd && entry.starts_with(cwd) {
                continue;
            }
            if paths.iter().any(|kept| entry.starts_with(kept)) {
                continue;
            }
            if !entry.is_dir() {
                continue;
            }
            paths.push(entry.clone());
        }

        Self { paths }
    }

    pub fn from_paths(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// `abs` re-rooted under `root`, whatever leading `/` or `..` it carries.
pub fn join_under(root: &Path, abs: &Path) -> PathBuf {
    let mut joined = root.to_path_buf();
    for component in abs.components() {
        if let Component::Normal(part) = component {
            joined.push(part);
        }
    }
    joined
}

/// Where `path` lives inside the jail once staged.
pub fn staged_path(staging_prefix: &Path, path: &Path) -> PathBuf {
    join_under(staging_prefix, path)
}

/// Search list for the child, evaluated against the new root.
///
/// Original entries come first, then the command's own directory, then the
/// staged copy of each distinct search path. Anything that is not a
/// directory under the current root is dropped.
pub fn remap_into_jail(
    entries: &[PathBuf],
    module_dir: Option<&Path>,
    distinct: &RuntimeSearchPathList,
    staging_prefix: &Path,
) -> Vec<PathBuf> {
    let mut active: Vec<PathBuf> = entries.to_vec();
    if let Some(dir) = module_dir {
        active.push(dir.to_path_buf());
    }
    active.extend(
        distinct
            .paths()
            .iter()
            .map(|p| staged_path(staging_prefix, p)),
    );

    let mut remapped: Vec<PathBuf> = Vec::new();
    for path in active {
        if path.is_dir() && !remapped.contains(&path) {
            remapped.push(path);
        }
    }
    remapped
}

/// Filesystem-dependent runtime state, derived for one root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeContext {
    pub search_paths: Vec<PathBuf>,
    pub cwd: PathBuf,
    pub staging_root: PathBuf,
}

impl RuntimeContext {
    /// Context as seen from the host, before the root changes.
    pub fn host(entries: Vec<PathBuf>, jail_root: &Path, staging_prefix: &Path) -> Self {
        Self {
            search_paths: entries,
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/")),
            staging_root: join_under(jail_root, staging_prefix),
        }
    }

    /// Recompute every path-dependent value from inside the jail.
    ///
    /// Must be called after the root change; nothing from the host context is
    /// reused except the original entry list, which is re-evaluated. A
    /// relative `module_dir` is taken from the jail's working directory.
    pub fn inside_jail(
        &self,
        module_dir: Option<&Path>,
        distinct: &RuntimeSearchPathList,
        staging_prefix: &Path,
    ) -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        let staging_root = staging_prefix.to_path_buf();
        let module_dir = module_dir.map(|dir| cwd.join(dir));
        Self {
            search_paths: remap_into_jail(
                &self.search_paths,
                module_dir.as_deref(),
                distinct,
                &staging_root,
            ),
            cwd,
            staging_root,
        }
    }
}
