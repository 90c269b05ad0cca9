//! Loadable code units.
//!
//! A code unit is anything that can be opened from a path and asked to run a
//! named zero-argument entry point. The shared-object implementation is backed
//! by `dlopen`; tests substitute their own loader.

use libloading::os::unix::{Library, RTLD_GLOBAL, RTLD_LOCAL, RTLD_NOW};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Symbol visibility requested when a unit is opened.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Binding {
    /// Symbols satisfy later loads (preloaded extensions)
    Global,
    /// Symbols stay private to the unit (the target module)
    Local,
}

#[derive(Error, Debug)]
pub enum UnitError {
    #[error("cannot open {path}: {reason}")]
    Open { path: PathBuf, reason: String },

    #[error("symbol {symbol} not found: {reason}")]
    MissingSymbol { symbol: String, reason: String },

    #[error("cannot read dependencies of {path}: {reason}")]
    Inspect { path: PathBuf, reason: String },
}

/// An opened code unit.
pub trait CodeUnit {
    /// Path (or loader name) the unit was opened from
    fn origin(&self) -> &Path;

    /// Resolve `symbol` and call it with no arguments.
    fn invoke(&self, symbol: &str) -> std::result::Result<(), UnitError>;
}

/// Opens code units from paths.
pub trait CodeUnitLoader {
    type Unit: CodeUnit;

    fn load(&self, path: &Path, binding: Binding) -> std::result::Result<Self::Unit, UnitError>;

    /// Names of the objects `path` needs at load time, in link order.
    fn needed(&self, _path: &Path) -> std::result::Result<Vec<String>, UnitError> {
        Ok(Vec::new())
    }

    /// Whether an object known as `soname` is already mapped in this process.
    fn is_resident(&self, _soname: &str) -> bool {
        false
    }
}

/// `dlopen`-backed loader for ELF shared objects.
#[derive(Clone, Copy, Debug, Default)]
pub struct SharedObjectLoader;

/// A shared object mapped into this process.
///
/// Dropping it unmaps the object unless another handle keeps it alive.
pub struct SharedObject {
    library: Library,
    origin: PathBuf,
}

impl std::fmt::Debug for SharedObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedObject")
            .field("origin", &self.origin)
            .finish()
    }
}

impl CodeUnitLoader for SharedObjectLoader {
    type Unit = SharedObject;

    fn load(&self, path: &Path, binding: Binding) -> std::result::Result<SharedObject, UnitError> {
        let flags = match binding {
            Binding::Global => RTLD_NOW | RTLD_GLOBAL,
            Binding::Local => RTLD_NOW | RTLD_LOCAL,
        };

        // SAFETY: opening a shared object runs its initialisers. The caller
        // chose the object; nothing else is borrowed across the call.
        let library = unsafe { Library::open(Some(path.as_os_str()), flags) }.map_err(|e| {
            UnitError::Open {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }
        })?;

        log::debug!("Opened shared object {} ({:?})", path.display(), binding);
        Ok(SharedObject {
            library,
            origin: path.to_path_buf(),
        })
    }

    fn needed(&self, path: &Path) -> std::result::Result<Vec<String>, UnitError> {
        let inspect_error = |reason: String| UnitError::Inspect {
            path: path.to_path_buf(),
            reason,
        };
        let bytes = fs::read(path).map_err(|e| inspect_error(e.to_string()))?;
        let elf = goblin::elf::Elf::parse(&bytes).map_err(|e| inspect_error(e.to_string()))?;
        Ok(elf.libraries.iter().map(|name| name.to_string()).collect())
    }

    fn is_resident(&self, soname: &str) -> bool {
        // SAFETY: RTLD_NOLOAD never maps a new object, so no initialiser runs.
        unsafe { Library::open(Some(soname), RTLD_NOW | libc::RTLD_NOLOAD) }.is_ok()
    }
}

impl CodeUnit for SharedObject {
    fn origin(&self) -> &Path {
        &self.origin
    }

    fn invoke(&self, symbol: &str) -> std::result::Result<(), UnitError> {
        // SAFETY: the entry point contract is a zero-argument C function with
        // no return value. The symbol lives as long as `self.library`.
        let entry = unsafe { self.library.get::<unsafe extern "C" fn()>(symbol.as_bytes()) }
            .map_err(|e| UnitError::MissingSymbol {
                symbol: symbol.to_string(),
                reason: e.to_string(),
            })?;

        log::debug!("Invoking {} from {}", symbol, self.origin.display());
        unsafe { entry() };
        Ok(())
    }
}

/// Whether `name` is handed to the system loader as-is (a path or soname)
/// rather than resolved as a dotted module name.
pub fn is_loader_name(name: &str) -> bool {
    name.contains('/') || name.split('.').any(|segment| segment == "so")
}

/// First `<search path>/<name>` that is a file. Names carrying a directory
/// are left to the system loader.
pub fn find_library(name: &str, search_paths: &[PathBuf]) -> Option<PathBuf> {
    if name.contains('/') {
        return None;
    }
    search_paths
        .iter()
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

/// Load, dependencies first, every object `path` needs that is not mapped
/// yet but sits on `search_paths`.
///
/// The system loader only consults the search list it read at startup, so
/// objects found elsewhere are opened here by full path with global binding.
/// Once resident they satisfy the later load of `path` through their soname.
/// Needed names found nowhere are left for the system loader to report.
pub fn load_dependencies<L: CodeUnitLoader>(
    loader: &L,
    path: &Path,
    search_paths: &[PathBuf],
) -> std::result::Result<Vec<L::Unit>, UnitError> {
    let mut seen = BTreeSet::new();
    let mut loaded = Vec::new();
    load_needed(loader, path, search_paths, &mut seen, &mut loaded)?;
    Ok(loaded)
}

fn load_needed<L: CodeUnitLoader>(
    loader: &L,
    path: &Path,
    search_paths: &[PathBuf],
    seen: &mut BTreeSet<String>,
    loaded: &mut Vec<L::Unit>,
) -> std::result::Result<(), UnitError> {
    for name in loader.needed(path)? {
        if !seen.insert(name.clone()) || loader.is_resident(&name) {
            continue;
        }
        let Some(found) = find_library(&name, search_paths) else {
            log::debug!("{} needed by {} is not on the search paths", name, path.display());
            continue;
        };
        load_needed(loader, &found, search_paths, seen, loaded)?;
        log::debug!("Loading {} for {} from {}", name, path.display(), found.display());
        loaded.push(loader.load(&found, Binding::Global)?);
    }
    Ok(())
}

/// Find the file implementing dotted module `name` on `search_paths`.
///
/// `a.b.c` matches a file in `<path>/a/b/` whose name, up to its first dot, is
/// `c`. With a `suffix`, the file name must also end with it. The first search
/// path holding a match wins; within one directory the lexicographically
/// first match wins.
pub fn resolve_module(name: &str, search_paths: &[PathBuf], suffix: Option<&str>) -> Option<PathBuf> {
    let segments: Vec<&str> = name.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return None;
    }
    let (leaf, parents) = segments.split_last()?;

    for base in search_paths {
        let dir = parents.iter().fold(base.clone(), |dir, part| dir.join(part));
        let Ok(entries) = fs::read_dir(&dir) else {
            continue;
        };

        let mut candidates: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry.file_name().to_str().map_or(false, |file_name| {
                    file_name.split('.').next() == Some(*leaf)
                        && suffix.map_or(true, |s| file_name.ends_with(s))
                })
            })
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();
        candidates.sort();

        if let Some(found) = candidates.into_iter().next() {
            return Some(found);
        }
    }

    None
}
