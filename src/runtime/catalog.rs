/// Catalog of native extensions available under the search paths
use crate::runtime::search::RuntimeSearchPathList;
use serde::Serialize;
use std::path::{Component, Path};
use walkdir::WalkDir;

/// Directory segment holding third-party extensions.
pub const THIRD_PARTY_MARKER: &str = "site-packages";
/// Directory segment holding the runtime's built-in extensions.
pub const BUILTIN_MARKER: &str = "lib-dynload";

/// Sorted, deduplicated dotted names of every extension found.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ExtensionCatalog {
    names: Vec<String>,
}

impl ExtensionCatalog {
    pub fn from_names(mut names: Vec<String>) -> Self {
        names.sort();
        names.dedup();
        Self { names }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// One name per line, newline terminated.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for name in &self.names {
            out.push_str(name);
            out.push('\n');
        }
        out
    }
}

/// Dotted module name for extension `file` found under `search_path`.
pub fn module_name_for(search_path: &Path, file: &Path) -> Option<String> {
    let relative = file.strip_prefix(search_path).unwrap_or(file);
    let segments: Vec<&str> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .filter(|s| !s.is_empty())
        .collect();

    let start = segments
        .iter()
        .rposition(|s| *s == THIRD_PARTY_MARKER)
        .or_else(|| segments.iter().rposition(|s| *s == BUILTIN_MARKER))
        .map_or(0, |marker| marker + 1);

    let mut parts: Vec<&str> = segments[start..].to_vec();
    let leaf = parts.pop()?;
    let leaf = leaf.split('.').next().unwrap_or_default();
    if leaf.is_empty() {
        return None;
    }
    parts.push(leaf);
    Some(parts.join("."))
}

/// Walk every search path bottom-up and name each extension found.
pub fn build_catalog(search_paths: &RuntimeSearchPathList, suffix: &str) -> ExtensionCatalog {
    let mut names = Vec::new();

    for root in search_paths.paths() {
        for entry in WalkDir::new(root).follow_links(false).contents_first(true) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log::debug!("Skipping unreadable entry under {}: {}", root.display(), e);
                    continue;
                }
            };
            if entry.file_type().is_dir() {
                continue;
            }
            let matches_suffix = entry
                .file_name()
                .to_str()
                .map_or(false, |name| name.ends_with(suffix));
            if !matches_suffix {
                continue;
            }
            if let Some(name) = module_name_for(root, entry.path()) {
                names.push(name);
            }
        }
    }

    let catalog = ExtensionCatalog::from_names(names);
    log::debug!(
        "Cataloged {} native extensions under {} search paths",
        catalog.len(),
        search_paths.len()
    );
    catalog
}
