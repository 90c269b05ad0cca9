//! Extra native extension names supplied by the caller.
//!
//! The list file holds one name per line; surrounding whitespace and blank
//! lines are ignored.

use crate::config::types::{ExtensionModuleSet, JailError, Result};
use std::fs;
use std::path::Path;

/// Read the names listed in `path`.
pub fn load_module_list(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path).map_err(|e| {
        JailError::Config(format!(
            "Unable to access list of extra modules to load {}: {}",
            path.display(),
            e
        ))
    })?;

    Ok(parse_module_list(&content))
}

fn parse_module_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

impl ExtensionModuleSet {
    /// Merge the names listed in `path` into this set.
    pub fn merge_file(&mut self, path: &Path) -> Result<()> {
        let names = load_module_list(path)?;
        log::debug!("Merging {} extra modules from {}", names.len(), path.display());
        self.extend(names);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_list(content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("jailcall-modules-{}", uuid::Uuid::new_v4()));
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn parse_skips_blank_lines() {
        let names = parse_module_list("math\n\n   \n  fcntl  \r\n_random\n");
        assert_eq!(names, vec!["math", "fcntl", "_random"]);
    }

    #[test]
    fn merged_set_is_baseline_union_lines() {
        let path = temp_list("zlib\n\nmath\nzlib\n  math  \n");
        let mut set = ExtensionModuleSet::baseline();
        set.merge_file(&path).unwrap();

        let mut expected = ExtensionModuleSet::baseline();
        expected.extend(["math", "zlib"]);
        assert_eq!(set, expected);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn line_order_does_not_matter() {
        let forward = temp_list("a\nb\nc\n");
        let backward = temp_list("c\n\nb\na\na\n");

        let mut first = ExtensionModuleSet::baseline();
        first.merge_file(&forward).unwrap();
        let mut second = ExtensionModuleSet::baseline();
        second.merge_file(&backward).unwrap();
        assert_eq!(first, second);

        let _ = fs::remove_file(&forward);
        let _ = fs::remove_file(&backward);
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let path = std::env::temp_dir().join("jailcall-definitely-missing-list");
        let mut set = ExtensionModuleSet::baseline();
        let err = set.merge_file(&path).unwrap_err();

        assert!(matches!(err, JailError::Config(_)));
        assert!(err.to_string().contains("jailcall-definitely-missing-list"));
        assert_eq!(set, ExtensionModuleSet::baseline());
    }
}
