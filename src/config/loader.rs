/// Configuration loading from config.json
use crate::config::types::{JailError, PreloadPolicy, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// System-wide configuration consulted when `--config` is not given.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/jailcall/config.json";

/// Tunables for the chroot caller. Every field has a default.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CallerConfig {
    /// Absolute prefix, inside the jail, under which search paths are staged
    pub staging_prefix: PathBuf,
    /// File name suffix identifying native extensions
    pub extension_suffix: String,
    /// Replaces search path discovery when set
    pub search_paths: Option<Vec<PathBuf>>,
    /// Appended to the discovered (or configured) search paths
    pub extra_search_paths: Vec<PathBuf>,
    pub preload_policy: PreloadPolicy,
    /// Wait for the child and report its status
    pub wait: bool,
}

impl Default for CallerConfig {
    fn default() -> Self {
        Self {
            staging_prefix: PathBuf::from("/tmp/.jailcall/stage"),
            extension_suffix: ".so".to_string(),
            search_paths: None,
            extra_search_paths: Vec::new(),
            preload_policy: PreloadPolicy::FailFast,
            wait: false,
        }
    }
}

impl CallerConfig {
    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            JailError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let config: CallerConfig = serde_json::from_str(&content)
            .map_err(|e| JailError::Config(format!("Failed to parse config JSON: {}", e)))?;
        config.validate()?;

        Ok(config)
    }

    /// Load the explicit file if given, else the system file if present, else defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load_from_file(path);
        }

        let system = Path::new(SYSTEM_CONFIG_PATH);
        if system.is_file() {
            log::debug!("Loading system configuration from {}", system.display());
            return Self::load_from_file(system);
        }

        Ok(Self::default())
    }

    pub fn validate(&self) -> Result<()> {
        if !self.staging_prefix.is_absolute() {
            return Err(JailError::Config(format!(
                "staging_prefix must be absolute, got {}",
                self.staging_prefix.display()
            )));
        }
        if self.staging_prefix == Path::new("/") {
            return Err(JailError::Config(
                "staging_prefix must not be the jail root itself".to_string(),
            ));
        }
        if self.extension_suffix.is_empty() {
            return Err(JailError::Config(
                "extension_suffix must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("jailcall-config-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn defaults_are_valid() {
        let config = CallerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.extension_suffix, ".so");
        assert_eq!(config.preload_policy, PreloadPolicy::FailFast);
        assert!(!config.wait);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let path = write_config(r#"{ "wait": true, "preload_policy": "collect_all" }"#);
        let config = CallerConfig::load(Some(&path)).unwrap();

        assert!(config.wait);
        assert_eq!(config.preload_policy, PreloadPolicy::CollectAll);
        assert_eq!(config.staging_prefix, PathBuf::from("/tmp/.jailcall/stage"));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn relative_staging_prefix_is_rejected() {
        let path = write_config(r#"{ "staging_prefix": "stage" }"#);
        assert!(matches!(
            CallerConfig::load_from_file(&path),
            Err(JailError::Config(_))
        ));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let path = write_config("{ not json");
        let err = CallerConfig::load_from_file(&path).unwrap_err();
        assert!(err.to_string().contains("parse"));
        let _ = std::fs::remove_file(&path);
    }
}
