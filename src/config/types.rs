/// Core types and errors for the jailcall system
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Native extensions every run preloads before entering the jail.
///
/// glibc opens these lazily (unwinding, NSS lookups), so they must already be
/// resident once the original library paths disappear.
pub const BASELINE_EXTENSIONS: &[&str] = &["libgcc_s.so.1", "libnss_files.so.2", "libnss_dns.so.2"];

/// Entry point used when `--func` is not given.
pub const DEFAULT_ENTRY_POINT: &str = "main";

/// Environment variable exposing `--args` to the entry point inside the jail.
pub const ARGS_ENV_VAR: &str = "JAILCALL_ARGS";

/// Custom error types for jailcall
#[derive(Error, Debug)]
pub enum JailError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unable to preload native extension {name}: {reason}")]
    Load { name: String, reason: String },

    #[error("Module {module} is clashing with already loaded {origin}")]
    NameClash { module: String, origin: String },

    #[error("Failed to stage {path}: {reason}")]
    Clone { path: PathBuf, reason: String },

    #[error("Error running module {module}: {reason}")]
    ChildImport { module: String, reason: String },

    #[error("Entry point {symbol} of module {module} failed: {reason}")]
    EntryPoint {
        module: String,
        symbol: String,
        reason: String,
    },

    #[error("Chroot error: {0}")]
    Chroot(String),

    #[error("Privilege error: {0}")]
    Privilege(String),

    #[error("Process error: {0}")]
    Process(String),
}

impl JailError {
    /// Process exit status reported for this error.
    ///
    /// Every failure, before or after the fork, terminates with status 1.
    pub fn exit_code(&self) -> i32 {
        1
    }
}

pub type Result<T> = std::result::Result<T, JailError>;

/// One run of the chroot caller, fixed for its whole duration.
#[derive(Clone, Debug)]
pub struct TargetInvocation {
    /// Directory that becomes `/` for the child
    pub root: PathBuf,
    /// File holding the loadable code unit
    pub cmd: PathBuf,
    /// Zero-argument entry point to call
    pub func: String,
    /// Optional newline-delimited list of extra extensions
    pub modules: Option<PathBuf>,
    /// Only print the extension catalog
    pub list_modules: bool,
    /// Optional argument file handed to the entry point
    pub args: Option<PathBuf>,
}

impl TargetInvocation {
    pub fn new(root: impl Into<PathBuf>, cmd: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cmd: cmd.into(),
            func: DEFAULT_ENTRY_POINT.to_string(),
            modules: None,
            list_modules: false,
            args: None,
        }
    }

    pub fn with_func(mut self, func: impl Into<String>) -> Self {
        self.func = func.into();
        self
    }

    pub fn with_modules(mut self, modules: impl Into<PathBuf>) -> Self {
        self.modules = Some(modules.into());
        self
    }

    pub fn with_list_modules(mut self, list_modules: bool) -> Self {
        self.list_modules = list_modules;
        self
    }

    pub fn with_args(mut self, args: impl Into<PathBuf>) -> Self {
        self.args = Some(args.into());
        self
    }

    /// Module name of the target: the command's base name up to its first dot.
    pub fn module_name(&self) -> Result<String> {
        let base = self
            .cmd
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                JailError::Config(format!("Invalid command path: {}", self.cmd.display()))
            })?;
        let name = base.split('.').next().unwrap_or_default();
        if name.is_empty() {
            return Err(JailError::Config(format!(
                "Command {} does not name a module",
                self.cmd.display()
            )));
        }
        Ok(name.to_string())
    }

    /// Directory of the command, searched for the module inside the jail.
    pub fn module_dir(&self) -> Option<&Path> {
        self.cmd.parent().filter(|p| !p.as_os_str().is_empty())
    }
}

/// Names of native extensions to preload, baseline included.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtensionModuleSet {
    names: BTreeSet<String>,
}

impl ExtensionModuleSet {
    /// Set holding only the baseline extensions.
    pub fn baseline() -> Self {
        Self::from_names(BASELINE_EXTENSIONS.iter().copied())
    }

    /// Set holding exactly the given names (trimmed, blanks dropped).
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self {
            names: BTreeSet::new(),
        };
        set.extend(names);
        set
    }

    pub fn extend<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for name in names {
            let name = name.as_ref().trim();
            if !name.is_empty() {
                self.names.insert(name.to_string());
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl Default for ExtensionModuleSet {
    fn default() -> Self {
        Self::baseline()
    }
}

/// How the preloader reacts to an extension that cannot be loaded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreloadPolicy {
    /// Abort on the first failing name
    #[default]
    FailFast,
    /// Try every name, then abort listing all failures
    CollectAll,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_name_strips_every_extension() {
        let inv = TargetInvocation::new("/tmp/jail", "/tmp/src/hello.mod");
        assert_eq!(inv.module_name().unwrap(), "hello");

        let inv = TargetInvocation::new("/tmp/jail", "/tmp/src/hello.cpython-311.so");
        assert_eq!(inv.module_name().unwrap(), "hello");

        let inv = TargetInvocation::new("/tmp/jail", "plain");
        assert_eq!(inv.module_name().unwrap(), "plain");
    }

    #[test]
    fn module_name_rejects_hidden_files() {
        let inv = TargetInvocation::new("/tmp/jail", "/tmp/src/.hidden");
        assert!(matches!(inv.module_name(), Err(JailError::Config(_))));
    }

    #[test]
    fn module_dir_ignores_bare_file_names() {
        let inv = TargetInvocation::new("/", "hello.so");
        assert_eq!(inv.module_dir(), None);

        let inv = TargetInvocation::new("/", "/tmp/src/hello.so");
        assert_eq!(inv.module_dir(), Some(Path::new("/tmp/src")));
    }

    #[test]
    fn default_entry_point_is_main() {
        let inv = TargetInvocation::new("/", "/x.so");
        assert_eq!(inv.func, "main");
        assert_eq!(inv.with_func("greet").func, "greet");
    }

    #[test]
    fn baseline_is_not_shared_between_sets() {
        let mut first = ExtensionModuleSet::baseline();
        first.extend(["extra"]);
        let second = ExtensionModuleSet::baseline();

        assert!(first.contains("extra"));
        assert!(!second.contains("extra"));
        assert_eq!(second.len(), BASELINE_EXTENSIONS.len());
    }

    #[test]
    fn extend_trims_and_deduplicates() {
        let set = ExtensionModuleSet::from_names(["  math ", "", "math", "\t", "fcntl"]);
        let names: Vec<&str> = set.iter().collect();
        assert_eq!(names, vec!["fcntl", "math"]);
    }

    #[test]
    fn every_error_exits_with_one() {
        let errors = [
            JailError::Config("x".into()),
            JailError::NameClash {
                module: "m".into(),
                origin: "/o".into(),
            },
            JailError::Process("p".into()),
        ];
        for err in errors {
            assert_eq!(err.exit_code(), 1);
        }
    }
}
