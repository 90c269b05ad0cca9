/// Names already present in this process
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

const PROC_SELF_MAPS: &str = "/proc/self/maps";

/// Module names bound in the host process, with the object each came from.
///
/// A target module may not reuse one of these names: once the jail is
/// entered the existing binding would shadow the target.
#[derive(Clone, Debug, Default)]
pub struct ModuleRegistry {
    modules: BTreeMap<String, PathBuf>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry seeded with every file-backed object mapped in this process.
    pub fn from_host() -> Self {
        let mut registry = Self::new();
        match fs::read_to_string(PROC_SELF_MAPS) {
            Ok(maps) => registry.register_maps(&maps),
            Err(e) => log::debug!("Cannot read {}: {}", PROC_SELF_MAPS, e),
        }
        registry
    }

    fn register_maps(&mut self, maps: &str) {
        for line in maps.lines() {
            // address perms offset dev inode pathname
            let Some(path) = line.split_whitespace().nth(5) else {
                continue;
            };
            if !path.starts_with('/') {
                continue;
            }
            let path = Path::new(path);
            if let Some(name) = object_module_name(path) {
                self.modules.entry(name).or_insert_with(|| path.to_path_buf());
            }
        }
    }

    /// Bind `name` to `origin`; an existing binding is kept.
    pub fn register(&mut self, name: impl Into<String>, origin: impl Into<PathBuf>) {
        self.modules.entry(name.into()).or_insert_with(|| origin.into());
    }

    /// Origin of the module bound to `name`, if any.
    pub fn origin_of(&self, name: &str) -> Option<&Path> {
        self.modules.get(name).map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

/// Module name an object file is known by: its file name up to the first dot.
pub(crate) fn object_module_name(path: &Path) -> Option<String> {
    let file_name = path.file_name()?.to_str()?;
    let name = file_name.split('.').next()?;
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_lines_are_parsed() {
        let maps = "\
7f0000000000-7f0000001000 r-xp 00000000 08:01 1234 /usr/lib/x86_64-linux-gnu/libc.so.6
7f0000002000-7f0000003000 rw-p 00000000 00:00 0 [heap]
7f0000004000-7f0000005000 rw-p 00000000 00:00 0
7f0000006000-7f0000007000 r--p 00000000 08:01 99 /usr/lib/locale/C.utf8/LC_CTYPE
";
        let mut registry = ModuleRegistry::new();
        registry.register_maps(maps);

        assert_eq!(
            registry.origin_of("libc"),
            Some(Path::new("/usr/lib/x86_64-linux-gnu/libc.so.6"))
        );
        assert!(registry.origin_of("LC_CTYPE").is_some());
        assert!(registry.origin_of("[heap]").is_none());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn first_binding_is_kept() {
        let mut registry = ModuleRegistry::new();
        registry.register("math", "/first/math.so");
        registry.register("math", "/second/math.so");
        assert_eq!(registry.origin_of("math"), Some(Path::new("/first/math.so")));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn host_registry_contains_current_executable() {
        let exe = std::env::current_exe().unwrap();
        let name = object_module_name(&exe).unwrap();
        let registry = ModuleRegistry::from_host();
        assert!(registry.origin_of(&name).is_some());
    }
}
