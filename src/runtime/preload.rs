//! Native extension preloading.
//!
//! Extensions are mapped into the process while their host paths are still
//! reachable. Once the root changes, only these resident copies remain usable.

use crate::config::types::{ExtensionModuleSet, JailError, PreloadPolicy, Result};
use crate::runtime::loader::{is_loader_name, resolve_module, Binding, CodeUnitLoader};
use crate::runtime::registry::{object_module_name, ModuleRegistry};
use std::path::{Path, PathBuf};

/// An extension resident in this process for the rest of its life.
#[derive(Debug)]
pub struct ResidentExtension<U> {
    pub name: String,
    pub origin: PathBuf,
    /// Keeps the object mapped; never dropped before exit.
    pub unit: U,
}

pub struct Preloader<'a, L: CodeUnitLoader> {
    loader: &'a L,
    search_paths: &'a [PathBuf],
    suffix: &'a str,
    policy: PreloadPolicy,
}

impl<'a, L: CodeUnitLoader> Preloader<'a, L> {
    pub fn new(loader: &'a L, search_paths: &'a [PathBuf], suffix: &'a str, policy: PreloadPolicy) -> Self {
        Self {
            loader,
            search_paths,
            suffix,
            policy,
        }
    }

    /// Load every name in `modules`.
    pub fn preload(&self, modules: &ExtensionModuleSet) -> Result<Vec<ResidentExtension<L::Unit>>> {
        let mut resident = Vec::with_capacity(modules.len());
        let mut failures: Vec<(String, String)> = Vec::new();

        for name in modules.iter() {
            match self.preload_one(name) {
                Ok(extension) => resident.push(extension),
                Err(reason) => {
                    if self.policy == PreloadPolicy::FailFast {
                        return Err(JailError::Load {
                            name: name.to_string(),
                            reason,
                        });
                    }
                    log::warn!("Failed to preload {}: {}", name, reason);
                    failures.push((name.to_string(), reason));
                }
            }
        }

        if !failures.is_empty() {
            let names: Vec<&str> = failures.iter().map(|(n, _)| n.as_str()).collect();
            let reasons: Vec<String> = failures.iter().map(|(n, r)| format!("{}: {}", n, r)).collect();
            return Err(JailError::Load {
                name: names.join(", "),
                reason: reasons.join("; "),
            });
        }

        log::info!("Preloaded {} native extensions", resident.len());
        Ok(resident)
    }

    fn preload_one(&self, name: &str) -> std::result::Result<ResidentExtension<L::Unit>, String> {
        let origin = if is_loader_name(name) {
            PathBuf::from(name)
        } else {
            resolve_module(name, self.search_paths, Some(self.suffix))
                .ok_or_else(|| format!("no module named {}", name))?
        };

        let unit = self
            .loader
            .load(Path::new(&origin), Binding::Global)
            .map_err(|e| e.to_string())?;
        log::debug!("Preloaded {} from {}", name, origin.display());

        Ok(ResidentExtension {
            name: name.to_string(),
            origin,
            unit,
        })
    }
}

/// Bind each resident extension in `registry`. Names handed straight to the
/// loader are bound under their object's module name.
pub fn register_resident<U>(registry: &mut ModuleRegistry, resident: &[ResidentExtension<U>]) {
    for extension in resident {
        let name = if is_loader_name(&extension.name) {
            object_module_name(&extension.origin).unwrap_or_else(|| extension.name.clone())
        } else {
            extension.name.clone()
        };
        registry.register(name, extension.origin.clone());
    }
}
