//! Type-state orchestration of one jailed call.
//!
//! The chain is fixed:
//!
//! `Configuring -> Configured -> Preloaded -> Discovered -> Staged -> launch()`
//!
//! Every step consumes the previous state, so extensions are always resident
//! and the search paths always discovered before the process forks, and the
//! staging tree is cloned at most once per caller.
//!
//! ```no_run
//! use jailcall::config::loader::CallerConfig;
//! use jailcall::config::types::TargetInvocation;
//! use jailcall::exec::caller::ChrootCaller;
//!
//! fn main() -> jailcall::config::types::Result<()> {
//!     let invocation = TargetInvocation::new("/srv/jail", "/opt/units/hello.so").with_func("greet");
//!     let handle = ChrootCaller::new(invocation, CallerConfig::default())
//!         .configure()?
//!         .preload()?
//!         .discover()
//!         .stage()?
//!         .launch()?;
//!     println!("launched {}", handle.pid());
//!     Ok(())
//! }
//! ```
//!
//! Launching before staging does not compile:
//!
//! ```compile_fail
//! use jailcall::config::loader::CallerConfig;
//! use jailcall::config::types::TargetInvocation;
//! use jailcall::exec::caller::ChrootCaller;
//!
//! let discovered = ChrootCaller::new(TargetInvocation::new("/", "hello.so"), CallerConfig::default())
//!     .configure()
//!     .unwrap()
//!     .preload()
//!     .unwrap()
//!     .discover();
//! let _ = discovered.launch();
//! ```
//!
//! Neither does discovering before preloading:
//!
//! ```compile_fail
//! use jailcall::config::loader::CallerConfig;
//! use jailcall::config::types::TargetInvocation;
//! use jailcall::exec::caller::ChrootCaller;
//!
//! let configured = ChrootCaller::new(TargetInvocation::new("/", "hello.so"), CallerConfig::default())
//!     .configure()
//!     .unwrap();
//! let _ = configured.discover();
//! ```
//!
//! Or staging twice with the same caller:
//!
//! ```compile_fail
//! use jailcall::config::loader::CallerConfig;
//! use jailcall::config::types::TargetInvocation;
//! use jailcall::exec::caller::ChrootCaller;
//!
//! let discovered = ChrootCaller::new(TargetInvocation::new("/", "hello.so"), CallerConfig::default())
//!     .configure()
//!     .unwrap()
//!     .preload()
//!     .unwrap()
//!     .discover();
//! let _first = discovered.stage();
//! let _second = discovered.stage();
//! ```

use crate::config::loader::CallerConfig;
use crate::config::types::{ExtensionModuleSet, JailError, Result, TargetInvocation};
use crate::exec::child::{child_main, ChildHandle, ChildPlan};
use crate::kernel::chroot::validate_jail_root;
use crate::runtime::catalog::{build_catalog, ExtensionCatalog};
use crate::runtime::loader::{CodeUnitLoader, SharedObjectLoader};
use crate::runtime::preload::{register_resident, Preloader, ResidentExtension};
use crate::runtime::registry::ModuleRegistry;
use crate::runtime::search::{collect_search_entries, RuntimeContext, RuntimeSearchPathList};
use crate::staging::{CloneReport, LibraryCloner};
use nix::unistd::{fork, ForkResult};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

/// Type-state marker: invocation and configuration accepted
pub struct Configuring;

/// Type-state marker: extension module set is final
pub struct Configured;

/// Type-state marker: extensions resident, target name checked
pub struct Preloaded;

/// Type-state marker: search paths and catalog known
pub struct Discovered;

/// Type-state marker: libraries staged inside the jail root
pub struct Staged;

/// Orchestrator for one call of a target unit inside a jail root.
pub struct ChrootCaller<S, L: CodeUnitLoader = SharedObjectLoader> {
    invocation: TargetInvocation,
    config: CallerConfig,
    loader: L,
    run_id: String,
    modules: ExtensionModuleSet,
    entries: Vec<PathBuf>,
    resident: Vec<ResidentExtension<L::Unit>>,
    registry: ModuleRegistry,
    module: String,
    search_paths: RuntimeSearchPathList,
    catalog: ExtensionCatalog,
    jail_root: PathBuf,
    clone_report: Option<CloneReport>,
    _state: PhantomData<S>,
}

impl ChrootCaller<Configuring> {
    /// Caller backed by the process's dynamic loader
    pub fn new(invocation: TargetInvocation, config: CallerConfig) -> Self {
        Self::with_loader(invocation, config, SharedObjectLoader)
    }
}

impl<L: CodeUnitLoader> ChrootCaller<Configuring, L> {
    pub fn with_loader(invocation: TargetInvocation, config: CallerConfig, loader: L) -> Self {
        let run_id = uuid::Uuid::new_v4().to_string();
        let entries = collect_search_entries(&config);
        log::debug!(
            "[{}] {} search entries for {}",
            run_id,
            entries.len(),
            invocation.cmd.display()
        );

        Self {
            jail_root: invocation.root.clone(),
            invocation,
            config,
            loader,
            run_id,
            modules: ExtensionModuleSet::baseline(),
            entries,
            resident: Vec::new(),
            registry: ModuleRegistry::new(),
            module: String::new(),
            search_paths: RuntimeSearchPathList::default(),
            catalog: ExtensionCatalog::default(),
            clone_report: None,
            _state: PhantomData,
        }
    }

    /// Merge the extra module list, if one was given, into the baseline set.
    pub fn configure(mut self) -> Result<ChrootCaller<Configured, L>> {
        if let Some(list) = self.invocation.modules.clone() {
            self.modules.merge_file(&list)?;
            log::info!(
                "[{}] Extension set has {} names after merging {}",
                self.run_id,
                self.modules.len(),
                list.display()
            );
        }
        Ok(self.into_state())
    }
}

impl<L: CodeUnitLoader> ChrootCaller<Configured, L> {
    /// Make every extension resident, then make sure the target module name
    /// is not already bound in this process.
    pub fn preload(mut self) -> Result<ChrootCaller<Preloaded, L>> {
        let resident = Preloader::new(
            &self.loader,
            &self.entries,
            &self.config.extension_suffix,
            self.config.preload_policy,
        )
        .preload(&self.modules)?;

        let mut registry = ModuleRegistry::from_host();
        register_resident(&mut registry, &resident);

        let module = self.invocation.module_name()?;
        if let Some(origin) = registry.origin_of(&module) {
            log::error!(
                "[{}] Target {} clashes with {}",
                self.run_id,
                module,
                origin.display()
            );
            return Err(JailError::NameClash {
                module,
                origin: origin.display().to_string(),
            });
        }

        self.resident = resident;
        self.registry = registry;
        self.module = module;
        Ok(self.into_state())
    }
}

impl<L: CodeUnitLoader> ChrootCaller<Preloaded, L> {
    /// Select the distinct search paths and index the extensions under them.
    pub fn discover(mut self) -> ChrootCaller<Discovered, L> {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        self.search_paths = RuntimeSearchPathList::select(&self.entries, &cwd);
        self.catalog = build_catalog(&self.search_paths, &self.config.extension_suffix);
        log::info!(
            "[{}] {} distinct search paths, {} extensions indexed",
            self.run_id,
            self.search_paths.len(),
            self.catalog.len()
        );
        self.into_state()
    }
}

impl<L: CodeUnitLoader> ChrootCaller<Discovered, L> {
    pub fn catalog(&self) -> &ExtensionCatalog {
        &self.catalog
    }

    /// The run should end after printing the catalog.
    pub fn is_list_only(&self) -> bool {
        self.invocation.list_modules
    }

    pub fn search_paths(&self) -> &RuntimeSearchPathList {
        &self.search_paths
    }

    /// Clone the search paths under the jail root unless already staged.
    pub fn stage(mut self) -> Result<ChrootCaller<Staged, L>> {
        self.jail_root = validate_jail_root(&self.invocation.root)?;
        let cloner = LibraryCloner::new(&self.jail_root, &self.config.staging_prefix);
        let report = cloner.clone_tree(&self.search_paths)?;
        log::debug!("[{}] {:?}", self.run_id, report);
        self.clone_report = Some(report);
        Ok(self.into_state())
    }
}

impl<L: CodeUnitLoader> ChrootCaller<Staged, L> {
    pub fn clone_report(&self) -> Option<&CloneReport> {
        self.clone_report.as_ref()
    }

    /// Fork. The child enters the jail and calls the entry point; the parent
    /// gets the handle back at once.
    pub fn launch(self) -> Result<ChildHandle> {
        let plan = ChildPlan {
            run_id: self.run_id.clone(),
            jail_root: self.jail_root.clone(),
            module: self.module.clone(),
            module_dir: self.invocation.module_dir().map(Path::to_path_buf),
            entry_point: self.invocation.func.clone(),
            args: self.invocation.args.clone(),
            host_context: RuntimeContext::host(
                self.entries.clone(),
                &self.jail_root,
                &self.config.staging_prefix,
            ),
            distinct: self.search_paths.clone(),
            staging_prefix: self.config.staging_prefix.clone(),
            extension_suffix: self.config.extension_suffix.clone(),
        };

        match unsafe { fork() }
            .map_err(|e| JailError::Process(format!("fork failed: {}", e)))?
        {
            ForkResult::Child => child_main(&plan, &self.loader),
            ForkResult::Parent { child } => {
                log::info!(
                    "[{}] Launched {}.{} in {} as pid {}",
                    self.run_id,
                    plan.module,
                    plan.entry_point,
                    plan.jail_root.display(),
                    child
                );
                // Resident extensions stay mapped until this process exits.
                std::mem::forget(self.resident);
                Ok(ChildHandle::from_pid(child))
            }
        }
    }
}

impl<S, L: CodeUnitLoader> ChrootCaller<S, L> {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn invocation(&self) -> &TargetInvocation {
        &self.invocation
    }

    pub fn config(&self) -> &CallerConfig {
        &self.config
    }

    pub fn modules(&self) -> &ExtensionModuleSet {
        &self.modules
    }

    /// Names of the extensions resident so far, in load order.
    pub fn resident_names(&self) -> Vec<&str> {
        self.resident.iter().map(|r| r.name.as_str()).collect()
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    fn into_state<T>(self) -> ChrootCaller<T, L> {
        ChrootCaller {
            invocation: self.invocation,
            config: self.config,
            loader: self.loader,
            run_id: self.run_id,
            modules: self.modules,
            entries: self.entries,
            resident: self.resident,
            registry: self.registry,
            module: self.module,
            search_paths: self.search_paths,
            catalog: self.catalog,
            jail_root: self.jail_root,
            clone_report: self.clone_report,
            _state: PhantomData,
        }
    }
}
