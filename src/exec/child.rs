/// Child side of the fork and the handle the parent keeps
use crate::config::types::{JailError, Result, ARGS_ENV_VAR};
use crate::kernel::chroot::enter_jail;
use crate::kernel::credentials::reassert_real_identity;
use crate::runtime::loader::{
    load_dependencies, resolve_module, Binding, CodeUnit, CodeUnitLoader, UnitError,
};
use crate::runtime::search::{RuntimeContext, RuntimeSearchPathList};
use nix::errno::Errno;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use std::io::Write;
use std::path::PathBuf;

/// How the child ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChildOutcome {
    Exited(i32),
    Signaled(i32),
}

impl ChildOutcome {
    /// The entry point returned normally.
    pub fn success(&self) -> bool {
        matches!(self, ChildOutcome::Exited(0))
    }

    /// Shell-style status: the exit code, or 128 + signal number.
    pub fn exit_code(&self) -> i32 {
        match self {
            ChildOutcome::Exited(code) => *code,
            ChildOutcome::Signaled(sig) => 128 + sig,
        }
    }
}

/// A launched child. Holding it means the launch was accepted, nothing more.
#[derive(Debug)]
pub struct ChildHandle {
    pid: Pid,
}

impl ChildHandle {
    pub(crate) fn from_pid(pid: Pid) -> Self {
        Self { pid }
    }

    pub fn pid(&self) -> i32 {
        self.pid.as_raw()
    }

    /// Block until the child terminates.
    pub fn wait(self) -> Result<ChildOutcome> {
        loop {
            match waitpid(self.pid, None) {
                Ok(status) => {
                    if let Some(outcome) = outcome_of(status) {
                        return Ok(outcome);
                    }
                }
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    return Err(JailError::Process(format!(
                        "waitpid({}) failed: {}",
                        self.pid, e
                    )))
                }
            }
        }
    }

    /// Outcome if the child already terminated.
    pub fn try_wait(&self) -> Result<Option<ChildOutcome>> {
        match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(status) => Ok(outcome_of(status)),
            Err(Errno::EINTR) => Ok(None),
            Err(e) => Err(JailError::Process(format!(
                "waitpid({}) failed: {}",
                self.pid, e
            ))),
        }
    }
}

fn outcome_of(status: WaitStatus) -> Option<ChildOutcome> {
    match status {
        WaitStatus::Exited(_, code) => Some(ChildOutcome::Exited(code)),
        WaitStatus::Signaled(_, sig, _) => Some(ChildOutcome::Signaled(sig as i32)),
        _ => None,
    }
}

/// Everything the child needs, computed by the parent before the fork.
#[derive(Clone, Debug)]
pub struct ChildPlan {
    pub run_id: String,
    pub jail_root: PathBuf,
    pub module: String,
    pub module_dir: Option<PathBuf>,
    pub entry_point: String,
    pub args: Option<PathBuf>,
    pub host_context: RuntimeContext,
    pub distinct: RuntimeSearchPathList,
    pub staging_prefix: PathBuf,
    pub extension_suffix: String,
}

/// Enter the jail and run the entry point. Only valid in the forked child.
pub fn run_in_jail<L: CodeUnitLoader>(plan: &ChildPlan, loader: &L) -> Result<()> {
    enter_jail(&plan.jail_root)?;
    reassert_real_identity()?;

    let context = plan.host_context.inside_jail(
        plan.module_dir.as_deref(),
        &plan.distinct,
        &plan.staging_prefix,
    );
    log::debug!(
        "[{}] Inside jail at {} (staged under {}), search paths: {:?}",
        plan.run_id,
        context.cwd.display(),
        context.staging_root.display(),
        context.search_paths
    );

    if let Some(args) = &plan.args {
        std::env::set_var(ARGS_ENV_VAR, args);
    }

    load_and_invoke(
        &plan.module,
        &plan.entry_point,
        &context.search_paths,
        &plan.extension_suffix,
        loader,
    )
}

/// Resolve `module` on `search_paths`, load it and call `entry_point`.
pub fn load_and_invoke<L: CodeUnitLoader>(
    module: &str,
    entry_point: &str,
    search_paths: &[PathBuf],
    suffix: &str,
    loader: &L,
) -> Result<()> {
    let path = resolve_module(module, search_paths, Some(suffix)).ok_or_else(|| JailError::ChildImport {
        module: module.to_string(),
        reason: format!("No module named '{}'", module),
    })?;

    // Anything the target links against that sits only in a staged directory
    // has to be resident before the target itself is opened.
    let _dependencies = load_dependencies(loader, &path, search_paths).map_err(|e| JailError::ChildImport {
        module: module.to_string(),
        reason: e.to_string(),
    })?;

    let unit = loader
        .load(&path, Binding::Local)
        .map_err(|e| JailError::ChildImport {
            module: module.to_string(),
            reason: e.to_string(),
        })?;

    log::info!(
        "Calling {}.{} from {}",
        module,
        entry_point,
        unit.origin().display()
    );
    unit.invoke(entry_point).map_err(|e| match e {
        UnitError::MissingSymbol { symbol, reason } => JailError::EntryPoint {
            module: module.to_string(),
            symbol,
            reason,
        },
        other => JailError::ChildImport {
            module: module.to_string(),
            reason: other.to_string(),
        },
    })
}

/// Body of the forked child. Never returns.
pub fn child_main<L: CodeUnitLoader>(plan: &ChildPlan, loader: &L) -> ! {
    let code = match run_in_jail(plan, loader) {
        Ok(()) => 0,
        Err(e) => {
            let _ = writeln!(std::io::stderr(), "Error: {}", e);
            e.exit_code()
        }
    };

    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();
    // SAFETY: _exit skips atexit handlers and destructors inherited from the
    // parent's image, which belong to the parent.
    unsafe { libc::_exit(code) }
}
