use crate::config::loader::CallerConfig;
use crate::config::types::{JailError, TargetInvocation, DEFAULT_ENTRY_POINT};
use crate::exec::caller::ChrootCaller;
use crate::runtime::catalog::ExtensionCatalog;
use crate::runtime::loader::{CodeUnitLoader, SharedObjectLoader};
use anyhow::Result;
use clap::{CommandFactory, Parser};
use std::io::Write;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Jail root directory
    #[arg(short = 'r', long = "root", default_value = "/")]
    root: PathBuf,

    /// Shared object to run inside the jail
    #[arg(short = 'c', long = "cmd")]
    cmd: Option<PathBuf>,

    /// Entry point to call
    #[arg(short = 'f', long = "func", default_value = DEFAULT_ENTRY_POINT)]
    func: String,

    /// File listing extra native extensions to preload, one per line
    #[arg(short = 'm', long = "modules")]
    modules: Option<PathBuf>,

    /// Print the native extensions found on the search paths and exit
    #[arg(short = 'l', long = "list-modules")]
    list_modules: bool,

    /// File made visible to the entry point through JAILCALL_ARGS
    #[arg(short = 'j', long = "args")]
    args: Option<PathBuf>,

    /// Wait for the child and exit with its status
    #[arg(short = 'w', long = "wait")]
    wait: bool,

    /// Print the module list as a JSON array
    #[arg(long)]
    json: bool,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Cli {
    fn invocation(&self, cmd: PathBuf) -> TargetInvocation {
        let mut invocation = TargetInvocation::new(&self.root, cmd)
            .with_func(&self.func)
            .with_list_modules(self.list_modules);
        if let Some(modules) = &self.modules {
            invocation = invocation.with_modules(modules);
        }
        if let Some(args) = &self.args {
            invocation = invocation.with_args(args);
        }
        invocation
    }
}

pub fn run() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let cmd = match require_cmd(&cli) {
        Ok(cmd) => cmd,
        Err(usage) => {
            eprintln!("{}", usage);
            std::process::exit(1);
        }
    };

    match execute(&cli, cmd, SharedObjectLoader) {
        Ok(0) => Ok(()),
        Ok(code) => {
            let _ = std::io::stdout().flush();
            std::process::exit(code);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(e.exit_code());
        }
    }
}

/// The target to run, or the usage text when `--cmd` is missing.
fn require_cmd(cli: &Cli) -> std::result::Result<PathBuf, String> {
    cli.cmd
        .clone()
        .ok_or_else(|| Cli::command().render_usage().to_string())
}

/// Run one invocation and return the process exit status.
fn execute<L: CodeUnitLoader>(cli: &Cli, cmd: PathBuf, loader: L) -> std::result::Result<i32, JailError> {
    let config = CallerConfig::load(cli.config.as_deref())?;
    let wait = cli.wait || config.wait;

    let discovered = ChrootCaller::with_loader(cli.invocation(cmd), config, loader)
        .configure()?
        .preload()?
        .discover();

    if discovered.is_list_only() {
        print!("{}", render_catalog(discovered.catalog(), cli.json)?);
        return Ok(1);
    }

    let handle = discovered.stage()?.launch()?;
    if !wait {
        return Ok(0);
    }

    let outcome = handle.wait()?;
    log::info!("Child finished: {:?}", outcome);
    Ok(outcome.exit_code())
}

fn render_catalog(catalog: &ExtensionCatalog, json: bool) -> std::result::Result<String, JailError> {
    if json {
        serde_json::to_string_pretty(catalog)
            .map(|json| json + "\n")
            .map_err(|e| JailError::Config(format!("Failed to serialize module list: {}", e)))
    } else {
        Ok(catalog.render())
    }
}
