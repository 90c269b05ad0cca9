//! Integration tests for the caller chain up to the fork
//!
//! A recording loader stands in for the dynamic loader so nothing is mapped
//! into the test process.

use jailcall::config::loader::CallerConfig;
use jailcall::config::types::{JailError, PreloadPolicy, TargetInvocation};
use jailcall::exec::caller::ChrootCaller;
use jailcall::runtime::loader::{Binding, CodeUnit, CodeUnitLoader, UnitError};
use jailcall::staging::LibraryCloner;
use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

#[derive(Default)]
struct Journal {
    loads: Vec<PathBuf>,
    invokes: Vec<String>,
}

struct RecordedUnit {
    origin: PathBuf,
    journal: Rc<RefCell<Journal>>,
}

impl CodeUnit for RecordedUnit {
    fn origin(&self) -> &Path {
        &self.origin
    }

    fn invoke(&self, symbol: &str) -> Result<(), UnitError> {
        self.journal.borrow_mut().invokes.push(symbol.to_string());
        Ok(())
    }
}

#[derive(Clone, Default)]
struct RecordingLoader {
    journal: Rc<RefCell<Journal>>,
}

impl CodeUnitLoader for RecordingLoader {
    type Unit = RecordedUnit;

    fn load(&self, path: &Path, _binding: Binding) -> Result<RecordedUnit, UnitError> {
        self.journal.borrow_mut().loads.push(path.to_path_buf());
        if path.to_string_lossy().contains("unloadable") {
            return Err(UnitError::Open {
                path: path.to_path_buf(),
                reason: "invalid ELF header".to_string(),
            });
        }
        Ok(RecordedUnit {
            origin: path.to_path_buf(),
            journal: self.journal.clone(),
        })
    }
}

fn scratch(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("jailcall-it-{}-{}", tag, uuid::Uuid::new_v4()));
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn config_for(search: &Path) -> CallerConfig {
    CallerConfig {
        search_paths: Some(vec![search.to_path_buf()]),
        ..CallerConfig::default()
    }
}

#[test]
fn test_preloaded_name_clash_stops_before_staging() {
    let search = scratch("clash-search");
    let jail = scratch("clash-jail");
    fs::write(search.join("hello.so"), b"").unwrap();
    let list = search.join("modules.txt");
    fs::write(&list, "hello\n").unwrap();

    let loader = RecordingLoader::default();
    let invocation = TargetInvocation::new(&jail, "/units/hello.so")
        .with_func("greet")
        .with_modules(&list);
    let err = ChrootCaller::with_loader(invocation, config_for(&search), loader.clone())
        .configure()
        .unwrap()
        .preload()
        .err()
        .expect("name clash must abort the run");

    match err {
        JailError::NameClash { module, origin } => {
            assert_eq!(module, "hello");
            assert_eq!(origin, search.join("hello.so").display().to_string());
        }
        other => panic!("unexpected error: {other}"),
    }

    let staging_root = LibraryCloner::new(&jail, &CallerConfig::default().staging_prefix).staging_root();
    assert!(!staging_root.exists(), "nothing may be staged after a clash");
    assert!(loader.journal.borrow().invokes.is_empty());

    let _ = fs::remove_dir_all(&search);
    let _ = fs::remove_dir_all(&jail);
}

#[test]
fn test_unreadable_module_list_aborts_before_loading() {
    let search = scratch("list-search");
    let loader = RecordingLoader::default();
    let invocation = TargetInvocation::new("/", "hello.so").with_modules(search.join("missing.txt"));

    let err = ChrootCaller::with_loader(invocation, config_for(&search), loader.clone())
        .configure()
        .err()
        .expect("missing list must fail");

    match err {
        JailError::Config(message) => {
            assert!(message.contains("Unable to access list of extra modules to load"));
            assert!(message.contains("missing.txt"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(loader.journal.borrow().loads.is_empty());

    let _ = fs::remove_dir_all(&search);
}

#[test]
fn test_list_only_catalog_is_sorted_and_nothing_runs() {
    let search = scratch("list-only");
    let site = search.join("python3/site-packages/pkg/sub");
    let dynload = search.join("python3/lib-dynload");
    fs::create_dir_all(&site).unwrap();
    fs::create_dir_all(&dynload).unwrap();
    fs::write(site.join("_native.cpython-311.so"), b"").unwrap();
    fs::write(dynload.join("zlib.cpython-311.so"), b"").unwrap();
    fs::write(dynload.join("math.cpython-311.so"), b"").unwrap();
    fs::write(dynload.join("README"), b"").unwrap();

    let loader = RecordingLoader::default();
    let invocation = TargetInvocation::new("/", "hello.so").with_list_modules(true);
    let discovered = ChrootCaller::with_loader(invocation, config_for(&search), loader.clone())
        .configure()
        .unwrap()
        .preload()
        .unwrap()
        .discover();

    assert!(discovered.is_list_only());
    assert_eq!(discovered.catalog().names(), &["math", "pkg.sub._native", "zlib"]);
    assert!(loader.journal.borrow().invokes.is_empty());

    let _ = fs::remove_dir_all(&search);
}

#[test]
fn test_collect_all_policy_names_every_failure() {
    let search = scratch("collect");
    let list = search.join("modules.txt");
    fs::write(&list, "/opt/unloadable-a.so\n/opt/unloadable-b.so\n/opt/fine.so\n").unwrap();

    let mut config = config_for(&search);
    config.preload_policy = PreloadPolicy::CollectAll;
    let loader = RecordingLoader::default();
    let invocation = TargetInvocation::new("/", "hello.so").with_modules(&list);

    let err = ChrootCaller::with_loader(invocation, config, loader.clone())
        .configure()
        .unwrap()
        .preload()
        .err()
        .expect("unloadable extensions must fail");

    match err {
        JailError::Load { name, .. } => {
            assert!(name.contains("/opt/unloadable-a.so"));
            assert!(name.contains("/opt/unloadable-b.so"));
            assert!(!name.contains("fine"));
        }
        other => panic!("unexpected error: {other}"),
    }
    // Baseline plus the three listed names were all attempted.
    assert_eq!(loader.journal.borrow().loads.len(), 6);

    let _ = fs::remove_dir_all(&search);
}

#[test]
fn test_second_staging_pass_is_skipped() {
    let search = scratch("stage-search");
    fs::create_dir_all(search.join("nested")).unwrap();
    fs::write(search.join("nested/libdemo.so.1"), b"v1").unwrap();
    let jail = scratch("stage-jail");

    let stage = || {
        ChrootCaller::with_loader(
            TargetInvocation::new(&jail, "hello.so"),
            config_for(&search),
            RecordingLoader::default(),
        )
        .configure()
        .unwrap()
        .preload()
        .unwrap()
        .discover()
        .stage()
        .unwrap()
    };

    let first = stage();
    let first_report = first.clone_report().unwrap().clone();
    assert!(!first_report.skipped);
    assert_eq!(first_report.files, 1);

    fs::write(search.join("nested/libdemo.so.1"), b"v2").unwrap();
    let second = stage();
    assert!(second.clone_report().unwrap().skipped);

    let staged = LibraryCloner::new(&jail, &first.config().staging_prefix)
        .staged_location(&search.join("nested/libdemo.so.1"));
    assert_eq!(fs::read(staged).unwrap(), b"v1");

    let _ = fs::remove_dir_all(&search);
    let _ = fs::remove_dir_all(&jail);
}
