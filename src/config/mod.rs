//! Configuration and invocation types
//!
//! Error taxonomy, per-run values, the JSON configuration file and the
//! extra-module list.

pub mod loader;
pub mod module_list;
pub mod types;
