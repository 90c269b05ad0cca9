//! jailcall: run a shared object's entry point inside a chroot jail
//!
//! Native libraries the target may need are loaded before the root changes,
//! and the library search directories are copied into the jail so that
//! dependent lookups still resolve after it.
//!
//! # Architecture
//!
//! ## Configuration ([`config`])
//! - [`config::types`]: Error enum, invocation and extension set
//! - [`config::loader`]: JSON configuration with defaults
//! - [`config::module_list`]: Extra extension names from a list file
//!
//! ## Runtime Introspection ([`runtime`])
//! - [`runtime::search`]: Search path discovery, selection and in-jail remapping
//! - [`runtime::loader`]: Code unit loading through the dynamic loader
//! - [`runtime::preload`]: Making extensions resident before the fork
//! - [`runtime::registry`]: Names already bound in the host process
//! - [`runtime::catalog`]: Dotted names of the extensions on the search paths
//!
//! ## Staging ([`staging`])
//! - [`staging::clone`]: Copy of the search directories under the jail root
//!
//! ## Kernel Primitives ([`kernel`])
//! - [`kernel::chroot`]: Root transition
//! - [`kernel::credentials`]: Real identity re-assertion
//!
//! ## Execution Control ([`exec`])
//! - [`exec::caller`]: Type-state orchestration up to the fork
//! - [`exec::child`]: Child-side sequence and the parent's handle
//!
//! # Design Principles
//!
//! 1. **Resident before confined** - Nothing is loaded from host paths after chroot
//! 2. **Types prevent errors** - The launch order is a type-state chain
//! 3. **Recompute, don't patch** - Path-dependent state is rebuilt inside the jail

// Configuration
pub mod config;

// Runtime Introspection
pub mod runtime;

// Staging
pub mod staging;

// Kernel Primitives
pub mod kernel;

// Execution Control
pub mod exec;

// CLI entrypoint wiring for the jailcall binary.
pub mod cli;

pub use config::types::*;
