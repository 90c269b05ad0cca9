//! Runtime library model
//!
//! Search path discovery, code unit loading, the host module namespace,
//! native extension preloading and the extension catalog.

pub mod catalog;
pub mod loader;
pub mod preload;
pub mod registry;
pub mod search;
