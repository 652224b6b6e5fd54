//! mortise-core: host runtime for the mortise plugin system
//!
//! This crate drives the full life of native plugins:
//!
//! - **Discovery** - scan directories for shared libraries exporting the
//!   plugin symbols and ingest their embedded JSON metadata
//! - **Dependency resolution** - version-constrained dependency checks,
//!   cycle detection, topological load ordering
//! - **Lifecycle** - deterministic load/unload with dependency
//!   guarantees and reverse-order teardown
//! - **Request brokering** - C-ABI entry points that let plugins query
//!   the host and let a designated main plugin reach other plugins
//!
//! # Quick Start
//!
//! ```no_run
//! use mortise_core::{PluginManager, ReturnCode};
//!
//! let manager = PluginManager::new();
//! let mut on_error = |code: ReturnCode, detail: Option<&str>| {
//!     eprintln!("{code}: {}", detail.unwrap_or("-"));
//! };
//!
//! manager.search_for_plugins("./plugins".as_ref(), false, Some(&mut on_error));
//! manager.load_plugins(true, Some(&mut on_error));
//!
//! for name in manager.plugins_list() {
//!     println!("{name} loaded: {}", manager.is_plugin_loaded(&name));
//! }
//!
//! manager.unload_plugins(None);
//! ```
//!
//! Plugins are authored against the `mortise-plugin-api` crate, which is
//! re-exported here as [`plugin_api`].

pub mod error;
pub mod graph;
pub mod metadata;
pub mod paths;
pub mod version;

mod broker;
mod library;
mod lifecycle;
mod manager;
mod record;
mod registry;

#[cfg(test)]
mod testutil;

pub use error::{ErrorCallback, MetadataError, ReturnCode, VersionError};
pub use manager::{ManagerConfig, PluginManager};
pub use metadata::{Dependency, PluginMetadata};
pub use record::PluginInstance;
pub use version::Version;

pub use mortise_plugin_api as plugin_api;
