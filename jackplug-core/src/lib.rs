//! jackplug-core: host-side runtime for the jackplug plugin manager
//!
//! This crate provides the infrastructure for managing self-describing
//! shared-library plugins:
//!
//! - [`PluginManager`]: searching directories, resolving inter-plugin
//!   dependencies, loading in topological order and unloading in reverse
//! - [`broker`]: the process-wide request dispatch handed to every plugin
//! - [`ReturnCode`]: the fixed outcome taxonomy of every manager operation
//!
//! # Plugin discovery
//!
//! A plugin is any shared library exporting `jp_name`, `jp_metadata` and
//! `jp_createPlugin` (see the `jackplug-plugin-api` crate, whose
//! `declare_plugin!` macro emits all three). Discovery only reads names and
//! metadata; construction happens in [`PluginManager::load_all`], after the
//! dependency graph has been validated and ordered.
//!
//! # Example
//!
//! ```no_run
//! use jackplug_core::{PluginManager, ReturnCode};
//!
//! let manager = PluginManager::instance();
//! manager.search_for_plugins(&jackplug_paths::user_plugins_dir(), false, None);
//! let code = manager.load_all(true, Some(&mut |code: ReturnCode, detail| {
//!     eprintln!("{code}: {detail:?}");
//! }));
//! assert!(code.is_success());
//! // ...
//! manager.unload_all(None);
//! ```

pub mod broker;
pub mod error;
pub mod metadata;
pub mod version;

mod dynlib;
mod fsutil;
mod graph;
mod manager;
mod record;
mod registry;

pub use dynlib::{DynLib, DynLibError};
pub use error::{Callback, ReturnCode};
pub use fsutil::library_extension;
pub use manager::PluginManager;
pub use metadata::{DependencySpec, MetadataError, PluginDescriptor, parse_metadata};
pub use version::PluginVersion;
