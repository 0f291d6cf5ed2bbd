//! # Pluginmgr Core
//!
//! A typed registry of plugins discovered from a directory of shared
//! libraries or linked statically into the host. Each plugin interface gets
//! its own [`Manager`], which resolves aliases and dependencies (also across
//! managers of other interfaces), loads and unloads plugin binaries, and keeps
//! track of live instances so a plugin is never unloaded under them.
//!
//! The crate is organised leaves first:
//!
//! - **[`loader`]**: opening shared libraries and looking up exported symbols.
//! - **[`configuration`]**: the sectioned key/value tree read from metadata sidecars.
//! - **[`static_registry`]**: the process-wide list of statically linked plugins.
//! - **[`metadata`]**: per-plugin metadata ([`PluginMetadata`]).
//! - **[`manager`]**: the untyped state machine ([`AbstractManager`]) and the
//!   typed facade ([`Manager`]).
//! - **[`plugin`]**: the base every plugin instance embeds ([`PluginBase`]).
pub mod configuration;
pub mod constants;
pub mod error;
pub mod interface;
pub mod load_state;
pub mod loader;
pub mod macros;
pub mod manager;
pub mod metadata;
pub mod plugin;
pub mod static_registry;

pub use configuration::{ConfigFormat, Configuration};
pub use constants::PLUGIN_VERSION;
pub use error::{PluginManagerError, Result};
pub use interface::PluginInterface;
pub use load_state::LoadState;
pub use loader::{DynamicLibrary, LibraryLoader, NativeLoader};
pub use manager::{AbstractManager, Manager, ManagerBuilder, ManagerRef, ManagerSettings, MetadataGuard};
pub use metadata::PluginMetadata;
pub use plugin::{AbstractPlugin, PluginBase, PluginInstance};
pub use static_registry::{import_static_plugin, static_plugins, StaticPlugin};

#[cfg(all(test, feature = "toml-config"))]
mod tests;
