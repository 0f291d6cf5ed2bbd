//! # Plugin Managers
//!
//! [`AbstractManager`] owns all the state of one plugin interface: the
//! plugins discovered in its directory or adopted from the static registry,
//! the alias table, user preferences and links to external managers. The
//! operations are available through [`ManagerRef`], a cheap handle the
//! manager derefs to and that plugin instances can obtain from their
//! [`PluginBase`](crate::PluginBase). [`Manager`] is the typed facade that
//! adds instantiation for one interface.
//!
//! Dropping an [`AbstractManager`] unloads all its plugins, dependents first,
//! and runs the finalizers of its static plugins. A manager registered as
//! external by another one has to outlive it.
pub(crate) mod state;
pub(crate) mod lifecycle;
mod typed;

use std::fmt;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{error, warn};
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};

use self::state::{offers, ManagerCore, SharedCore};
use crate::constants::{DEFAULT_METADATA_SUFFIX, DEFAULT_PLUGIN_SUFFIX};
use crate::load_state::LoadState;
use crate::loader::{LibraryLoader, NativeLoader};
use crate::metadata::PluginMetadata;

pub use typed::{Manager, ManagerBuilder};

/// Borrow of a plugin's metadata. The manager is locked while it lives, so
/// any other call on the same manager from this thread deadlocks until it is
/// dropped. Use [`ManagerRef::with_metadata`] to keep the borrow scoped.
pub type MetadataGuard<'a> = MappedMutexGuard<'a, PluginMetadata>;

/// Everything needed to construct an untyped manager.
#[derive(Clone)]
pub struct ManagerSettings {
    pub interface: &'static str,
    pub plugin_suffix: &'static str,
    pub metadata_suffix: &'static str,
    /// Explicit plugin directory. Takes precedence over `search_paths`.
    pub plugin_directory: Option<PathBuf>,
    /// Candidate directories, the first existing one is used.
    pub search_paths: Vec<PathBuf>,
    pub loader: Arc<dyn LibraryLoader>,
}

impl ManagerSettings {
    pub fn new(interface: &'static str) -> Self {
        Self {
            interface,
            plugin_suffix: DEFAULT_PLUGIN_SUFFIX,
            metadata_suffix: DEFAULT_METADATA_SUFFIX,
            plugin_directory: None,
            search_paths: Vec::new(),
            loader: Arc::new(NativeLoader),
        }
    }
}

impl fmt::Debug for ManagerSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagerSettings")
            .field("interface", &self.interface)
            .field("plugin_suffix", &self.plugin_suffix)
            .field("metadata_suffix", &self.metadata_suffix)
            .field("plugin_directory", &self.plugin_directory)
            .field("search_paths", &self.search_paths)
            .finish()
    }
}

/// Non-owning handle to a manager.
#[derive(Clone)]
pub struct ManagerRef {
    core: SharedCore,
}

impl ManagerRef {
    pub(crate) fn from_core(core: SharedCore) -> Self {
        Self { core }
    }

    pub(crate) fn core(&self) -> &SharedCore {
        &self.core
    }

    pub fn plugin_interface(&self) -> &'static str {
        self.core.lock().interface
    }

    pub fn plugin_suffix(&self) -> &'static str {
        self.core.lock().plugin_suffix
    }

    pub fn plugin_metadata_suffix(&self) -> &'static str {
        self.core.lock().metadata_suffix
    }

    /// Directory plugins are discovered in, if any.
    pub fn plugin_directory(&self) -> Option<PathBuf> {
        self.core.lock().directory.clone()
    }

    /// Switch to another plugin directory and rescan it. Loaded plugins are
    /// kept.
    pub fn set_plugin_directory(&self, directory: impl AsRef<Path>) {
        let mut guard = self.core.lock();
        guard.directory = Some(directory.as_ref().to_path_buf());
        guard.rescan();
    }

    /// Rescan the plugin directory. Plugins that aren't loaded are forgotten
    /// and rediscovered, preferences survive only for loaded plugins.
    pub fn reload_plugin_directory(&self) {
        self.core.lock().rescan();
    }

    /// Canonical names of all known plugins, sorted.
    pub fn plugin_list(&self) -> Vec<String> {
        self.core.lock().plugins.keys().cloned().collect()
    }

    /// Every name and alias plugins can be referred to by, sorted.
    pub fn alias_list(&self) -> Vec<String> {
        self.core.lock().aliases.keys().cloned().collect()
    }

    /// Metadata of the plugin `plugin` resolves to.
    #[must_use = "the manager stays locked while the guard lives"]
    pub fn metadata(&self, plugin: &str) -> Option<MetadataGuard<'_>> {
        MutexGuard::try_map(self.core.lock(), |core| {
            core.entry_mut(plugin).map(|entry| &mut entry.metadata)
        })
        .ok()
    }

    /// Run `f` on the metadata of the plugin `plugin` resolves to, releasing
    /// the manager lock before returning.
    pub fn with_metadata<R>(&self, plugin: &str, f: impl FnOnce(&mut PluginMetadata) -> R) -> Option<R> {
        let mut metadata = self.metadata(plugin)?;
        Some(f(&mut metadata))
    }

    pub fn load_state(&self, plugin: &str) -> LoadState {
        self.core
            .lock()
            .entry(plugin)
            .map_or(LoadState::NotFound, |entry| entry.state)
    }

    /// Load a plugin by name, alias or, if it ends with the plugin suffix, by
    /// file path. Dependencies are loaded first. A failed load leaves no
    /// trace.
    pub fn load(&self, plugin: &str) -> LoadState {
        let suffix = self.plugin_suffix();
        if !suffix.is_empty() && plugin.ends_with(suffix) {
            return lifecycle::load_path(&self.core, Path::new(plugin));
        }
        lifecycle::load(&self.core, plugin)
    }

    /// Unload a plugin. Refused with [`LoadState::Used`] while it has live
    /// instances and with [`LoadState::Required`] while loaded plugins
    /// depend on it.
    pub fn unload(&self, plugin: &str) -> LoadState {
        lifecycle::unload(&self.core, plugin)
    }

    /// Make `alias` resolve to the first of `plugins` that exists and
    /// provides it.
    pub fn set_preferred_plugins(&self, alias: &str, plugins: &[&str]) {
        let mut guard = self.core.lock();
        if !guard.is_alive("set_preferred_plugins") {
            return;
        }
        if !guard.aliases.contains_key(alias) {
            error!("Manager::set_preferred_plugins(): {} is not a known alias", alias);
            return;
        }
        for plugin in plugins {
            let Some(entry) = guard.plugins.get(*plugin) else {
                continue;
            };
            if !offers(entry, plugin, alias) {
                error!("Manager::set_preferred_plugins(): {} does not provide {}", plugin, alias);
                return;
            }
            guard.preferred.insert(alias.to_string(), plugin.to_string());
            guard.rebuild_aliases();
            return;
        }
        warn!(
            "Manager::set_preferred_plugins(): none of {:?} is known, {} stays unchanged",
            plugins, alias
        );
    }

    /// Resolve dependencies also through `other`, which then has to outlive
    /// this manager.
    pub fn register_external_manager(&self, other: &ManagerRef) {
        if Arc::ptr_eq(&self.core, &other.core) {
            error!("Manager::register_external_manager(): a manager can't depend on itself");
            return;
        }
        if !other.core.lock().is_alive("register_external_manager") {
            return;
        }
        let mut guard = self.core.lock();
        if !guard.is_alive("register_external_manager") {
            return;
        }
        if guard
            .externals
            .iter()
            .any(|external| std::ptr::eq(external.as_ptr(), Arc::as_ptr(&other.core)))
        {
            return;
        }
        guard.externals.push(Arc::downgrade(&other.core));
        drop(guard);
        other.core.lock().external_users += 1;
    }

    /// A registered external manager of the given interface.
    pub fn external_manager(&self, interface: &str) -> Option<ManagerRef> {
        let externals = self.core.lock().live_externals();
        externals
            .into_iter()
            .find(|external| external.lock().interface == interface)
            .map(ManagerRef::from_core)
    }
}

impl fmt::Debug for ManagerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = self.core.lock();
        f.debug_struct("ManagerRef")
            .field("interface", &guard.interface)
            .field("plugin_directory", &guard.directory)
            .field("plugins", &guard.plugins.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Untyped manager owning the plugins of one interface.
pub struct AbstractManager {
    handle: ManagerRef,
}

impl AbstractManager {
    pub fn new(settings: ManagerSettings) -> Self {
        let mut core = ManagerCore::new(
            settings.interface,
            settings.plugin_suffix,
            settings.metadata_suffix,
            settings.loader,
        );
        let initializers = core.adopt_static_plugins();

        core.directory = match settings.plugin_directory {
            Some(directory) => Some(directory),
            None if settings.search_paths.is_empty() => {
                warn!("Manager: plugin directory was not set and there are no search paths, skipping plugin discovery");
                None
            }
            None => {
                let found = settings.search_paths.iter().find(|path| path.is_dir()).cloned();
                if found.is_none() {
                    warn!(
                        "Manager: none of the plugin search paths in {:?} exists and plugin directory was not set, skipping plugin discovery",
                        settings.search_paths
                    );
                }
                found
            }
        };
        core.rescan();

        for initializer in initializers {
            initializer();
        }
        Self {
            handle: ManagerRef::from_core(Arc::new(Mutex::new(core))),
        }
    }

    /// Handle to this manager. It may outlive the manager, but once the
    /// manager is dropped it only answers queries: loads, instantiation,
    /// preferences and external registration are refused.
    pub fn handle(&self) -> ManagerRef {
        self.handle.clone()
    }
}

impl Deref for AbstractManager {
    type Target = ManagerRef;

    fn deref(&self) -> &ManagerRef {
        &self.handle
    }
}

impl Drop for AbstractManager {
    fn drop(&mut self) {
        lifecycle::teardown(self.handle.core());
    }
}

impl fmt::Debug for AbstractManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.handle.fmt(f)
    }
}
