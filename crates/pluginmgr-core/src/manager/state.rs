//! Untyped manager state: plugin entries, the alias table, preferences and
//! external manager links. Everything here works on one manager only; the
//! operations crossing manager boundaries live in
//! [`lifecycle`](super::lifecycle).
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use log::{error, warn};
use parking_lot::Mutex;

use crate::configuration::ConfigFormat;
use crate::load_state::LoadState;
use crate::loader::{DynamicLibrary, HookFn, InstancerFn, LibraryLoader};
use crate::metadata::PluginMetadata;
use crate::plugin::InstanceCounter;
use crate::static_registry::{static_plugins_for, StaticInstancer, StaticPlugin};

pub(crate) type SharedCore = Arc<Mutex<ManagerCore>>;

static NEXT_MANAGER_ID: AtomicUsize = AtomicUsize::new(1);

#[derive(Clone, Copy)]
pub(crate) enum Instancer {
    Static(StaticInstancer),
    Dynamic(InstancerFn),
}

#[derive(Clone, Copy)]
pub(crate) enum Hook {
    Static(fn()),
    Dynamic(HookFn),
}

impl Hook {
    /// # Safety
    /// A dynamic hook has to come from a library that is still open.
    pub unsafe fn call(self) {
        match self {
            Hook::Static(hook) => hook(),
            Hook::Dynamic(hook) => unsafe { hook() },
        }
    }
}

pub(crate) enum PluginSource {
    Static(&'static StaticPlugin),
    Dynamic { path: PathBuf },
}

/// A resolved dependency, possibly in another manager.
pub(crate) struct DependencyLink {
    pub core: Weak<Mutex<ManagerCore>>,
    pub name: String,
}

impl DependencyLink {
    pub fn new(core: &SharedCore, name: String) -> Self {
        Self {
            core: Arc::downgrade(core),
            name,
        }
    }

    /// Record `dependent` in the dependency's used-by list.
    pub fn attach(&self, dependent: &str) {
        if let Some(core) = self.core.upgrade() {
            if let Some(entry) = core.lock().plugins.get_mut(&self.name) {
                entry.metadata.add_used_by(dependent);
            }
        }
    }

    pub fn detach(&self, dependent: &str) {
        if let Some(core) = self.core.upgrade() {
            if let Some(entry) = core.lock().plugins.get_mut(&self.name) {
                entry.metadata.remove_used_by(dependent);
            }
        }
    }
}

pub(crate) struct PluginEntry {
    pub metadata: PluginMetadata,
    pub state: LoadState,
    pub source: PluginSource,
    pub library: Option<Box<dyn DynamicLibrary>>,
    pub instancer: Option<Instancer>,
    pub finalizer: Option<Hook>,
    pub instances: Arc<InstanceCounter>,
    pub links: Vec<DependencyLink>,
}

impl PluginEntry {
    fn from_static(plugin: &'static StaticPlugin, metadata: PluginMetadata) -> Self {
        Self {
            metadata,
            state: LoadState::Static,
            source: PluginSource::Static(plugin),
            library: None,
            instancer: Some(Instancer::Static(plugin.instancer())),
            finalizer: plugin.finalizer().map(Hook::Static),
            instances: Arc::default(),
            links: Vec::new(),
        }
    }

    pub fn dynamic(path: PathBuf, metadata: PluginMetadata, state: LoadState) -> Self {
        Self {
            metadata,
            state,
            source: PluginSource::Dynamic { path },
            library: None,
            instancer: None,
            finalizer: None,
            instances: Arc::default(),
            links: Vec::new(),
        }
    }
}

pub(crate) struct ManagerCore {
    pub id: usize,
    pub interface: &'static str,
    pub plugin_suffix: &'static str,
    pub metadata_suffix: &'static str,
    pub directory: Option<PathBuf>,
    pub loader: Arc<dyn LibraryLoader>,
    pub plugins: BTreeMap<String, PluginEntry>,
    /// Alias to canonical plugin name.
    pub aliases: BTreeMap<String, String>,
    /// Alias to the plugin the user prefers for it.
    pub preferred: BTreeMap<String, String>,
    /// Managers this one resolves dependencies through.
    pub externals: Vec<Weak<Mutex<ManagerCore>>>,
    /// Number of managers that registered this one as external.
    pub external_users: usize,
    /// Set once the owning manager is dropped. Handles may still reach the
    /// state afterwards, but only for queries.
    pub torn_down: bool,
}

impl ManagerCore {
    pub fn new(
        interface: &'static str,
        plugin_suffix: &'static str,
        metadata_suffix: &'static str,
        loader: Arc<dyn LibraryLoader>,
    ) -> Self {
        Self {
            id: NEXT_MANAGER_ID.fetch_add(1, Ordering::Relaxed),
            interface,
            plugin_suffix,
            metadata_suffix,
            directory: None,
            loader,
            plugins: BTreeMap::new(),
            aliases: BTreeMap::new(),
            preferred: BTreeMap::new(),
            externals: Vec::new(),
            external_users: 0,
            torn_down: false,
        }
    }

    /// Adopt all imported static plugins of this interface. Returns their
    /// initializers in name order.
    pub fn adopt_static_plugins(&mut self) -> Vec<fn()> {
        let format = ConfigFormat::from_suffix(self.metadata_suffix);
        for plugin in static_plugins_for(self.interface) {
            if self.plugins.contains_key(plugin.name()) {
                warn!("Manager: duplicate static plugin {}, ignoring", plugin.name());
                continue;
            }
            let metadata = match plugin.metadata() {
                Some(text) => PluginMetadata::parse(plugin.name(), text, format).unwrap_or_else(|e| {
                    error!("Manager: {}", e);
                    PluginMetadata::empty(plugin.name())
                }),
                None => PluginMetadata::empty(plugin.name()),
            };
            self.plugins
                .insert(plugin.name().to_string(), PluginEntry::from_static(plugin, metadata));
        }
        self.rebuild_aliases();
        self.link_static_dependencies();
        self.plugins
            .values()
            .filter(|entry| entry.state == LoadState::Static)
            .filter_map(|entry| match entry.source {
                PluginSource::Static(plugin) => plugin.initializer(),
                PluginSource::Dynamic { .. } => None,
            })
            .collect()
    }

    /// Static plugins may only depend on usable static plugins of the same
    /// manager. The others are left `UnresolvedDependency`, without an
    /// instancer and without their hooks ever running.
    fn link_static_dependencies(&mut self) {
        loop {
            let unresolved: Vec<(String, String)> = self
                .plugins
                .iter()
                .filter(|(_, entry)| entry.state == LoadState::Static)
                .filter_map(|(name, entry)| {
                    entry
                        .metadata
                        .depends()
                        .iter()
                        .find(|dependency| self.static_dependency(dependency).is_none())
                        .map(|dependency| (name.clone(), dependency.clone()))
                })
                .collect();
            if unresolved.is_empty() {
                break;
            }
            for (name, dependency) in unresolved {
                error!("Manager: unresolved dependency {} of static plugin {}", dependency, name);
                if let Some(entry) = self.plugins.get_mut(&name) {
                    entry.state = LoadState::UnresolvedDependency;
                    entry.instancer = None;
                    entry.finalizer = None;
                }
            }
        }

        let mut used_by = Vec::new();
        for (name, entry) in &self.plugins {
            if entry.state != LoadState::Static {
                continue;
            }
            for dependency in entry.metadata.depends() {
                if let Some(target) = self.static_dependency(dependency) {
                    used_by.push((target.to_string(), name.clone()));
                }
            }
        }
        for (dependency, dependent) in used_by {
            if let Some(entry) = self.plugins.get_mut(&dependency) {
                entry.metadata.add_used_by(&dependent);
            }
        }
    }

    fn static_dependency(&self, name: &str) -> Option<&str> {
        let target = self.resolve(name)?;
        self.plugins
            .get(target)
            .filter(|entry| entry.state == LoadState::Static)
            .map(|_| target)
    }

    /// Whether the owning manager still exists, logging an error for
    /// `operation` if it doesn't.
    pub fn is_alive(&self, operation: &str) -> bool {
        if self.torn_down {
            error!(
                "Manager::{}(): the {} manager was already destroyed",
                operation, self.interface
            );
        }
        !self.torn_down
    }

    pub fn resolve(&self, alias: &str) -> Option<&str> {
        self.aliases.get(alias).map(String::as_str)
    }

    pub fn entry(&self, alias: &str) -> Option<&PluginEntry> {
        self.plugins.get(self.resolve(alias)?)
    }

    pub fn entry_mut(&mut self, alias: &str) -> Option<&mut PluginEntry> {
        let name = self.aliases.get(alias)?;
        self.plugins.get_mut(name)
    }

    /// Canonical name of a plugin that can satisfy dependency `name`: a
    /// plugin of that exact name, or an active plugin providing it.
    pub fn dependency_candidate(&self, name: &str) -> Option<String> {
        if self.plugins.contains_key(name) {
            return Some(name.to_string());
        }
        let target = self.aliases.get(name)?;
        self.plugins
            .get(target)
            .filter(|entry| entry.state.is_active())
            .map(|_| target.clone())
    }

    /// Recompute the alias table from scratch.
    ///
    /// Providers go in first, the first name in sort order winning, then
    /// every plugin's own name, then user preferences that are still valid.
    pub fn rebuild_aliases(&mut self) {
        let mut aliases = BTreeMap::new();
        for (name, entry) in &self.plugins {
            if entry.state == LoadState::WrongMetadataFile {
                continue;
            }
            for alias in entry.metadata.provides() {
                aliases.entry(alias.clone()).or_insert_with(|| name.clone());
            }
        }
        for name in self.plugins.keys() {
            aliases.insert(name.clone(), name.clone());
        }
        let plugins = &self.plugins;
        self.preferred
            .retain(|alias, target| plugins.get(target).is_some_and(|entry| offers(entry, target, alias)));
        for (alias, target) in &self.preferred {
            aliases.insert(alias.clone(), target.clone());
        }
        self.aliases = aliases;
    }

    /// Forget plugins that aren't loaded and rediscover the directory.
    ///
    /// Preferences survive only while their plugin is loaded. Static
    /// plugins are always kept.
    pub fn rescan(&mut self) {
        self.plugins
            .retain(|_, entry| entry.state.is_active() || matches!(entry.source, PluginSource::Static(_)));
        let plugins = &self.plugins;
        self.preferred
            .retain(|_, target| plugins.get(target).is_some_and(|entry| entry.state.is_active()));

        if let Some(directory) = self.directory.clone() {
            for (name, path) in scan_directory(&directory, self.plugin_suffix) {
                if self.plugins.contains_key(&name) {
                    continue;
                }
                let (state, metadata) = self.read_metadata(&name, &path);
                self.plugins.insert(name, PluginEntry::dynamic(path, metadata, state));
            }
        }
        self.rebuild_aliases();
    }

    /// Metadata for the plugin binary at `path`, from the sidecar next to it.
    pub fn read_metadata(&self, name: &str, path: &Path) -> (LoadState, PluginMetadata) {
        if self.metadata_suffix.is_empty() {
            return (LoadState::NotLoaded, PluginMetadata::empty(name));
        }
        let sidecar = path.with_file_name(format!("{}{}", name, self.metadata_suffix));
        match PluginMetadata::from_file(name, &sidecar) {
            Ok(metadata) => (LoadState::NotLoaded, metadata),
            Err(e) => {
                error!("Manager: {}", e);
                (LoadState::WrongMetadataFile, PluginMetadata::empty(name))
            }
        }
    }

    /// Plugin name of a binary path, `None` if it doesn't have the plugin suffix.
    pub fn plugin_name(&self, path: &Path) -> Option<String> {
        let file_name = path.file_name()?.to_str()?;
        plugin_stem(file_name, self.plugin_suffix).map(str::to_string)
    }

    pub fn live_externals(&self) -> Vec<SharedCore> {
        self.externals.iter().filter_map(Weak::upgrade).collect()
    }

    pub fn directory_display(&self) -> String {
        self.directory
            .as_ref()
            .map(|d| d.display().to_string())
            .unwrap_or_else(|| "<no plugin directory>".to_string())
    }
}

/// Whether `entry`, named `name`, can be addressed as `alias`.
pub(crate) fn offers(entry: &PluginEntry, name: &str, alias: &str) -> bool {
    name == alias || entry.metadata.provides().iter().any(|p| p == alias)
}

fn plugin_stem<'a>(file_name: &'a str, suffix: &str) -> Option<&'a str> {
    file_name.strip_suffix(suffix).filter(|stem| !stem.is_empty())
}

/// Plugin binaries in `directory`, sorted by name. An unreadable directory
/// yields a warning and nothing else.
fn scan_directory(directory: &Path, suffix: &str) -> Vec<(String, PathBuf)> {
    let entries = match fs::read_dir(directory) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Manager: cannot list plugin directory {}: {}", directory.display(), e);
            return Vec::new();
        }
    };
    let mut seen = HashSet::new();
    let mut found: Vec<(String, PathBuf)> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| !path.is_dir())
        .filter_map(|path| {
            let file_name = path.file_name()?.to_str()?;
            let name = plugin_stem(file_name, suffix)?.to_string();
            seen.insert(name.clone()).then_some((name, path))
        })
        .collect();
    found.sort_by(|a, b| a.0.cmp(&b.0));
    found
}
