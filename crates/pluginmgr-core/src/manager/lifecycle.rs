//! Load, unload, instantiation and teardown.
//!
//! These operations may cross manager boundaries through external manager
//! links, so none of them holds a manager lock while calling into another
//! manager or into plugin code.
use std::any::Any;
use std::ffi::c_void;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::thread;

use log::{debug, error, warn};

use super::state::{DependencyLink, Hook, Instancer, PluginEntry, PluginSource, SharedCore};
use crate::constants::{
    FINALIZER_SYMBOL, INITIALIZER_SYMBOL, INSTANCER_SYMBOL, INTERFACE_SYMBOL, PLUGIN_VERSION, VERSION_SYMBOL,
};
use crate::load_state::LoadState;
use crate::loader::{ffi_string_from_ptr, plugin_symbol, DynamicLibrary, HookFn, InstancerFn, InterfaceFn};
use crate::plugin::{close_library, InstanceCounter, PluginBase, RetiredLibrary};

/// How the name passed to a load is looked up.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Lookup {
    /// Through the alias table, preferences included.
    Alias,
    /// As a canonical plugin name.
    Exact,
}

/// Plugins loaded by one top-level `load()` call. Unless committed, they are
/// unloaded again in reverse order when the session goes away, which keeps a
/// failed load from leaving anything behind.
#[derive(Default)]
struct LoadSession {
    loaded: Vec<(SharedCore, String)>,
    in_progress: Vec<(usize, String)>,
    committed: bool,
}

impl LoadSession {
    fn is_in_progress(&self, manager: usize, name: &str) -> bool {
        self.in_progress.iter().any(|(id, n)| *id == manager && n == name)
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for LoadSession {
    fn drop(&mut self) {
        if self.committed || thread::panicking() {
            return;
        }
        for (core, name) in self.loaded.drain(..).rev() {
            debug!("Manager::load(): rolling back plugin {}", name);
            unload_plugin(&core, &name, Lookup::Exact, false);
        }
    }
}

/// Library and entry points of a plugin that passed all load checks.
struct OpenedPlugin {
    library: Box<dyn DynamicLibrary>,
    finalizer: HookFn,
    instancer: InstancerFn,
}

pub(crate) fn load(core: &SharedCore, plugin: &str) -> LoadState {
    load_with(core, plugin, Lookup::Alias)
}

fn load_with(core: &SharedCore, plugin: &str, lookup: Lookup) -> LoadState {
    let mut session = LoadSession::default();
    let state = load_recursive(core, plugin, lookup, &mut session);
    if state.is_active() {
        session.commit();
    }
    state
}

/// Load a plugin binary by path, registering its metadata on the fly.
pub(crate) fn load_path(core: &SharedCore, path: &Path) -> LoadState {
    let (name, previous) = {
        let mut guard = core.lock();
        if !guard.is_alive("load") {
            return LoadState::NotFound;
        }
        let Some(name) = guard.plugin_name(path) else {
            error!("Manager::load(): {} is not a plugin binary", path.display());
            return LoadState::NotFound;
        };
        if !path.is_file() {
            error!("Manager::load(): {} was not found", path.display());
            return LoadState::NotFound;
        }
        if guard.plugins.get(&name).is_some_and(|entry| entry.state.is_active()) {
            error!(
                "Manager::load(): {} conflicts with currently loaded plugin of the same name",
                path.display()
            );
            return LoadState::Used;
        }
        let (state, metadata) = guard.read_metadata(&name, path);
        let previous = guard
            .plugins
            .insert(name.clone(), PluginEntry::dynamic(path.to_path_buf(), metadata, state));
        guard.rebuild_aliases();
        (name, previous)
    };

    let state = load_with(core, &name, Lookup::Exact);
    if !state.is_active() {
        let mut guard = core.lock();
        guard.plugins.remove(&name);
        if let Some(previous) = previous {
            guard.plugins.insert(name, previous);
        }
        guard.rebuild_aliases();
    }
    state
}

fn load_recursive(core: &SharedCore, plugin: &str, lookup: Lookup, session: &mut LoadSession) -> LoadState {
    let (id, name, depends) = {
        let guard = core.lock();
        if !guard.is_alive("load") {
            return LoadState::NotFound;
        }
        let name = match lookup {
            Lookup::Alias => guard.resolve(plugin).map(str::to_string),
            Lookup::Exact => guard.plugins.contains_key(plugin).then(|| plugin.to_string()),
        };
        let Some(entry) = name.as_ref().and_then(|name| guard.plugins.get(name)) else {
            error!(
                "Manager::load(): plugin {} is not static and was not found in {}",
                plugin,
                guard.directory_display()
            );
            return LoadState::NotFound;
        };
        match entry.state {
            LoadState::Loaded | LoadState::Static => return entry.state,
            LoadState::NotLoaded => {}
            state => {
                error!(
                    "Manager::load(): plugin {} is not ready to load: {}",
                    entry.metadata.name(),
                    state
                );
                return state;
            }
        }
        (guard.id, entry.metadata.name().to_string(), entry.metadata.depends().to_vec())
    };

    if session.is_in_progress(id, &name) {
        error!("Manager::load(): plugin {} is part of a dependency cycle", name);
        return LoadState::UnresolvedDependency;
    }
    session.in_progress.push((id, name.clone()));
    let state = load_resolved(core, &name, &depends, session);
    session.in_progress.pop();
    state
}

fn load_resolved(core: &SharedCore, name: &str, depends: &[String], session: &mut LoadSession) -> LoadState {
    let mut links = Vec::with_capacity(depends.len());
    for dependency in depends {
        let resolved = find_dependency(core, dependency)
            .filter(|(dependency_core, dependency_name)| {
                load_recursive(dependency_core, dependency_name, Lookup::Exact, session).is_active()
            });
        let Some((dependency_core, dependency_name)) = resolved else {
            error!("Manager::load(): unresolved dependency {} of plugin {}", dependency, name);
            return LoadState::UnresolvedDependency;
        };
        links.push(DependencyLink::new(&dependency_core, dependency_name));
    }

    let opened = match open_plugin(core, name) {
        Ok(opened) => opened,
        Err(state) => return state,
    };

    for link in &links {
        link.attach(name);
    }
    {
        let mut guard = core.lock();
        let Some(entry) = guard.plugins.get_mut(name) else {
            drop(guard);
            for link in &links {
                link.detach(name);
            }
            close_library(RetiredLibrary {
                plugin: name.to_string(),
                library: opened.library,
            });
            return LoadState::NotFound;
        };
        entry.library = Some(opened.library);
        entry.finalizer = Some(Hook::Dynamic(opened.finalizer));
        entry.instancer = Some(Instancer::Dynamic(opened.instancer));
        entry.links = links;
        entry.state = LoadState::Loaded;
    }
    session.loaded.push((Arc::clone(core), name.to_string()));
    debug!("Manager::load(): plugin {} loaded", name);
    LoadState::Loaded
}

/// Find the plugin satisfying `dependency` in this manager or in one of its
/// external managers.
fn find_dependency(core: &SharedCore, dependency: &str) -> Option<(SharedCore, String)> {
    let externals = {
        let guard = core.lock();
        if let Some(name) = guard.dependency_candidate(dependency) {
            return Some((Arc::clone(core), name));
        }
        guard.live_externals()
    };
    for external in externals {
        let found = external.lock().dependency_candidate(dependency);
        if let Some(name) = found {
            return Some((external, name));
        }
    }
    None
}

/// Open the plugin binary, validate it and run its initializer.
fn open_plugin(core: &SharedCore, name: &str) -> Result<OpenedPlugin, LoadState> {
    let (path, loader, interface) = {
        let guard = core.lock();
        let Some(entry) = guard.plugins.get(name) else {
            return Err(LoadState::NotFound);
        };
        let PluginSource::Dynamic { path } = &entry.source else {
            return Err(LoadState::LoadFailed);
        };
        (path.clone(), Arc::clone(&guard.loader), guard.interface)
    };

    let library = loader.open(&path).map_err(|e| {
        error!("Manager::load(): cannot load plugin {}: {}", name, e);
        LoadState::LoadFailed
    })?;
    let fail = |library: Box<dyn DynamicLibrary>, state: LoadState| {
        close_library(RetiredLibrary {
            plugin: name.to_string(),
            library,
        });
        Err(state)
    };

    let Some(version) = plugin_symbol(&*library, name, VERSION_SYMBOL) else {
        error!("Manager::load(): cannot get version of plugin {}", name);
        return fail(library, LoadState::LoadFailed);
    };
    // The symbol is a u32 exported by the plugin.
    let version = unsafe { *version.cast::<u32>() };
    if version != PLUGIN_VERSION {
        error!(
            "Manager::load(): wrong version of plugin {}, expected {} but got {}",
            name, PLUGIN_VERSION, version
        );
        return fail(library, LoadState::WrongPluginVersion);
    }

    let Some(interface_fn) = plugin_symbol(&*library, name, INTERFACE_SYMBOL) else {
        error!("Manager::load(): cannot get interface string of plugin {}", name);
        return fail(library, LoadState::LoadFailed);
    };
    let interface_fn = unsafe { mem::transmute::<*const c_void, InterfaceFn>(interface_fn) };
    let plugin_interface = unsafe { ffi_string_from_ptr(interface_fn()) }.unwrap_or_default();
    if plugin_interface != interface {
        error!(
            "Manager::load(): wrong interface string of plugin {}, expected {} but got {}",
            name, interface, plugin_interface
        );
        return fail(library, LoadState::WrongInterfaceVersion);
    }

    let mut entry_points = [None; 3];
    for (slot, (symbol, what)) in entry_points.iter_mut().zip([
        (INITIALIZER_SYMBOL, "initializer"),
        (FINALIZER_SYMBOL, "finalizer"),
        (INSTANCER_SYMBOL, "instancer"),
    ]) {
        *slot = plugin_symbol(&*library, name, symbol);
        if slot.is_none() {
            error!("Manager::load(): cannot get {} of plugin {}", what, name);
            return fail(library, LoadState::LoadFailed);
        }
    }
    let [Some(initializer), Some(finalizer), Some(instancer)] = entry_points else {
        return fail(library, LoadState::LoadFailed);
    };
    let (initializer, finalizer, instancer) = unsafe {
        (
            mem::transmute::<*const c_void, HookFn>(initializer),
            mem::transmute::<*const c_void, HookFn>(finalizer),
            mem::transmute::<*const c_void, InstancerFn>(instancer),
        )
    };

    if let Err(panic_obj) = panic::catch_unwind(|| unsafe { initializer() }) {
        error!(
            "Manager::load(): initializer of plugin {} panicked: {}",
            name,
            panic_message(&*panic_obj)
        );
        return fail(library, LoadState::LoadFailed);
    }

    Ok(OpenedPlugin {
        library,
        finalizer,
        instancer,
    })
}

pub(crate) fn unload(core: &SharedCore, plugin: &str) -> LoadState {
    unload_plugin(core, plugin, Lookup::Alias, false)
}

/// Unload a plugin. With `force`, dependents and live instances don't
/// prevent it; the library of a plugin with live instances is then closed
/// after the last of them is dropped.
fn unload_plugin(core: &SharedCore, plugin: &str, lookup: Lookup, force: bool) -> LoadState {
    let (name, library, finalizer, links, instances) = {
        let mut guard = core.lock();
        let name = match lookup {
            Lookup::Alias => guard.resolve(plugin).map(str::to_string),
            Lookup::Exact => guard.plugins.contains_key(plugin).then(|| plugin.to_string()),
        };
        let Some(entry) = name.as_ref().and_then(|name| guard.plugins.get_mut(name)) else {
            error!("Manager::unload(): plugin {} was not found", plugin);
            return LoadState::NotFound;
        };
        let name = entry.metadata.name().to_string();
        if entry.state != LoadState::Loaded {
            return entry.state;
        }
        let pinning = entry.instances.pinning();
        if pinning > 0 {
            if !force {
                error!("Manager::unload(): plugin {} is currently used and cannot be deleted", name);
                return LoadState::Used;
            }
            warn!(
                "Manager: plugin {} still has {} live instances, unloading anyway",
                name, pinning
            );
        }
        if !entry.metadata.used_by().is_empty() {
            if !force {
                error!(
                    "Manager::unload(): plugin {} is required by other plugins: {:?}",
                    name,
                    entry.metadata.used_by()
                );
                return LoadState::Required;
            }
            error!(
                "Manager: plugin {} is still required by other plugins: {:?}",
                name,
                entry.metadata.used_by()
            );
        }
        entry.state = LoadState::NotLoaded;
        entry.instancer = None;
        (
            name,
            entry.library.take(),
            entry.finalizer.take(),
            mem::take(&mut entry.links),
            mem::take(&mut entry.instances),
        )
    };

    if let Some(finalizer) = finalizer {
        // The library is still open at this point.
        if let Err(panic_obj) = panic::catch_unwind(|| unsafe { finalizer.call() }) {
            error!(
                "Manager::unload(): finalizer of plugin {} panicked: {}",
                name,
                panic_message(&*panic_obj)
            );
        }
    }
    if let Some(library) = library {
        instances.retire(RetiredLibrary {
            plugin: name.clone(),
            library,
        });
    }
    for link in &links {
        link.detach(&name);
    }
    debug!("Manager::unload(): plugin {} unloaded", name);
    LoadState::NotLoaded
}

/// Type-erased instance produced by an instancer.
pub(crate) enum ErasedInstance {
    /// `Box<dyn Any>` wrapping a `Box<dyn Interface>`.
    Static(Box<dyn Any>),
    /// Raw `Box<Box<dyn Interface>>` from a plugin binary.
    Dynamic(*mut c_void),
}

pub(crate) fn instantiate(core: &SharedCore, plugin: &str) -> Option<(ErasedInstance, Arc<InstanceCounter>)> {
    let (instancer, base, counter) = {
        let guard = core.lock();
        if !guard.is_alive("instantiate") {
            return None;
        }
        let entry = guard.entry(plugin).filter(|entry| entry.state.is_active());
        let Some((entry, instancer)) = entry.and_then(|entry| entry.instancer.map(|i| (entry, i))) else {
            error!("Manager::instantiate(): plugin {} is not loaded", plugin);
            return None;
        };
        let base = PluginBase::for_instance(plugin, &entry.metadata, Arc::downgrade(core));
        (instancer, base, Arc::clone(&entry.instances))
    };

    let instance = match instancer {
        Instancer::Static(instancer) => ErasedInstance::Static(instancer(base)),
        Instancer::Dynamic(instancer) => {
            let base = Box::into_raw(Box::new(base)).cast::<c_void>();
            // The plugin takes ownership of the base.
            let raw = unsafe { instancer(base) };
            if raw.is_null() {
                error!("Manager::instantiate(): instancer of plugin {} returned nothing", plugin);
                return None;
            }
            ErasedInstance::Dynamic(raw)
        }
    };
    Some((instance, counter))
}

/// Unload everything in reverse dependency order and run static finalizers.
pub(crate) fn teardown(core: &SharedCore) {
    let (interface, external_users) = {
        let mut guard = core.lock();
        guard.torn_down = true;
        (guard.interface, guard.external_users)
    };

    loop {
        // Plugins nothing depends on anymore, unloaded in reverse name order.
        let ready: Vec<String> = {
            let guard = core.lock();
            guard
                .plugins
                .iter()
                .filter(|(_, entry)| entry.state == LoadState::Loaded && entry.metadata.used_by().is_empty())
                .map(|(name, _)| name.clone())
                .collect()
        };
        if ready.is_empty() {
            break;
        }
        for name in ready.iter().rev() {
            unload_plugin(core, name, Lookup::Exact, true);
        }
    }
    let remaining: Vec<String> = {
        let guard = core.lock();
        guard
            .plugins
            .iter()
            .filter(|(_, entry)| entry.state == LoadState::Loaded)
            .map(|(name, _)| name.clone())
            .collect()
    };
    for name in remaining.iter().rev() {
        unload_plugin(core, name, Lookup::Exact, true);
    }

    let (finalizers, externals) = {
        let mut guard = core.lock();
        let finalizers: Vec<Hook> = guard
            .plugins
            .values()
            .filter(|entry| entry.state == LoadState::Static)
            .filter_map(|entry| entry.finalizer)
            .collect();
        (finalizers, mem::take(&mut guard.externals))
    };
    for finalizer in finalizers.into_iter().rev() {
        // Static hooks don't depend on any library.
        unsafe { finalizer.call() };
    }
    for external in externals.iter().filter_map(|external| external.upgrade()) {
        let mut guard = external.lock();
        guard.external_users = guard.external_users.saturating_sub(1);
    }

    if external_users > 0 {
        error!(
            "Manager: wrong destruction order, {} plugins still needed by {} other managers for external dependencies",
            interface, external_users
        );
        if cfg!(debug_assertions) && !thread::panicking() {
            panic!(
                "Manager: wrong destruction order, {} plugins still needed by {} other managers for external dependencies",
                interface, external_users
            );
        }
    }
}

fn panic_message(panic_obj: &(dyn Any + Send)) -> String {
    if let Some(s) = panic_obj.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = panic_obj.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic reason".to_string()
    }
}
