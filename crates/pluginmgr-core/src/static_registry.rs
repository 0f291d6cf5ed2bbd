//! # Static Plugin Registry
//!
//! Plugins linked into the host are described by a [`StaticPlugin`] record,
//! usually produced by [`static_plugin!`](crate::static_plugin). A record is
//! invisible until the host imports it with [`import_static_plugin`], once at
//! startup and before the managers that should see it are created. Every
//! manager whose interface matches the record's adopts the plugin in the
//! [`Static`](crate::LoadState::Static) state.
use std::any::Any;
use std::fmt;

use parking_lot::Mutex;

use crate::plugin::PluginBase;

/// Creates an instance of a static plugin, returned as a `Box<dyn Any>`
/// wrapping a `Box<dyn Interface>`.
pub type StaticInstancer = fn(PluginBase) -> Box<dyn Any>;

/// Record describing a statically linked plugin
pub struct StaticPlugin {
    name: &'static str,
    interface: &'static str,
    instancer: StaticInstancer,
    initializer: Option<fn()>,
    finalizer: Option<fn()>,
    metadata: Option<&'static str>,
}

impl StaticPlugin {
    pub const fn new(name: &'static str, interface: &'static str, instancer: StaticInstancer) -> Self {
        Self {
            name,
            interface,
            instancer,
            initializer: None,
            finalizer: None,
            metadata: None,
        }
    }

    /// Metadata text in the format of the interface's metadata suffix.
    pub const fn with_metadata(mut self, metadata: &'static str) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Called by every adopting manager right after its construction.
    pub const fn with_initializer(mut self, initializer: fn()) -> Self {
        self.initializer = Some(initializer);
        self
    }

    /// Called by every adopting manager right before it's dropped.
    pub const fn with_finalizer(mut self, finalizer: fn()) -> Self {
        self.finalizer = Some(finalizer);
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn interface(&self) -> &'static str {
        self.interface
    }

    pub fn metadata(&self) -> Option<&'static str> {
        self.metadata
    }

    pub(crate) fn instancer(&self) -> StaticInstancer {
        self.instancer
    }

    pub(crate) fn initializer(&self) -> Option<fn()> {
        self.initializer
    }

    pub(crate) fn finalizer(&self) -> Option<fn()> {
        self.finalizer
    }
}

impl fmt::Debug for StaticPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticPlugin")
            .field("name", &self.name)
            .field("interface", &self.interface)
            .field("has_metadata", &self.metadata.is_some())
            .finish()
    }
}

static IMPORTED: Mutex<Vec<&'static StaticPlugin>> = parking_lot::const_mutex(Vec::new());

/// Make a static plugin visible to managers created afterwards.
///
/// Returns `false` if this very record was imported already, in which case
/// nothing changes.
pub fn import_static_plugin(plugin: &'static StaticPlugin) -> bool {
    let mut imported = IMPORTED.lock();
    if imported.iter().any(|p| std::ptr::eq(*p, plugin)) {
        return false;
    }
    log::debug!("Imported static plugin {} ({})", plugin.name, plugin.interface);
    imported.push(plugin);
    true
}

/// All imported static plugins, in import order.
pub fn static_plugins() -> Vec<&'static StaticPlugin> {
    IMPORTED.lock().clone()
}

pub(crate) fn static_plugins_for(interface: &str) -> Vec<&'static StaticPlugin> {
    IMPORTED
        .lock()
        .iter()
        .copied()
        .filter(|p| p.interface == interface)
        .collect()
}
