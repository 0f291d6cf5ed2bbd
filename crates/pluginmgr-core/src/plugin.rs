//! # Plugin Instances
//!
//! Every plugin interface is a trait with [`AbstractPlugin`] as supertrait,
//! and every plugin type embeds a [`PluginBase`] that the manager fills in at
//! instantiation: the name the plugin was instantiated through, a snapshot of
//! its metadata, its own copy of the configuration and a handle to the
//! manager. Instances are handed out wrapped in [`PluginInstance`], which
//! keeps the plugin pinned against unloading for as long as it lives.
use std::fmt;
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::configuration::Configuration;
use crate::loader::DynamicLibrary;
use crate::manager::state::ManagerCore;
use crate::manager::ManagerRef;
use crate::metadata::PluginMetadata;

/// Base of every plugin interface.
pub trait AbstractPlugin {
    fn base(&self) -> &PluginBase;

    fn base_mut(&mut self) -> &mut PluginBase;

    /// Whether the manager may unload the plugin while this instance lives.
    ///
    /// Return `true` only if the instance doesn't need anything from the
    /// plugin binary besides its own code. The binary is kept mapped until
    /// the last such instance is dropped.
    fn can_be_deleted(&self) -> bool {
        false
    }

    /// Name or alias the plugin was instantiated through. Empty for
    /// instances created outside of a manager.
    fn plugin(&self) -> &str {
        self.base().plugin()
    }

    /// Metadata snapshot taken at instantiation.
    fn metadata(&self) -> Option<&PluginMetadata> {
        self.base().metadata()
    }

    fn configuration(&self) -> &Configuration {
        self.base().configuration()
    }

    fn configuration_mut(&mut self) -> &mut Configuration {
        self.base_mut().configuration_mut()
    }
}

/// State shared by all plugin instances.
#[derive(Default)]
pub struct PluginBase {
    plugin: String,
    metadata: Option<PluginMetadata>,
    configuration: Configuration,
    manager: Option<Weak<Mutex<ManagerCore>>>,
}

impl PluginBase {
    /// Base for an instance that lives outside of any manager.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn for_instance(plugin: &str, metadata: &PluginMetadata, manager: Weak<Mutex<ManagerCore>>) -> Self {
        Self {
            plugin: plugin.to_string(),
            configuration: metadata.configuration().clone(),
            metadata: Some(metadata.clone()),
            manager: Some(manager),
        }
    }

    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    pub fn metadata(&self) -> Option<&PluginMetadata> {
        self.metadata.as_ref()
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    pub fn configuration_mut(&mut self) -> &mut Configuration {
        &mut self.configuration
    }

    /// The manager that created this instance, if it still exists.
    pub fn manager(&self) -> Option<ManagerRef> {
        self.manager
            .as_ref()
            .and_then(Weak::upgrade)
            .map(ManagerRef::from_core)
    }
}

impl fmt::Debug for PluginBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginBase")
            .field("plugin", &self.plugin)
            .field("metadata", &self.metadata)
            .field("configuration", &self.configuration)
            .field("has_manager", &self.manager.is_some())
            .finish()
    }
}

/// Live instance bookkeeping of one loaded plugin.
///
/// When a plugin is unloaded (or its manager dropped) while deletable
/// instances still live, its library is parked here and closed once the
/// last instance is gone.
#[derive(Default)]
pub(crate) struct InstanceCounter {
    live: AtomicUsize,
    deletable: AtomicUsize,
    retired: Mutex<Option<RetiredLibrary>>,
}

pub(crate) struct RetiredLibrary {
    pub plugin: String,
    pub library: Box<dyn DynamicLibrary>,
}

impl InstanceCounter {
    /// Instances that prevent the plugin from being unloaded.
    pub fn pinning(&self) -> usize {
        self.live
            .load(Ordering::SeqCst)
            .saturating_sub(self.deletable.load(Ordering::SeqCst))
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    fn acquire(&self, deletable: bool) {
        let _retired = self.retired.lock();
        self.live.fetch_add(1, Ordering::SeqCst);
        if deletable {
            self.deletable.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn release(&self, deletable: bool) {
        let mut retired = self.retired.lock();
        if deletable {
            self.deletable.fetch_sub(1, Ordering::SeqCst);
        }
        if self.live.fetch_sub(1, Ordering::SeqCst) == 1 {
            if let Some(retired) = retired.take() {
                close_library(retired);
            }
        }
    }

    /// Close `library` now if nothing uses it, otherwise when the last
    /// instance is dropped.
    pub fn retire(&self, retired: RetiredLibrary) {
        let mut slot = self.retired.lock();
        if self.live.load(Ordering::SeqCst) == 0 {
            drop(slot);
            close_library(retired);
        } else {
            log::debug!(
                "Closing of plugin {} deferred until its {} remaining instances are dropped",
                retired.plugin,
                self.live.load(Ordering::SeqCst)
            );
            *slot = Some(retired);
        }
    }
}

pub(crate) fn close_library(retired: RetiredLibrary) {
    if let Err(e) = retired.library.close() {
        log::error!("Manager::unload(): cannot unload plugin {}: {}", retired.plugin, e);
    }
}

/// Owned plugin instance.
///
/// Derefs to the plugin interface. While it lives, the plugin it came from
/// can't be unloaded unless the instance reports
/// [`can_be_deleted()`](AbstractPlugin::can_be_deleted).
pub struct PluginInstance<I: ?Sized> {
    plugin: ManuallyDrop<Box<I>>,
    counter: Arc<InstanceCounter>,
    deletable: bool,
}

impl<I: ?Sized + AbstractPlugin> PluginInstance<I> {
    pub(crate) fn new(plugin: Box<I>, counter: Arc<InstanceCounter>) -> Self {
        let deletable = plugin.can_be_deleted();
        counter.acquire(deletable);
        Self {
            plugin: ManuallyDrop::new(plugin),
            counter,
            deletable,
        }
    }
}

impl<I: ?Sized> Deref for PluginInstance<I> {
    type Target = I;

    fn deref(&self) -> &I {
        &self.plugin
    }
}

impl<I: ?Sized> DerefMut for PluginInstance<I> {
    fn deref_mut(&mut self) -> &mut I {
        &mut self.plugin
    }
}

impl<I: ?Sized> Drop for PluginInstance<I> {
    fn drop(&mut self) {
        // The plugin's code may live in a retired library, drop it before
        // the library can be closed.
        unsafe { ManuallyDrop::drop(&mut self.plugin) };
        self.counter.release(self.deletable);
    }
}

impl<I: ?Sized + AbstractPlugin> fmt::Debug for PluginInstance<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginInstance")
            .field("plugin", &self.plugin.plugin())
            .field("deletable", &self.deletable)
            .finish()
    }
}
