use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;
use std::path::PathBuf;
use std::sync::Arc;

use log::error;

use super::lifecycle::{self, ErasedInstance};
use super::{AbstractManager, ManagerSettings};
use crate::interface::PluginInterface;
use crate::loader::LibraryLoader;
use crate::plugin::PluginInstance;

/// Manager of the plugins implementing interface `I`.
///
/// Derefs to [`AbstractManager`] for everything that doesn't need to know
/// the interface type.
pub struct Manager<I: ?Sized + PluginInterface> {
    inner: AbstractManager,
    _interface: PhantomData<fn() -> Box<I>>,
}

impl<I: ?Sized + PluginInterface> Manager<I> {
    /// Manager discovering plugins in the first existing directory of
    /// [`I::plugin_search_paths()`](PluginInterface::plugin_search_paths).
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Manager discovering plugins in `directory`.
    pub fn with_directory(directory: impl Into<PathBuf>) -> Self {
        Self::builder().plugin_directory(directory).build()
    }

    pub fn builder() -> ManagerBuilder<I> {
        ManagerBuilder::new()
    }

    /// Create an instance of a loaded or static plugin.
    pub fn instantiate(&self, plugin: &str) -> Option<PluginInstance<I>> {
        let (erased, counter) = lifecycle::instantiate(self.inner.core(), plugin)?;
        let instance: Box<I> = match erased {
            ErasedInstance::Static(any) => match any.downcast::<Box<I>>() {
                Ok(instance) => *instance,
                Err(_) => {
                    error!(
                        "Manager::instantiate(): plugin {} does not implement {}",
                        plugin,
                        I::INTERFACE
                    );
                    return None;
                }
            },
            // The interface string was verified on load, so the binary
            // produced a `Box<Box<I>>`.
            ErasedInstance::Dynamic(raw) => *unsafe { Box::from_raw(raw.cast::<Box<I>>()) },
        };
        Some(PluginInstance::new(instance, counter))
    }

    /// [`load()`](super::ManagerRef::load) followed by
    /// [`instantiate()`](Self::instantiate).
    pub fn load_and_instantiate(&self, plugin: &str) -> Option<PluginInstance<I>> {
        if !self.load(plugin).is_active() {
            return None;
        }
        self.instantiate(plugin)
    }
}

impl<I: ?Sized + PluginInterface> Default for Manager<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: ?Sized + PluginInterface> Deref for Manager<I> {
    type Target = AbstractManager;

    fn deref(&self) -> &AbstractManager {
        &self.inner
    }
}

impl<I: ?Sized + PluginInterface> fmt::Debug for Manager<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.fmt(f)
    }
}

/// Builder for [`Manager`].
pub struct ManagerBuilder<I: ?Sized + PluginInterface> {
    plugin_directory: Option<PathBuf>,
    search_paths: Option<Vec<PathBuf>>,
    loader: Option<Arc<dyn LibraryLoader>>,
    _interface: PhantomData<fn() -> Box<I>>,
}

impl<I: ?Sized + PluginInterface> ManagerBuilder<I> {
    fn new() -> Self {
        Self {
            plugin_directory: None,
            search_paths: None,
            loader: None,
            _interface: PhantomData,
        }
    }

    pub fn plugin_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.plugin_directory = Some(directory.into());
        self
    }

    /// Override the interface's search paths.
    pub fn search_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.search_paths = Some(paths);
        self
    }

    /// Open plugin binaries through `loader` instead of the platform linker.
    pub fn loader(mut self, loader: Arc<dyn LibraryLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn settings(self) -> ManagerSettings {
        let mut settings = ManagerSettings::new(I::INTERFACE);
        settings.plugin_suffix = I::plugin_suffix();
        settings.metadata_suffix = I::plugin_metadata_suffix();
        settings.plugin_directory = self.plugin_directory;
        settings.search_paths = self.search_paths.unwrap_or_else(I::plugin_search_paths);
        if let Some(loader) = self.loader {
            settings.loader = loader;
        }
        settings
    }

    pub fn build(self) -> Manager<I> {
        Manager {
            inner: AbstractManager::new(self.settings()),
            _interface: PhantomData,
        }
    }
}
