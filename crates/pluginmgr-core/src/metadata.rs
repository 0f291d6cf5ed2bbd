//! # Plugin Metadata
//!
//! [`PluginMetadata`] holds what a manager knows about one plugin: its
//! canonical name, the plugins it depends on, the aliases it provides, the
//! plugins currently depending on it and its configuration.
//!
//! Metadata comes from a sidecar file next to the plugin binary (or from text
//! embedded in a static plugin). The recognized top-level keys are `depends`
//! and `provides`, each a string or a list of strings, and the
//! `[configuration]` group is what plugin instances see as their
//! configuration. Everything else is kept in [`PluginMetadata::data`].
use std::path::Path;

use crate::configuration::{ConfigFormat, Configuration};
use crate::constants::{CONFIGURATION_GROUP, DEPENDS_KEY, PROVIDES_KEY};
use crate::error::{PluginManagerError, Result};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PluginMetadata {
    name: String,
    depends: Vec<String>,
    provides: Vec<String>,
    used_by: Vec<String>,
    configuration: Configuration,
    data: Configuration,
}

impl PluginMetadata {
    /// Metadata with no dependencies, aliases or configuration.
    pub(crate) fn empty(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// Interpret a parsed metadata tree.
    pub(crate) fn from_configuration(name: &str, data: Configuration) -> Self {
        let mut metadata = Self::empty(name);
        metadata.depends = data.values(DEPENDS_KEY);
        for alias in data.values(PROVIDES_KEY) {
            if alias == name {
                log::warn!("PluginMetadata: plugin {} provides its own name, ignoring", name);
            } else if !metadata.provides.contains(&alias) {
                metadata.provides.push(alias);
            }
        }
        metadata.configuration = data.group(CONFIGURATION_GROUP).unwrap_or_default();
        metadata.data = data;
        metadata
    }

    /// Parse metadata text, as embedded in a static plugin.
    pub(crate) fn parse(name: &str, text: &str, format: ConfigFormat) -> Result<Self> {
        let data = Configuration::parse(text, format).map_err(|source| PluginManagerError::Parse {
            origin: name.to_string(),
            source: Box::new(source),
        })?;
        Ok(Self::from_configuration(name, data))
    }

    /// Read a metadata sidecar.
    pub(crate) fn from_file(name: &str, path: &Path) -> Result<Self> {
        Configuration::from_file(path).map(|data| Self::from_configuration(name, data))
    }

    /// Canonical plugin name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Plugins that have to be loaded before this one.
    pub fn depends(&self) -> &[String] {
        &self.depends
    }

    /// Aliases this plugin can be referred to by, besides its own name.
    pub fn provides(&self) -> &[String] {
        &self.provides
    }

    /// Loaded plugins depending on this one, possibly from other managers.
    pub fn used_by(&self) -> &[String] {
        &self.used_by
    }

    /// Plugin configuration. Every instance gets a copy of it at
    /// instantiation.
    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    pub fn configuration_mut(&mut self) -> &mut Configuration {
        &mut self.configuration
    }

    /// The whole parsed metadata, unknown keys included.
    pub fn data(&self) -> &Configuration {
        &self.data
    }

    pub(crate) fn add_used_by(&mut self, plugin: &str) {
        if !self.used_by.iter().any(|p| p == plugin) {
            self.used_by.push(plugin.to_string());
        }
    }

    pub(crate) fn remove_used_by(&mut self, plugin: &str) {
        self.used_by.retain(|p| p != plugin);
    }
}
