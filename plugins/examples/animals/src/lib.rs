//! Two animal plugins in one binary.
//!
//! The symbols are prefixed with the plugin name, so the built library is
//! installed twice, as `Dog` and as `PitBull`, each next to its metadata file
//! from `metadata/`.

use pluginmgr_core::{export_plugin, plugin_interface, AbstractPlugin, PluginBase};

pub trait Animal: AbstractPlugin {
    fn name(&self) -> String;
    fn leg_count(&self) -> u32;
    fn has_tail(&self) -> bool;

    /// What the animal says, from the plugin configuration.
    fn sound(&self) -> String {
        self.configuration().value("sound").unwrap_or_default()
    }
}

plugin_interface!(dyn Animal, "cz.example.Animal/1.0");

pub struct Dog {
    base: PluginBase,
}

impl Dog {
    pub fn new(base: PluginBase) -> Self {
        Self { base }
    }
}

impl AbstractPlugin for Dog {
    fn base(&self) -> &PluginBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut PluginBase {
        &mut self.base
    }
}

impl Animal for Dog {
    fn name(&self) -> String {
        "Doug".to_string()
    }

    fn leg_count(&self) -> u32 {
        4
    }

    fn has_tail(&self) -> bool {
        true
    }
}

pub struct PitBull {
    base: PluginBase,
}

impl PitBull {
    pub fn new(base: PluginBase) -> Self {
        Self { base }
    }
}

impl AbstractPlugin for PitBull {
    fn base(&self) -> &PluginBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut PluginBase {
        &mut self.base
    }
}

impl Animal for PitBull {
    fn name(&self) -> String {
        "Rodriguez".to_string()
    }

    fn leg_count(&self) -> u32 {
        4
    }

    fn has_tail(&self) -> bool {
        true
    }
}

fn dog_initializer() {
    log::debug!("Dog plugin initialized");
}

fn dog_finalizer() {
    log::debug!("Dog plugin finalized");
}

export_plugin!(
    prefix = "Dog",
    dyn Animal,
    Dog::new,
    initializer = dog_initializer,
    finalizer = dog_finalizer,
);

export_plugin!(prefix = "PitBull", dyn Animal, PitBull::new);
