use std::fmt;

/// Load state of a plugin, also used as the outcome of
/// [`load`](crate::ManagerRef::load) and [`unload`](crate::ManagerRef::unload).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadState {
    /// The name or alias is unknown, or the file of a path-form load is missing.
    NotFound,
    /// Known but not loaded.
    NotLoaded,
    /// Active dynamic plugin.
    Loaded,
    /// Active static plugin. Can't be unloaded.
    Static,
    /// Metadata sidecar missing or unparsable.
    WrongMetadataFile,
    /// A dependency couldn't be resolved or loaded.
    UnresolvedDependency,
    /// Opening the library or resolving its symbols failed.
    LoadFailed,
    /// The `pluginVersion` symbol doesn't match [`PLUGIN_VERSION`](crate::PLUGIN_VERSION).
    WrongPluginVersion,
    /// The `pluginInterface` string doesn't match the manager's interface.
    WrongInterfaceVersion,
    /// Unload refused, other loaded plugins depend on this one.
    Required,
    /// Unload refused because of live instances, or path-form load refused
    /// because a plugin of the same name is loaded.
    Used,
}

impl LoadState {
    /// Whether the plugin can be instantiated in this state.
    pub fn is_active(self) -> bool {
        matches!(self, LoadState::Loaded | LoadState::Static)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LoadState::NotFound => "NotFound",
            LoadState::NotLoaded => "NotLoaded",
            LoadState::Loaded => "Loaded",
            LoadState::Static => "Static",
            LoadState::WrongMetadataFile => "WrongMetadataFile",
            LoadState::UnresolvedDependency => "UnresolvedDependency",
            LoadState::LoadFailed => "LoadFailed",
            LoadState::WrongPluginVersion => "WrongPluginVersion",
            LoadState::WrongInterfaceVersion => "WrongInterfaceVersion",
            LoadState::Required => "Required",
            LoadState::Used => "Used",
        }
    }
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
