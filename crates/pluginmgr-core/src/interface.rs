use std::path::PathBuf;

use crate::constants::{DEFAULT_METADATA_SUFFIX, DEFAULT_PLUGIN_SUFFIX};
use crate::plugin::AbstractPlugin;

/// Static description of a plugin interface, implemented on the interface's
/// trait object type (`dyn Animal`), usually through
/// [`plugin_interface!`](crate::plugin_interface).
pub trait PluginInterface: AbstractPlugin + 'static {
    /// Globally unique interface string, e.g. `"cz.example.Animal/1.0"`.
    const INTERFACE: &'static str;

    /// Suffix of plugin binaries.
    fn plugin_suffix() -> &'static str {
        DEFAULT_PLUGIN_SUFFIX
    }

    /// Suffix of metadata sidecars. Empty disables sidecars altogether.
    fn plugin_metadata_suffix() -> &'static str {
        DEFAULT_METADATA_SUFFIX
    }

    /// Directories consulted in order when a manager is created without an
    /// explicit plugin directory.
    fn plugin_search_paths() -> Vec<PathBuf> {
        Vec::new()
    }
}
