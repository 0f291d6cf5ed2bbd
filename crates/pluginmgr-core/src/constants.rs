//! Constants shared between the host and plugin binaries.

/// Plugin ABI version. A dynamic plugin exporting any other value in its
/// `pluginVersion` symbol is refused with
/// [`LoadState::WrongPluginVersion`](crate::LoadState::WrongPluginVersion).
pub const PLUGIN_VERSION: u32 = 5;

/// Default plugin binary suffix, the platform's shared library extension.
pub const DEFAULT_PLUGIN_SUFFIX: &str = std::env::consts::DLL_SUFFIX;

/// Default metadata sidecar suffix.
pub const DEFAULT_METADATA_SUFFIX: &str = ".conf";

// Exported symbol names, optionally prefixed with `<pluginName>_`.
pub const VERSION_SYMBOL: &str = "pluginVersion";
pub const INTERFACE_SYMBOL: &str = "pluginInterface";
pub const INITIALIZER_SYMBOL: &str = "pluginInitializer";
pub const FINALIZER_SYMBOL: &str = "pluginFinalizer";
pub const INSTANCER_SYMBOL: &str = "pluginInstancer";

/// Metadata keys and sections the manager interprets.
pub const DEPENDS_KEY: &str = "depends";
pub const PROVIDES_KEY: &str = "provides";
pub const CONFIGURATION_GROUP: &str = "configuration";
