//! Declaration macros for plugin interfaces and plugins.
//!
//! - [`plugin_interface!`](crate::plugin_interface) implements
//!   [`PluginInterface`](crate::PluginInterface) for an interface trait object.
//! - [`static_plugin!`](crate::static_plugin) builds a
//!   [`StaticPlugin`](crate::StaticPlugin) record for a plugin linked into the host.
//! - [`export_plugin!`](crate::export_plugin) emits the symbols a dynamic plugin
//!   binary has to export.

/// Implement [`PluginInterface`](crate::PluginInterface) for `dyn Trait`.
///
/// ```ignore
/// pub trait Animal: AbstractPlugin {
///     fn name(&self) -> String;
/// }
/// plugin_interface!(dyn Animal, "cz.example.Animal/1.0", metadata_suffix = ".conf");
/// ```
#[macro_export]
macro_rules! plugin_interface {
    (
        $iface:ty, $interface:expr
        $(, plugin_suffix = $plugin_suffix:expr)?
        $(, metadata_suffix = $metadata_suffix:expr)?
        $(, search_paths = [$($path:expr),* $(,)?])?
        $(,)?
    ) => {
        impl $crate::PluginInterface for $iface {
            const INTERFACE: &'static str = $interface;
            $(
                fn plugin_suffix() -> &'static str {
                    $plugin_suffix
                }
            )?
            $(
                fn plugin_metadata_suffix() -> &'static str {
                    $metadata_suffix
                }
            )?
            $(
                fn plugin_search_paths() -> ::std::vec::Vec<::std::path::PathBuf> {
                    ::std::vec![$(::std::path::PathBuf::from($path)),*]
                }
            )?
        }
    };
}

/// Build a [`StaticPlugin`](crate::StaticPlugin) record.
///
/// `$ctor` turns a [`PluginBase`](crate::PluginBase) into the plugin value.
///
/// ```ignore
/// static CANARY: StaticPlugin = static_plugin!(
///     "Canary", dyn Animal, Canary::new,
///     metadata = include_str!("Canary.conf"),
/// );
/// import_static_plugin(&CANARY);
/// ```
#[macro_export]
macro_rules! static_plugin {
    (
        $name:expr, $iface:ty, $ctor:expr
        $(, metadata = $metadata:expr)?
        $(, initializer = $initializer:expr)?
        $(, finalizer = $finalizer:expr)?
        $(,)?
    ) => {{
        fn __instancer(base: $crate::PluginBase) -> ::std::boxed::Box<dyn ::std::any::Any> {
            let instance: ::std::boxed::Box<$iface> = ::std::boxed::Box::new(($ctor)(base));
            ::std::boxed::Box::new(instance)
        }
        $crate::StaticPlugin::new($name, <$iface as $crate::PluginInterface>::INTERFACE, __instancer)
            $(.with_metadata($metadata))?
            $(.with_initializer($initializer))?
            $(.with_finalizer($finalizer))?
    }};
}

/// Export the plugin ABI from a `cdylib`.
///
/// Without a prefix the symbols are `pluginVersion`, `pluginInterface`,
/// `pluginInitializer`, `pluginFinalizer` and `pluginInstancer`. With
/// `prefix = "Dog"` they become `Dog_pluginVersion` and so on, which lets one
/// binary carry several plugins; the file is then copied or linked once per
/// plugin name.
///
/// The binary has to be built with the same toolchain and the same
/// `pluginmgr-core` as the host.
#[macro_export]
macro_rules! export_plugin {
    (
        prefix = $prefix:literal, $iface:ty, $ctor:expr
        $(, initializer = $initializer:expr)?
        $(, finalizer = $finalizer:expr)?
        $(,)?
    ) => {
        const _: () = {
            #[unsafe(export_name = concat!($prefix, "_pluginVersion"))]
            pub static PLUGIN_VERSION: u32 = $crate::PLUGIN_VERSION;

            #[unsafe(export_name = concat!($prefix, "_pluginInterface"))]
            pub extern "C-unwind" fn plugin_interface() -> *const ::std::os::raw::c_char {
                $crate::__export_plugin_body!(@interface $iface)
            }

            #[unsafe(export_name = concat!($prefix, "_pluginInitializer"))]
            pub extern "C-unwind" fn plugin_initializer() {
                $(($initializer)();)?
            }

            #[unsafe(export_name = concat!($prefix, "_pluginFinalizer"))]
            pub extern "C-unwind" fn plugin_finalizer() {
                $(($finalizer)();)?
            }

            #[unsafe(export_name = concat!($prefix, "_pluginInstancer"))]
            pub unsafe extern "C-unwind" fn plugin_instancer(base: *mut ::std::ffi::c_void) -> *mut ::std::ffi::c_void {
                $crate::__export_plugin_body!(@instancer $iface, $ctor, base)
            }
        };
    };
    (
        $iface:ty, $ctor:expr
        $(, initializer = $initializer:expr)?
        $(, finalizer = $finalizer:expr)?
        $(,)?
    ) => {
        const _: () = {
            #[unsafe(export_name = "pluginVersion")]
            pub static PLUGIN_VERSION: u32 = $crate::PLUGIN_VERSION;

            #[unsafe(export_name = "pluginInterface")]
            pub extern "C-unwind" fn plugin_interface() -> *const ::std::os::raw::c_char {
                $crate::__export_plugin_body!(@interface $iface)
            }

            #[unsafe(export_name = "pluginInitializer")]
            pub extern "C-unwind" fn plugin_initializer() {
                $(($initializer)();)?
            }

            #[unsafe(export_name = "pluginFinalizer")]
            pub extern "C-unwind" fn plugin_finalizer() {
                $(($finalizer)();)?
            }

            #[unsafe(export_name = "pluginInstancer")]
            pub unsafe extern "C-unwind" fn plugin_instancer(base: *mut ::std::ffi::c_void) -> *mut ::std::ffi::c_void {
                $crate::__export_plugin_body!(@instancer $iface, $ctor, base)
            }
        };
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __export_plugin_body {
    (@interface $iface:ty) => {{
        static INTERFACE: ::std::sync::OnceLock<::std::ffi::CString> = ::std::sync::OnceLock::new();
        INTERFACE
            .get_or_init(|| {
                ::std::ffi::CString::new(<$iface as $crate::PluginInterface>::INTERFACE).unwrap_or_default()
            })
            .as_ptr()
    }};
    (@instancer $iface:ty, $ctor:expr, $base:ident) => {{
        if $base.is_null() {
            return ::std::ptr::null_mut();
        }
        // The manager hands over a `Box<PluginBase>` and takes back a
        // `Box<Box<dyn Interface>>`.
        let base = *unsafe { ::std::boxed::Box::from_raw($base.cast::<$crate::PluginBase>()) };
        let instance: ::std::boxed::Box<$iface> = ::std::boxed::Box::new(($ctor)(base));
        ::std::boxed::Box::into_raw(::std::boxed::Box::new(instance)).cast::<::std::ffi::c_void>()
    }};
}
