//! # Dynamic Library Loading
//!
//! A [`LibraryLoader`] opens a shared library and hands back a
//! [`DynamicLibrary`] that resolves exported symbols by name. The manager only
//! talks to these two traits; [`NativeLoader`] is the implementation backed
//! by `libloading` that managers use unless told otherwise.
//!
//! On POSIX systems libraries are opened with lazy symbol resolution and local
//! visibility. On Windows the library's own directory takes part in resolving
//! its dependencies.
use std::ffi::{CStr, c_void};
use std::os::raw::c_char;
use std::path::{Path, PathBuf};

use crate::error::{PluginManagerError, Result};

/// `pluginInterface` signature.
pub type InterfaceFn = unsafe extern "C-unwind" fn() -> *const c_char;
/// `pluginInitializer` and `pluginFinalizer` signature.
pub type HookFn = unsafe extern "C-unwind" fn();
/// `pluginInstancer` signature. Takes ownership of a boxed
/// [`PluginBase`](crate::PluginBase) and returns a boxed `Box<dyn Interface>`,
/// or null.
pub type InstancerFn = unsafe extern "C-unwind" fn(base: *mut c_void) -> *mut c_void;

/// Opens shared libraries.
pub trait LibraryLoader: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn DynamicLibrary>>;
}

/// An open shared library.
pub trait DynamicLibrary: Send {
    /// Address of an exported symbol, `None` if it isn't exported.
    fn symbol(&self, name: &str) -> Option<*const c_void>;

    /// Release the handle. Symbols looked up before are invalid afterwards.
    fn close(self: Box<Self>) -> Result<()>;
}

/// Loader backed by the platform dynamic linker.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeLoader;

impl LibraryLoader for NativeLoader {
    fn open(&self, path: &Path) -> Result<Box<dyn DynamicLibrary>> {
        let library = open_native(path).map_err(|e| PluginManagerError::LibraryOpen {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Ok(Box::new(NativeLibrary {
            path: path.to_path_buf(),
            library,
        }))
    }
}

#[cfg(unix)]
fn open_native(path: &Path) -> std::result::Result<libloading::Library, libloading::Error> {
    use libloading::os::unix::{Library, RTLD_LAZY, RTLD_LOCAL};
    // Running library constructors is inherent to loading a plugin.
    unsafe { Library::open(Some(path), RTLD_LAZY | RTLD_LOCAL) }.map(Into::into)
}

#[cfg(windows)]
fn open_native(path: &Path) -> std::result::Result<libloading::Library, libloading::Error> {
    use libloading::os::windows::{Library, LOAD_LIBRARY_SEARCH_DEFAULT_DIRS, LOAD_LIBRARY_SEARCH_DLL_LOAD_DIR};
    unsafe {
        Library::load_with_flags(path, LOAD_LIBRARY_SEARCH_DLL_LOAD_DIR | LOAD_LIBRARY_SEARCH_DEFAULT_DIRS)
    }
    .map(Into::into)
}

#[cfg(not(any(unix, windows)))]
fn open_native(path: &Path) -> std::result::Result<libloading::Library, libloading::Error> {
    unsafe { libloading::Library::new(path) }
}

#[derive(Debug)]
struct NativeLibrary {
    path: PathBuf,
    library: libloading::Library,
}

impl DynamicLibrary for NativeLibrary {
    fn symbol(&self, name: &str) -> Option<*const c_void> {
        // The symbol is only reinterpreted as an address here, never called.
        let symbol = unsafe { self.library.get::<*const c_void>(name.as_bytes()) }.ok()?;
        let address = *symbol;
        (!address.is_null()).then_some(address)
    }

    fn close(self: Box<Self>) -> Result<()> {
        let NativeLibrary { path, library } = *self;
        library.close().map_err(|e| PluginManagerError::LibraryClose {
            path,
            message: e.to_string(),
        })
    }
}

/// Look up `<plugin>_<symbol>` first, then the bare `<symbol>`.
pub(crate) fn plugin_symbol(library: &dyn DynamicLibrary, plugin: &str, symbol: &str) -> Option<*const c_void> {
    library
        .symbol(&format!("{}_{}", plugin, symbol))
        .or_else(|| library.symbol(symbol))
}

/// Converts a C string returned over FFI to a Rust String.
/// # Safety
/// `ptr` has to be null or point to a NUL-terminated string that stays valid
/// for the duration of the call.
pub(crate) unsafe fn ffi_string_from_ptr(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
}
