//! Valid version and interface, but no instancer.
#![allow(non_upper_case_globals, non_snake_case)]

use std::os::raw::c_char;

// Keep in sync with pluginmgr_core::PLUGIN_VERSION.
#[unsafe(no_mangle)]
pub static pluginVersion: u32 = 5;

#[unsafe(no_mangle)]
pub extern "C-unwind" fn pluginInterface() -> *const c_char {
    c"cz.example.Animal/1.0".as_ptr()
}

#[unsafe(no_mangle)]
pub extern "C-unwind" fn pluginInitializer() {}

#[unsafe(no_mangle)]
pub extern "C-unwind" fn pluginFinalizer() {}

// The loader expects "pluginInstancer".
#[unsafe(no_mangle)]
pub extern "C-unwind" fn pluginInstance() {}
