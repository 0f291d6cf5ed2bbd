//! Exports an interface string of an older revision of the Animal interface.
#![allow(non_upper_case_globals, non_snake_case)]

use std::ffi::c_void;
use std::os::raw::c_char;

// Keep in sync with pluginmgr_core::PLUGIN_VERSION.
#[unsafe(no_mangle)]
pub static pluginVersion: u32 = 5;

#[unsafe(no_mangle)]
pub extern "C-unwind" fn pluginInterface() -> *const c_char {
    c"cz.example.Animal/0.1".as_ptr()
}

#[unsafe(no_mangle)]
pub extern "C-unwind" fn pluginInitializer() {}

#[unsafe(no_mangle)]
pub extern "C-unwind" fn pluginFinalizer() {}

#[unsafe(no_mangle)]
pub extern "C-unwind" fn pluginInstancer(_base: *mut c_void) -> *mut c_void {
    std::ptr::null_mut()
}
