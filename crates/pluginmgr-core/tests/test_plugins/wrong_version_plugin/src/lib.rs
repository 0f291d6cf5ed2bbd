//! Exports a plugin version the manager doesn't accept.
#![allow(non_upper_case_globals, non_snake_case)]

use std::ffi::c_void;
use std::os::raw::c_char;

#[unsafe(no_mangle)]
pub static pluginVersion: u32 = 0;

#[unsafe(no_mangle)]
pub extern "C-unwind" fn pluginInterface() -> *const c_char {
    c"cz.example.Animal/1.0".as_ptr()
}

#[unsafe(no_mangle)]
pub extern "C-unwind" fn pluginInitializer() {}

#[unsafe(no_mangle)]
pub extern "C-unwind" fn pluginFinalizer() {}

#[unsafe(no_mangle)]
pub extern "C-unwind" fn pluginInstancer(_base: *mut c_void) -> *mut c_void {
    std::ptr::null_mut()
}
