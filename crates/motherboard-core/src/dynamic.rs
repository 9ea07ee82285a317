//! Optional dynamic-library device backend (the `dynamic` feature).
//!
//! Mirrors `device_manager.py`'s `ctypes.CDLL` + `get_dll_function`
//! binding: a device's implementation lives in a shared library exposing
//! a fixed C ABI, and this module adapts that ABI to the `Device` trait.
//! Off by default; every device exercised by this crate's own tests is
//! a plain Rust struct built in-process, since the real chip emulations
//! this backend would load are out of scope collaborators.

use std::path::{Path, PathBuf};

use libloading::{Library, Symbol};

use crate::device::{Device, Role, TickOutcome};
use crate::error::MotherboardError;

type ModuleResetFn = unsafe extern "C" fn();
type ModuleTickFn = unsafe extern "C" fn(tick_no: u32) -> i32;
type ModuleSaveFn = unsafe extern "C" fn(out_len: *mut usize) -> *mut u8;
type ModuleRestoreFn = unsafe extern "C" fn(data: *const u8, len: usize) -> i32;
type SetLogLevelFn = unsafe extern "C" fn(level: u8);
type DataWriteFn = unsafe extern "C" fn(addr: u32, value: u16, width: u8);
type DataReadFn = unsafe extern "C" fn(addr: u32, width: u8) -> u16;
type FreeBufFn = unsafe extern "C" fn(ptr: *mut u8, len: usize);

/// A device whose implementation lives in a dynamically loaded library.
///
/// # Safety
/// The library at `path` must export a C ABI compatible with the
/// function-pointer types above — the same contract
/// `device_manager.py`'s `CommonDevModule`/`ReadWriteModule` binds via
/// `ctypes`. A library that doesn't is undefined behavior the moment any
/// method below is called; the only check this code can make is that the
/// required symbols are present at all.
pub struct DynamicDevice {
    name: String,
    path: PathBuf,
    lib: &'static Library,
    module_reset: Symbol<'static, ModuleResetFn>,
    module_tick: Symbol<'static, ModuleTickFn>,
    module_save: Symbol<'static, ModuleSaveFn>,
    module_restore: Symbol<'static, ModuleRestoreFn>,
    set_log_level: Option<Symbol<'static, SetLogLevelFn>>,
    data_write: Option<Symbol<'static, DataWriteFn>>,
    data_read: Option<Symbol<'static, DataReadFn>>,
    free_buf: Option<Symbol<'static, FreeBufFn>>,
}

impl DynamicDevice {
    /// Loads `path` and binds the required `module_*` symbols. Optional
    /// symbols (`set_log_level`, `data_write`/`data_read`, a matching
    /// `free_buf` for `module_save`'s returned buffer) are bound if
    /// present; calling the corresponding `Device` method is a no-op (or
    /// returns an open-bus value) when the library doesn't export them.
    ///
    /// The library is intentionally leaked for the process's lifetime:
    /// devices are loaded once at startup and never unloaded, matching
    /// the source's one-shot `ctypes.CDLL` load per device.
    pub fn load(name: impl Into<String>, path: impl AsRef<Path>) -> Result<Self, MotherboardError> {
        let path = path.as_ref().to_path_buf();
        let lib = unsafe { Library::new(&path) }.map_err(|e| MotherboardError::DynamicLoadError {
            path: path.clone(),
            source: e,
        })?;
        let lib: &'static Library = Box::leak(Box::new(lib));

        let required = |symbol: &'static [u8]| -> Result<_, MotherboardError> {
            unsafe { lib.get(symbol) }.map_err(|_| MotherboardError::DynamicSymbolMissing {
                path: path.clone(),
                symbol: std::str::from_utf8(&symbol[..symbol.len() - 1]).unwrap_or("<invalid>"),
            })
        };
        let optional = |symbol: &'static [u8]| unsafe { lib.get(symbol) }.ok();

        Ok(Self {
            name: name.into(),
            path,
            lib,
            module_reset: required(b"module_reset\0")?,
            module_tick: required(b"module_tick\0")?,
            module_save: required(b"module_save\0")?,
            module_restore: required(b"module_restore\0")?,
            set_log_level: optional(b"set_log_level\0"),
            data_write: optional(b"data_write\0"),
            data_read: optional(b"data_read\0"),
            free_buf: optional(b"free_buf\0"),
        })
    }

    pub fn library_path(&self) -> &Path {
        &self.path
    }
}

impl Device for DynamicDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn role(&self) -> Role {
        Role::Device
    }

    fn set_log_level(&mut self, level: u8) {
        if let Some(f) = &self.set_log_level {
            unsafe { f(level) };
        }
    }

    fn module_reset(&mut self) {
        unsafe { (self.module_reset)() };
    }

    fn module_save(&self) -> Vec<u8> {
        let mut len: usize = 0;
        let ptr = unsafe { (self.module_save)(&mut len) };
        if ptr.is_null() || len == 0 {
            return Vec::new();
        }
        let data = unsafe { std::slice::from_raw_parts(ptr, len) }.to_vec();
        if let Some(free) = &self.free_buf {
            unsafe { free(ptr, len) };
        }
        data
    }

    fn module_restore(&mut self, data: &[u8]) -> Result<(), MotherboardError> {
        let rc = unsafe { (self.module_restore)(data.as_ptr(), data.len()) };
        if rc == 0 {
            Ok(())
        } else {
            Err(MotherboardError::RestoreRejected {
                device: self.name.clone(),
                reason: format!("dynamic module returned code {rc}"),
            })
        }
    }

    fn module_tick(&mut self, tick_no: u32) -> TickOutcome {
        let rc = unsafe { (self.module_tick)(tick_no) };
        if rc == 0 {
            TickOutcome::Ok
        } else {
            TickOutcome::Fault(rc as u32)
        }
    }

    fn data_write(&mut self, addr: u32, value: u16, width: u8) {
        if let Some(f) = &self.data_write {
            unsafe { f(addr, value, width) };
        }
    }

    fn data_read(&mut self, addr: u32, width: u8) -> u16 {
        match &self.data_read {
            Some(f) => unsafe { f(addr, width) },
            None => 0xFFFF,
        }
    }
}

impl Drop for DynamicDevice {
    fn drop(&mut self) {
        // `lib` was leaked deliberately (see `load`); nothing to release
        // here beyond letting the bound symbols go out of scope first.
        let _ = self.lib;
    }
}
