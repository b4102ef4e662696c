//! Hooking modules as they are loaded.

/// `LoadLibraryEx` flags that map a file without running any of its code.
pub const LOAD_LIBRARY_AS_DATAFILE: u32 = 0x0000_0002;
pub const LOAD_LIBRARY_AS_IMAGE_RESOURCE: u32 = 0x0000_0020;
pub const LOAD_LIBRARY_AS_DATAFILE_EXCLUSIVE: u32 = 0x0000_0040;

const DATA_ONLY: u32 = LOAD_LIBRARY_AS_DATAFILE | LOAD_LIBRARY_AS_IMAGE_RESOURCE | LOAD_LIBRARY_AS_DATAFILE_EXCLUSIVE;

pub fn is_data_only(flags: u32) -> bool {
    flags & DATA_ONLY != 0
}

/// Whether a module just returned by the loader should be patched.
pub fn should_hook(module: usize, flags: u32, excluded: &[usize]) -> bool {
    module != 0 && !excluded.contains(&module) && !is_data_only(flags)
}

#[cfg(windows)]
pub use self::windows_impl::{
    load_library_a_hook, load_library_ex_a_hook, load_library_ex_w_hook, load_library_w_hook,
};

#[cfg(windows)]
mod windows_impl {
    use tracing::{debug, warn};
    use windows::Win32::Foundation::{HANDLE, HMODULE};

    use super::should_hook;
    use crate::hook::patch::ProtectedWriter;
    use crate::hook::{patch_module, HookId};
    use crate::propagate::{narrow_arg, wide_arg};
    use crate::runtime;

    type LoadLibraryAFn = unsafe extern "system" fn(*const u8) -> HMODULE;
    type LoadLibraryWFn = unsafe extern "system" fn(*const u16) -> HMODULE;
    type LoadLibraryExAFn = unsafe extern "system" fn(*const u8, HANDLE, u32) -> HMODULE;
    type LoadLibraryExWFn = unsafe extern "system" fn(*const u16, HANDLE, u32) -> HMODULE;

    fn after_load(module: HMODULE, flags: u32, name: impl FnOnce() -> String) {
        let Some(engine) = runtime::engine() else {
            return;
        };
        let base = module.0 as usize;
        if !engine.config.propagate.loaded_modules || !should_hook(base, flags, &engine.excluded_modules()) {
            return;
        }
        let name = name();
        debug!("Hooking in {}", name);
        if let Err(e) = unsafe { patch_module(base as *mut u8, &engine.table, false, &mut ProtectedWriter) } {
            warn!("Failed to hook {}: {}", name, e);
        }
    }

    pub unsafe extern "system" fn load_library_a_hook(name: *const u8) -> HMODULE {
        let Some(load) = runtime::original::<LoadLibraryAFn>(HookId::LoadLibraryA) else {
            return HMODULE::default();
        };
        let module = load(name);
        after_load(module, 0, || narrow_arg(name));
        module
    }

    pub unsafe extern "system" fn load_library_w_hook(name: *const u16) -> HMODULE {
        let Some(load) = runtime::original::<LoadLibraryWFn>(HookId::LoadLibraryW) else {
            return HMODULE::default();
        };
        let module = load(name);
        after_load(module, 0, || wide_arg(name));
        module
    }

    pub unsafe extern "system" fn load_library_ex_a_hook(name: *const u8, file: HANDLE, flags: u32) -> HMODULE {
        let Some(load) = runtime::original::<LoadLibraryExAFn>(HookId::LoadLibraryExA) else {
            return HMODULE::default();
        };
        let module = load(name, file, flags);
        after_load(module, flags, || narrow_arg(name));
        module
    }

    pub unsafe extern "system" fn load_library_ex_w_hook(name: *const u16, file: HANDLE, flags: u32) -> HMODULE {
        let Some(load) = runtime::original::<LoadLibraryExWFn>(HookId::LoadLibraryExW) else {
            return HMODULE::default();
        };
        let module = load(name, file, flags);
        after_load(module, flags, || wide_arg(name));
        module
    }
}
