//! Engine lifecycle
//!
//! One [`Engine`] exists per process. It is built when the module is attached,
//! lives until the process exits, and is what every replacement entry point
//! consults to find the real implementation it stands in for.

use std::mem::size_of;
use std::sync::OnceLock;

use tracing::warn;

use crate::config::Config;
use crate::hook::{HookId, HookSpec, HookTable};
use crate::intercept::OutputLayer;
use crate::propagate::EnginePaths;

static ENGINE: OnceLock<Engine> = OnceLock::new();

/// Process-wide engine state.
pub struct Engine {
    pub table: HookTable,
    pub layer: OutputLayer,
    pub config: Config,
    pub paths: EnginePaths,
    /// Base address of the engine module itself.
    pub own_module: usize,
    /// Base address of the core system module.
    pub kernel: usize,
}

impl Engine {
    /// Modules that are never patched: patching them would make the engine
    /// intercept its own calls.
    pub fn excluded_modules(&self) -> Vec<usize> {
        vec![self.own_module, self.kernel]
    }
}

/// The engine, once attached.
pub fn engine() -> Option<&'static Engine> {
    ENGINE.get()
}

/// Install `engine` as the process's engine; the first one installed wins.
pub fn install(engine: Engine) -> &'static Engine {
    ENGINE.get_or_init(|| engine)
}

/// The real implementation of `id`, as a callable function pointer.
///
/// # Safety
/// `F` must be the exact `extern "system"` function pointer type of `id`.
pub unsafe fn original<F: Copy>(id: HookId) -> Option<F> {
    let address = engine()?.table.original(id).filter(|&a| a != 0)?;
    debug_assert_eq!(size_of::<F>(), size_of::<usize>());
    Some(std::mem::transmute_copy::<usize, F>(&address))
}

/// Build the hook table. `resolve` gives the addresses exported for an entry
/// point by the core system module and by its API set (0 when missing);
/// `replacement` gives the engine's own implementation.
pub fn build_table<R, P>(mut resolve: R, mut replacement: P) -> HookTable
where
    R: FnMut(HookId) -> (usize, usize),
    P: FnMut(HookId) -> usize,
{
    let specs = HookId::ALL
        .iter()
        .filter_map(|&id| {
            let (core, api) = resolve(id);
            let original = if core != 0 { core } else { api };
            if original == 0 {
                warn!("{} not found, not hooked", id.symbol());
                return None;
            }
            Some(HookSpec {
                id,
                replacement: replacement(id),
                original,
                fallback: (api != 0 && api != original).then_some(api),
            })
        })
        .collect();
    HookTable::new(specs)
}

#[cfg(windows)]
pub use self::windows_impl::{attach, detach, DllMain};

#[cfg(windows)]
mod windows_impl {
    use std::ffi::{c_void, OsString};
    use std::os::windows::ffi::OsStringExt;
    use std::path::PathBuf;

    use tracing::{debug, info, warn};
    use windows::core::{w, HSTRING, PCSTR};
    use windows::Win32::Foundation::{BOOL, HMODULE, TRUE};
    use windows::Win32::System::LibraryLoader::{
        DisableThreadLibraryCalls, GetModuleFileNameW, GetModuleHandleW, GetProcAddress,
    };
    use windows::Win32::System::SystemServices::{DLL_PROCESS_ATTACH, DLL_PROCESS_DETACH};

    use super::{build_table, engine, install, Engine};
    use crate::config::Config;
    use crate::core::console::Attribute;
    use crate::core::win32::{active_screen_info, with_active_output, Win32Console};
    use crate::hook::engine::patch_all_modules;
    use crate::hook::HookId;
    use crate::intercept::{self, OutputLayer};
    use crate::logging;
    use crate::propagate::{env, loader, process, EnginePaths};

    fn replacement(id: HookId) -> usize {
        match id {
            HookId::CreateProcessA => process::create_process_a_hook as usize,
            HookId::CreateProcessW => process::create_process_w_hook as usize,
            HookId::GetEnvironmentVariableA => env::get_environment_variable_a_hook as usize,
            HookId::GetEnvironmentVariableW => env::get_environment_variable_w_hook as usize,
            HookId::LoadLibraryA => loader::load_library_a_hook as usize,
            HookId::LoadLibraryW => loader::load_library_w_hook as usize,
            HookId::LoadLibraryExA => loader::load_library_ex_a_hook as usize,
            HookId::LoadLibraryExW => loader::load_library_ex_w_hook as usize,
            HookId::WriteConsoleA => intercept::write_console_a_hook as usize,
            HookId::WriteConsoleW => intercept::write_console_w_hook as usize,
            HookId::WriteFile => intercept::write_file_hook as usize,
        }
    }

    fn export(module: Option<HMODULE>, id: HookId) -> usize {
        let Some(module) = module else {
            return 0;
        };
        let symbol = format!("{}\0", id.symbol());
        unsafe { GetProcAddress(module, PCSTR::from_raw(symbol.as_ptr())) }.map_or(0, |f| f as usize)
    }

    fn module_handle(name: &str) -> Option<HMODULE> {
        unsafe { GetModuleHandleW(&HSTRING::from(name)) }.ok()
    }

    fn module_path(module: HMODULE) -> Option<PathBuf> {
        let mut buf = vec![0u16; 32 * 1024];
        let len = unsafe { GetModuleFileNameW(module, &mut buf) } as usize;
        (len > 0 && len < buf.len()).then(|| PathBuf::from(OsString::from_wide(&buf[..len])))
    }

    /// Build the engine and hook every module already loaded.
    pub fn attach(instance: HMODULE) {
        let config = Config::load();
        logging::init(&config.log);

        let kernel = match unsafe { GetModuleHandleW(w!("kernel32.dll")) } {
            Ok(kernel) => kernel,
            Err(e) => {
                warn!("kernel32.dll not found: {}", e);
                return;
            }
        };
        let table = build_table(
            |id| (export(Some(kernel), id), export(module_handle(id.api_set()), id)),
            replacement,
        );

        let screen = active_screen_info();
        let paths = EnginePaths::new(module_path(instance))
            .with_overrides(config.engine.path_32.clone(), config.engine.path_64.clone());
        let engine = install(Engine {
            table,
            layer: OutputLayer::new(screen.map_or(Attribute::DEFAULT, |s| s.attribute)),
            config,
            paths,
            own_module: instance.0 as usize,
            kernel: kernel.0 as usize,
        });
        info!(pid = std::process::id(), "Attached with {} hooks", engine.table.specs().len());

        env::publish_status(&engine.config.status_variable, screen);
        match patch_all_modules(&engine.table, false, &engine.excluded_modules()) {
            Ok(n) => debug!("Hooked {} import slots", n),
            Err(e) => warn!("Hooking stopped: {}", e),
        }
    }

    /// Undo the hooks (only when the module is being unloaded while the
    /// process keeps running) and put the console attribute back. At process
    /// exit the attribute is only restored if the output lock is free.
    pub fn detach(unloading: bool) {
        let Some(engine) = engine() else {
            return;
        };
        if unloading {
            if let Err(e) = patch_all_modules(&engine.table, true, &engine.excluded_modules()) {
                warn!("Unhooking stopped: {}", e);
            }
        }
        with_active_output(|handle| {
            let mut console = Win32Console::new(handle);
            if unloading {
                engine.layer.restore(&mut console);
            } else if !engine.layer.try_restore(&mut console) {
                // Threads are already gone at exit; one may have held the lock.
                debug!("Output busy at exit, attribute left as is");
            }
        });
        info!(pid = std::process::id(), "Detached");
    }

    #[no_mangle]
    #[allow(non_snake_case)]
    pub extern "system" fn DllMain(instance: HMODULE, reason: u32, reserved: *mut c_void) -> BOOL {
        match reason {
            DLL_PROCESS_ATTACH => {
                attach(instance);
                unsafe {
                    let _ = DisableThreadLibraryCalls(instance);
                }
            }
            // `reserved` is null for FreeLibrary and non-null at process exit.
            DLL_PROCESS_DETACH => detach(reserved.is_null()),
            _ => {}
        }
        TRUE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replacement(id: HookId) -> usize {
        0x9000 + HookId::ALL.iter().position(|&h| h == id).unwrap_or(0)
    }

    #[test]
    fn test_build_table_prefers_core_export() {
        let table = build_table(|_| (0x1000, 0x2000), replacement);
        assert_eq!(table.specs().len(), HookId::ALL.len());
        let spec = table.get(HookId::WriteFile).unwrap();
        assert_eq!(spec.original, 0x1000);
        assert_eq!(spec.fallback, Some(0x2000));
        assert_eq!(spec.replacement, replacement(HookId::WriteFile));
    }

    #[test]
    fn test_build_table_same_export_has_no_fallback() {
        let table = build_table(|_| (0x1000, 0x1000), replacement);
        assert_eq!(table.get(HookId::WriteConsoleW).unwrap().fallback, None);
        let table = build_table(|_| (0x1000, 0), replacement);
        assert_eq!(table.get(HookId::WriteConsoleW).unwrap().fallback, None);
    }

    #[test]
    fn test_build_table_skips_missing_exports() {
        let table = build_table(
            |id| match id {
                HookId::LoadLibraryExA => (0, 0),
                HookId::LoadLibraryExW => (0, 0x3000),
                _ => (0x1000, 0),
            },
            replacement,
        );
        assert!(table.get(HookId::LoadLibraryExA).is_none());
        let spec = table.get(HookId::LoadLibraryExW).unwrap();
        assert_eq!(spec.original, 0x3000);
        assert_eq!(spec.fallback, None);
        assert_eq!(table.specs().len(), HookId::ALL.len() - 1);
    }

    #[test]
    fn test_excluded_modules() {
        let engine = Engine {
            table: HookTable::default(),
            layer: OutputLayer::new(crate::core::console::Attribute::DEFAULT),
            config: Config::default(),
            paths: EnginePaths::new(None),
            own_module: 0x1000_0000,
            kernel: 0x7700_0000,
        };
        assert_eq!(engine.excluded_modules(), vec![0x1000_0000, 0x7700_0000]);
    }
}
