//! Import table patching
//!
//! [`patch_module`] rewrites the import slots of one mapped image;
//! [`patch_modules`] runs it over a module list and stops at the first module
//! that fails.

use tracing::{debug, warn};

use super::patch::SlotWriter;
use super::pe::{import_descriptors, import_slots, ImageHeaders, Width, HEADER_SPAN};
use super::table::{system_module_index, HookTable};
use super::HookError;

/// A module mapped into the process.
#[derive(Debug, Clone)]
pub struct ModuleRef {
    pub base: *mut u8,
    pub name: String,
}

/// Hook (or, with `restoring`, unhook) every matching import slot of the image
/// mapped at `base`. Returns the number of slots rewritten.
///
/// A module without imports is left untouched. A failed slot write does not
/// stop the pass; the remaining slots are still attempted and the failure is
/// reported afterwards as [`HookError::SlotsFailed`].
///
/// # Safety
/// `base` must be the base address of an image mapped in this process (or of
/// a buffer laid out like one, at least [`HEADER_SPAN`] bytes long).
pub unsafe fn patch_module<W: SlotWriter + ?Sized>(
    base: *mut u8,
    table: &HookTable,
    restoring: bool,
    writer: &mut W,
) -> Result<usize, HookError> {
    let header_page = std::slice::from_raw_parts(base as *const u8, HEADER_SPAN);
    let headers = ImageHeaders::parse(header_page)
        .filter(|h| h.magic == Width::native().optional_magic())
        .ok_or(HookError::InvalidImage(base as usize))?;

    let mut patched = 0;
    let mut failed = 0;
    for descriptor in import_descriptors(base, &headers) {
        let Some(import) = system_module_index(&descriptor.module) else {
            continue;
        };
        for slot in import_slots(base, descriptor.first_thunk) {
            let current = slot.read_unaligned();
            let Some(target) = table.patch_target(current, import, restoring) else {
                continue;
            };
            match writer.write_slot(slot, target) {
                Ok(()) => {
                    debug!(slot = ?slot, from = current, to = target, import = %descriptor.module, "patched slot");
                    patched += 1;
                }
                Err(e) => {
                    warn!("{}", e);
                    failed += 1;
                }
            }
        }
    }

    if failed > 0 {
        return Err(HookError::SlotsFailed { failed });
    }
    Ok(patched)
}

/// Run [`patch_module`] over `modules`, aborting at the first failure.
///
/// # Safety
/// Every `ModuleRef::base` must satisfy the requirements of [`patch_module`].
pub unsafe fn patch_modules<W: SlotWriter + ?Sized>(
    modules: &[ModuleRef],
    table: &HookTable,
    restoring: bool,
    writer: &mut W,
) -> Result<usize, HookError> {
    let mut total = 0;
    for module in modules {
        debug!(
            "{} {} at {:p}",
            if restoring { "Unhooking" } else { "Hooking" },
            module.name,
            module.base
        );
        match patch_module(module.base, table, restoring, writer) {
            Ok(n) => total += n,
            Err(e) => {
                warn!("Failed to patch {}: {}", module.name, e);
                return Err(e);
            }
        }
    }
    Ok(total)
}

#[cfg(windows)]
pub use self::windows_impl::{loaded_modules, patch_all_modules};

#[cfg(windows)]
mod windows_impl {
    use std::mem::size_of;

    use windows::Win32::Foundation::CloseHandle;
    use windows::Win32::System::Diagnostics::ToolHelp::{
        CreateToolhelp32Snapshot, Module32FirstW, Module32NextW, MODULEENTRY32W, TH32CS_SNAPMODULE,
    };
    use windows::Win32::System::Threading::GetCurrentProcessId;

    use super::{patch_modules, HookError, HookTable, ModuleRef};
    use crate::hook::patch::ProtectedWriter;

    /// Modules currently mapped into this process, minus those whose base is in `exclude`.
    pub fn loaded_modules(exclude: &[usize]) -> Result<Vec<ModuleRef>, HookError> {
        let mut modules = Vec::new();
        unsafe {
            let snapshot = CreateToolhelp32Snapshot(TH32CS_SNAPMODULE, GetCurrentProcessId())
                .map_err(|e| HookError::Snapshot(e.to_string()))?;

            let mut entry = MODULEENTRY32W {
                dwSize: size_of::<MODULEENTRY32W>() as u32,
                ..Default::default()
            };
            let mut ok = Module32FirstW(snapshot, &mut entry).is_ok();
            while ok {
                let base = entry.hModule.0 as usize;
                if !exclude.contains(&base) {
                    let len = entry.szModule.iter().position(|&c| c == 0).unwrap_or(entry.szModule.len());
                    modules.push(ModuleRef {
                        base: base as *mut u8,
                        name: String::from_utf16_lossy(&entry.szModule[..len]),
                    });
                }
                ok = Module32NextW(snapshot, &mut entry).is_ok();
            }
            let _ = CloseHandle(snapshot);
        }
        Ok(modules)
    }

    /// Patch every loaded module except `exclude` (the engine itself and the
    /// core system module).
    pub fn patch_all_modules(table: &HookTable, restoring: bool, exclude: &[usize]) -> Result<usize, HookError> {
        let modules = loaded_modules(exclude)?;
        unsafe { patch_modules(&modules, table, restoring, &mut ProtectedWriter) }
    }
}
