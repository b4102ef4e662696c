//! Injection capability and engine module paths
//!
//! The engine ships one module per pointer width (`vtshim32.dll`,
//! `vtshim64.dll`). A child gets the one matching its own width.

use std::path::{Path, PathBuf};

use super::InjectError;
use crate::hook::Width;

/// Loads an engine module into a suspended child before its first instruction.
pub trait Injector<P: ?Sized> {
    fn inject(&self, process: &P, width: Width, module: &Path) -> Result<(), InjectError>;
}

/// Where to find the engine module for each width.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnginePaths {
    current: Option<PathBuf>,
    path_32: Option<PathBuf>,
    path_64: Option<PathBuf>,
}

impl EnginePaths {
    /// `current` is the path of the running engine module.
    pub fn new(current: Option<PathBuf>) -> Self {
        Self {
            current,
            path_32: None,
            path_64: None,
        }
    }

    /// Explicit paths that take precedence over the derived ones.
    pub fn with_overrides(mut self, path_32: Option<PathBuf>, path_64: Option<PathBuf>) -> Self {
        self.path_32 = path_32;
        self.path_64 = path_64;
        self
    }

    pub fn for_width(&self, width: Width) -> Option<PathBuf> {
        let configured = match width {
            Width::Bits32 => &self.path_32,
            Width::Bits64 => &self.path_64,
        };
        if let Some(path) = configured {
            return Some(path.clone());
        }
        let current = self.current.as_deref()?;
        if width == Width::native() {
            Some(current.to_path_buf())
        } else {
            sibling(current, width)
        }
    }
}

/// `dir/name64.dll` for `dir/name32.dll` (and the reverse); a stem without a
/// width suffix just gains one.
pub fn sibling(current: &Path, width: Width) -> Option<PathBuf> {
    let stem = current.file_stem()?.to_str()?;
    let base = stem
        .strip_suffix("32")
        .or_else(|| stem.strip_suffix("64"))
        .unwrap_or(stem);
    let ext = current.extension().and_then(|e| e.to_str()).unwrap_or("dll");
    Some(current.with_file_name(format!("{}{}.{}", base, width.bits(), ext)))
}

#[cfg(windows)]
pub use self::windows_impl::RemoteThreadInjector;

#[cfg(windows)]
mod windows_impl {
    use std::ffi::c_void;
    use std::os::windows::ffi::OsStrExt;
    use std::path::Path;

    use windows::core::{s, w};
    use windows::Win32::Foundation::{CloseHandle, HANDLE};
    use windows::Win32::System::Diagnostics::Debug::WriteProcessMemory;
    use windows::Win32::System::LibraryLoader::{GetModuleHandleW, GetProcAddress};
    use windows::Win32::System::Memory::{
        VirtualAllocEx, VirtualFreeEx, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_READWRITE,
    };
    use windows::Win32::System::Threading::{CreateRemoteThread, GetExitCodeThread, WaitForSingleObject, INFINITE};

    use super::{InjectError, Injector};
    use crate::hook::Width;
    use crate::propagate::process::Win32Child;

    type ThreadStart = unsafe extern "system" fn(*mut c_void) -> u32;

    /// Runs `LoadLibraryW(path)` on a remote thread in the child.
    ///
    /// `kernel32.dll` sits at the same address in every process of one width,
    /// so only same-width children can be served.
    #[derive(Debug, Default)]
    pub struct RemoteThreadInjector;

    fn remote(what: &str, e: windows::core::Error) -> InjectError {
        InjectError::Remote(format!("{what}: {e}"))
    }

    /// Child-side copy of the module path, released on drop.
    struct RemoteBuffer {
        process: HANDLE,
        ptr: *mut c_void,
    }

    impl Drop for RemoteBuffer {
        fn drop(&mut self) {
            unsafe {
                let _ = VirtualFreeEx(self.process, self.ptr, 0, MEM_RELEASE);
            }
        }
    }

    impl Injector<Win32Child> for RemoteThreadInjector {
        fn inject(&self, child: &Win32Child, width: Width, module: &Path) -> Result<(), InjectError> {
            if width != Width::native() {
                return Err(InjectError::WidthMismatch(width));
            }

            let wide: Vec<u16> = module.as_os_str().encode_wide().chain(std::iter::once(0)).collect();
            let size = wide.len() * std::mem::size_of::<u16>();
            let process = child.process();

            unsafe {
                let ptr = VirtualAllocEx(process, None, size, MEM_COMMIT | MEM_RESERVE, PAGE_READWRITE);
                if ptr.is_null() {
                    return Err(InjectError::Remote("VirtualAllocEx failed".into()));
                }
                let buffer = RemoteBuffer { process, ptr };
                WriteProcessMemory(process, buffer.ptr, wide.as_ptr().cast(), size, None)
                    .map_err(|e| remote("WriteProcessMemory", e))?;

                let kernel = GetModuleHandleW(w!("kernel32.dll")).map_err(|e| remote("GetModuleHandleW", e))?;
                let load_library = GetProcAddress(kernel, s!("LoadLibraryW"))
                    .ok_or_else(|| InjectError::Remote("LoadLibraryW not found".into()))?;
                let start: ThreadStart = std::mem::transmute(load_library);

                let thread = CreateRemoteThread(process, None, 0, Some(start), Some(buffer.ptr as *const c_void), 0, None)
                    .map_err(|e| remote("CreateRemoteThread", e))?;
                WaitForSingleObject(thread, INFINITE);
                let mut code = 0u32;
                let status = GetExitCodeThread(thread, &mut code);
                let _ = CloseHandle(thread);
                status.map_err(|e| remote("GetExitCodeThread", e))?;

                // The exit code is the low half of the loaded module's handle.
                if code == 0 {
                    return Err(InjectError::Remote(format!("LoadLibraryW({}) failed in child", module.display())));
                }
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn other(width: Width) -> Width {
        match width {
            Width::Bits32 => Width::Bits64,
            Width::Bits64 => Width::Bits32,
        }
    }

    #[test]
    fn test_sibling_swaps_suffix() {
        let p = Path::new("/opt/tools/vtshim64.dll");
        assert_eq!(sibling(p, Width::Bits32), Some(PathBuf::from("/opt/tools/vtshim32.dll")));
        let p = Path::new("/opt/tools/vtshim32.dll");
        assert_eq!(sibling(p, Width::Bits64), Some(PathBuf::from("/opt/tools/vtshim64.dll")));
    }

    #[test]
    fn test_sibling_adds_suffix() {
        let p = Path::new("/opt/tools/vtshim.dll");
        assert_eq!(sibling(p, Width::Bits32), Some(PathBuf::from("/opt/tools/vtshim32.dll")));
    }

    #[test]
    fn test_native_width_uses_running_module() {
        let paths = EnginePaths::new(Some(PathBuf::from("/x/vtshim.dll")));
        assert_eq!(paths.for_width(Width::native()), Some(PathBuf::from("/x/vtshim.dll")));
        let expected = format!("/x/vtshim{}.dll", other(Width::native()).bits());
        assert_eq!(paths.for_width(other(Width::native())), Some(PathBuf::from(expected)));
    }

    #[test]
    fn test_overrides_win() {
        let paths = EnginePaths::new(Some(PathBuf::from("/x/vtshim.dll")))
            .with_overrides(Some(PathBuf::from("/y/a.dll")), Some(PathBuf::from("/y/b.dll")));
        assert_eq!(paths.for_width(Width::Bits32), Some(PathBuf::from("/y/a.dll")));
        assert_eq!(paths.for_width(Width::Bits64), Some(PathBuf::from("/y/b.dll")));
    }

    #[test]
    fn test_unknown_current_module() {
        let paths = EnginePaths::new(None);
        assert_eq!(paths.for_width(Width::Bits32), None);
        let paths = paths.with_overrides(None, Some(PathBuf::from("/y/b.dll")));
        assert_eq!(paths.for_width(Width::Bits64), Some(PathBuf::from("/y/b.dll")));
    }
}
