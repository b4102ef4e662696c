//! Writing a single import slot
//!
//! All raw slot writes go through [`SlotWriter`]. The Windows writer makes the
//! page writable for the duration of one write and puts the old protection
//! back when its guard drops, on every path.

use super::HookError;

pub trait SlotWriter {
    /// Store `value` into `slot`.
    ///
    /// # Safety
    /// `slot` must be the address of a pointer-sized import slot in a mapped image.
    unsafe fn write_slot(&mut self, slot: *mut usize, value: usize) -> Result<(), HookError>;
}

#[cfg(windows)]
pub use self::windows_impl::{ProtectGuard, ProtectedWriter};

#[cfg(windows)]
mod windows_impl {
    use std::ffi::c_void;
    use std::mem::size_of;

    use windows::Win32::System::Memory::{VirtualProtect, PAGE_PROTECTION_FLAGS, PAGE_READWRITE};

    use super::{HookError, SlotWriter};

    /// Scoped `PAGE_READWRITE` over `size` bytes at `addr`.
    pub struct ProtectGuard {
        addr: *const c_void,
        size: usize,
        old: PAGE_PROTECTION_FLAGS,
    }

    impl ProtectGuard {
        /// # Safety
        /// `addr..addr + size` must lie in committed memory of this process.
        pub unsafe fn acquire(addr: *const c_void, size: usize) -> Result<Self, HookError> {
            let mut old = PAGE_PROTECTION_FLAGS(0);
            VirtualProtect(addr, size, PAGE_READWRITE, &mut old).map_err(|e| HookError::Protect {
                addr: addr as usize,
                reason: e.to_string(),
            })?;
            Ok(Self { addr, size, old })
        }
    }

    impl Drop for ProtectGuard {
        fn drop(&mut self) {
            let mut dummy = PAGE_PROTECTION_FLAGS(0);
            unsafe {
                let _ = VirtualProtect(self.addr, self.size, self.old, &mut dummy);
            }
        }
    }

    /// Writer for import slots of modules mapped into this process.
    #[derive(Debug, Default)]
    pub struct ProtectedWriter;

    impl SlotWriter for ProtectedWriter {
        unsafe fn write_slot(&mut self, slot: *mut usize, value: usize) -> Result<(), HookError> {
            let _guard = ProtectGuard::acquire(slot as *const c_void, size_of::<usize>())?;
            slot.write_volatile(value);
            if slot.read_volatile() != value {
                return Err(HookError::Write(slot as usize));
            }
            Ok(())
        }
    }
}
