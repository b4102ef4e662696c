//! Output interception layer
//!
//! [`OutputLayer`] owns the process's interpreter behind a mutex, so each
//! intercepted write is interpreted as a unit even when several threads write
//! at once. The Windows replacements for `WriteConsoleA`, `WriteConsoleW` and
//! `WriteFile` decide per call whether to interpret or pass straight through.

use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};

use tracing::trace;

use crate::core::console::{Attribute, Console};
use crate::core::interpreter::{escape_for_log, DeviceId, Interpreter};

/// `ENABLE_PROCESSED_OUTPUT` console mode flag.
pub const PROCESSED_OUTPUT: u32 = 0x0001;

/// What a replacement write does with one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Interpret,
    PassThrough,
}

/// Decide from the target handle's console mode (`None` for a handle that
/// is not a console). Programs that turned processing off get raw output.
pub fn route(console_mode: Option<u32>) -> Route {
    match console_mode {
        Some(mode) if mode & PROCESSED_OUTPUT != 0 => Route::Interpret,
        _ => Route::PassThrough,
    }
}

pub struct OutputLayer {
    interpreter: Mutex<Interpreter>,
}

impl OutputLayer {
    /// `current` is the console attribute captured at attach.
    pub fn new(current: Attribute) -> Self {
        Self {
            interpreter: Mutex::new(Interpreter::new(current)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Interpreter> {
        // A panic mid-write leaves nothing worth discarding.
        self.interpreter.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Interpret UTF-16 output for `device`. Returns the units consumed.
    pub fn write_units<C: Console + ?Sized>(&self, console: &mut C, device: DeviceId, units: &[u16]) -> usize {
        trace!(device = device.0, "write \"{}\"", escape_for_log(units));
        self.lock().write(console, device, units)
    }

    /// Interpret byte output, decoding it with `decode` first. Returns the
    /// bytes consumed, or `None` when decoding failed and the caller should
    /// fall back to the unmodified write.
    pub fn write_bytes<C, D>(&self, console: &mut C, device: DeviceId, bytes: &[u8], decode: D) -> Option<usize>
    where
        C: Console + ?Sized,
        D: FnOnce(&[u8]) -> Option<Vec<u16>>,
    {
        let units = decode(bytes)?;
        self.write_units(console, device, &units);
        Some(bytes.len())
    }

    /// Flush and put the attach-time attribute back.
    pub fn restore<C: Console + ?Sized>(&self, console: &mut C) {
        self.lock().restore(console);
    }

    /// Like [`OutputLayer::restore`], but gives up when another thread holds
    /// the interpreter. At process exit that thread may already be gone with
    /// the lock still held. Returns whether the attribute was restored.
    pub fn try_restore<C: Console + ?Sized>(&self, console: &mut C) -> bool {
        let mut interpreter = match self.interpreter.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(e)) => e.into_inner(),
            Err(TryLockError::WouldBlock) => return false,
        };
        interpreter.restore(console);
        true
    }

    /// The attribute `ESC[0m` returns to.
    pub fn original_attribute(&self) -> Attribute {
        self.lock().attributes().original_attribute()
    }
}

#[cfg(windows)]
pub use self::windows_impl::{write_console_a_hook, write_console_w_hook, write_file_hook};

#[cfg(windows)]
mod windows_impl {
    use std::ffi::c_void;

    use windows::Win32::Foundation::{BOOL, HANDLE, TRUE};
    use windows::Win32::Globalization::{MultiByteToWideChar, MULTI_BYTE_TO_WIDE_CHAR_FLAGS};
    use windows::Win32::System::Console::GetConsoleOutputCP;
    use windows::Win32::System::IO::OVERLAPPED;

    use super::{route, Route};
    use crate::core::interpreter::DeviceId;
    use crate::core::win32::{console_mode, Win32Console};
    use crate::hook::HookId;
    use crate::runtime;

    type WriteConsoleFn = unsafe extern "system" fn(HANDLE, *const c_void, u32, *mut u32, *const c_void) -> BOOL;
    type WriteFileFn = unsafe extern "system" fn(HANDLE, *const u8, u32, *mut u32, *mut OVERLAPPED) -> BOOL;

    /// Decode console output bytes using the console output code page.
    fn decode_output_cp(bytes: &[u8]) -> Option<Vec<u16>> {
        if bytes.is_empty() {
            return Some(Vec::new());
        }
        unsafe {
            let cp = GetConsoleOutputCP();
            let len = MultiByteToWideChar(cp, MULTI_BYTE_TO_WIDE_CHAR_FLAGS(0), bytes, None);
            if len <= 0 {
                return None;
            }
            let mut wide = vec![0u16; len as usize];
            let n = MultiByteToWideChar(cp, MULTI_BYTE_TO_WIDE_CHAR_FLAGS(0), bytes, Some(&mut wide));
            if n <= 0 {
                return None;
            }
            wide.truncate(n as usize);
            Some(wide)
        }
    }

    fn device(handle: HANDLE) -> DeviceId {
        DeviceId(handle.0 as usize)
    }

    /// Interpret `len` bytes at `buffer`; `None` means pass through.
    unsafe fn interpret_bytes(handle: HANDLE, buffer: *const c_void, len: u32) -> Option<u32> {
        let engine = runtime::engine()?;
        if buffer.is_null() || route(console_mode(handle)) == Route::PassThrough {
            return None;
        }
        let bytes = std::slice::from_raw_parts(buffer.cast::<u8>(), len as usize);
        let mut console = Win32Console::new(handle);
        engine
            .layer
            .write_bytes(&mut console, device(handle), bytes, decode_output_cp)
            .map(|n| n as u32)
    }

    unsafe fn call_write_console(id: HookId, h: HANDLE, buf: *const c_void, n: u32, written: *mut u32, reserved: *const c_void) -> BOOL {
        match runtime::original::<WriteConsoleFn>(id) {
            Some(f) => f(h, buf, n, written, reserved),
            None => BOOL(0),
        }
    }

    pub unsafe extern "system" fn write_console_a_hook(
        handle: HANDLE,
        buffer: *const c_void,
        len: u32,
        written: *mut u32,
        reserved: *const c_void,
    ) -> BOOL {
        match interpret_bytes(handle, buffer, len) {
            Some(n) => {
                if !written.is_null() {
                    *written = n;
                }
                TRUE
            }
            None => call_write_console(HookId::WriteConsoleA, handle, buffer, len, written, reserved),
        }
    }

    pub unsafe extern "system" fn write_console_w_hook(
        handle: HANDLE,
        buffer: *const c_void,
        len: u32,
        written: *mut u32,
        reserved: *const c_void,
    ) -> BOOL {
        let Some(engine) = runtime::engine() else {
            return call_write_console(HookId::WriteConsoleW, handle, buffer, len, written, reserved);
        };
        if buffer.is_null() || route(console_mode(handle)) == Route::PassThrough {
            return call_write_console(HookId::WriteConsoleW, handle, buffer, len, written, reserved);
        }

        let units = std::slice::from_raw_parts(buffer.cast::<u16>(), len as usize);
        let mut console = Win32Console::new(handle);
        let n = engine.layer.write_units(&mut console, device(handle), units);
        if !written.is_null() {
            *written = n as u32;
        }
        TRUE
    }

    pub unsafe extern "system" fn write_file_hook(
        handle: HANDLE,
        buffer: *const u8,
        len: u32,
        written: *mut u32,
        overlapped: *mut OVERLAPPED,
    ) -> BOOL {
        if let Some(n) = interpret_bytes(handle, buffer.cast(), len) {
            if !written.is_null() {
                *written = n;
            }
            return TRUE;
        }
        match runtime::original::<WriteFileFn>(HookId::WriteFile) {
            Some(f) => f(handle, buffer, len, written, overlapped),
            None => BOOL(0),
        }
    }
}
