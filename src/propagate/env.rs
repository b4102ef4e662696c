//! Status environment variable
//!
//! Its presence tells other programs that escape sequences are being
//! interpreted; its value is the console geometry as `WxH (wxh)`, buffer size
//! first, then the visible window.

use crate::core::console::ScreenInfo;

pub const DEFAULT_STATUS_VARIABLE: &str = "ANSICON";

pub fn status_value(info: &ScreenInfo) -> String {
    format!(
        "{}x{} ({}x{})",
        info.size.x,
        info.size.y,
        info.window.width(),
        info.window.height()
    )
}

/// Case-insensitive match of a narrow variable name.
pub fn is_status_name(name: &[u8], status: &str) -> bool {
    name.eq_ignore_ascii_case(status.as_bytes())
}

/// Case-insensitive match of a wide variable name.
pub fn is_status_name_wide(name: &[u16], status: &str) -> bool {
    match String::from_utf16(name) {
        Ok(name) => name.to_lowercase() == status.to_lowercase(),
        Err(_) => false,
    }
}

#[cfg(windows)]
pub use self::windows_impl::{get_environment_variable_a_hook, get_environment_variable_w_hook, publish_status};

#[cfg(windows)]
mod windows_impl {
    use tracing::{trace, warn};
    use windows::core::HSTRING;
    use windows::Win32::System::Environment::SetEnvironmentVariableW;

    use super::{is_status_name, is_status_name_wide, status_value};
    use crate::core::console::ScreenInfo;
    use crate::core::win32::active_screen_info;
    use crate::hook::HookId;
    use crate::runtime;

    type GetEnvironmentVariableAFn = unsafe extern "system" fn(*const u8, *mut u8, u32) -> u32;
    type GetEnvironmentVariableWFn = unsafe extern "system" fn(*const u16, *mut u16, u32) -> u32;

    /// Set `name` from `info`, or from the active screen buffer when `None`.
    pub fn publish_status(name: &str, info: Option<ScreenInfo>) {
        let Some(info) = info.or_else(active_screen_info) else {
            return;
        };
        let value = status_value(&info);
        trace!("{} = {}", name, value);
        if let Err(e) = unsafe { SetEnvironmentVariableW(&HSTRING::from(name), &HSTRING::from(value.as_str())) } {
            warn!("Failed to set {}: {}", name, e);
        }
    }

    unsafe fn narrow_name<'a>(ptr: *const u8) -> Option<&'a [u8]> {
        (!ptr.is_null()).then(|| std::ffi::CStr::from_ptr(ptr.cast()).to_bytes())
    }

    unsafe fn wide_name<'a>(ptr: *const u16) -> Option<&'a [u16]> {
        if ptr.is_null() {
            return None;
        }
        let mut len = 0;
        while *ptr.add(len) != 0 {
            len += 1;
        }
        Some(std::slice::from_raw_parts(ptr, len))
    }

    pub unsafe extern "system" fn get_environment_variable_a_hook(name: *const u8, buffer: *mut u8, size: u32) -> u32 {
        if let (Some(engine), Some(query)) = (runtime::engine(), narrow_name(name)) {
            if is_status_name(query, &engine.config.status_variable) {
                publish_status(&engine.config.status_variable, None);
            }
        }
        match runtime::original::<GetEnvironmentVariableAFn>(HookId::GetEnvironmentVariableA) {
            Some(f) => f(name, buffer, size),
            None => 0,
        }
    }

    pub unsafe extern "system" fn get_environment_variable_w_hook(name: *const u16, buffer: *mut u16, size: u32) -> u32 {
        if let (Some(engine), Some(query)) = (runtime::engine(), wide_name(name)) {
            if is_status_name_wide(query, &engine.config.status_variable) {
                publish_status(&engine.config.status_variable, None);
            }
        }
        match runtime::original::<GetEnvironmentVariableWFn>(HookId::GetEnvironmentVariableW) {
            Some(f) => f(name, buffer, size),
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::console::Region;

    #[test]
    fn test_status_value_full_window() {
        assert_eq!(status_value(&ScreenInfo::new(80, 25)), "80x25 (80x25)");
    }

    #[test]
    fn test_status_value_scrolled_window() {
        let mut info = ScreenInfo::new(120, 3000);
        info.window = Region::new(0, 2950, 119, 2999);
        assert_eq!(status_value(&info), "120x3000 (120x50)");
    }

    #[test]
    fn test_name_matching() {
        assert!(is_status_name(b"ANSICON", DEFAULT_STATUS_VARIABLE));
        assert!(is_status_name(b"ansicon", DEFAULT_STATUS_VARIABLE));
        assert!(!is_status_name(b"ANSICON_DEF", DEFAULT_STATUS_VARIABLE));
        assert!(!is_status_name(b"", DEFAULT_STATUS_VARIABLE));

        let wide: Vec<u16> = "AnsiCon".encode_utf16().collect();
        assert!(is_status_name_wide(&wide, DEFAULT_STATUS_VARIABLE));
        let wide: Vec<u16> = "PATH".encode_utf16().collect();
        assert!(!is_status_name_wide(&wide, DEFAULT_STATUS_VARIABLE));
        assert!(!is_status_name_wide(&[0xD800], DEFAULT_STATUS_VARIABLE));
    }
}
