//! Propagation engine
//!
//! Keeps interception alive in code the process maps or spawns later:
//!
//! - **loader**: hook modules mapped by `LoadLibrary*`
//! - **process**: start children suspended, inject, then resume
//! - **inject**: the injection capability and engine module paths
//! - **env**: the status environment variable

pub mod env;
pub mod inject;
pub mod loader;
pub mod process;

use thiserror::Error;

use crate::hook::Width;

pub use inject::{EnginePaths, Injector};
pub use process::{prepare_child, ChildProcess};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum InjectError {
    #[error("Not a console program (subsystem {0})")]
    NotConsole(u16),

    #[error("Unsupported machine type {0:#06x}")]
    UnsupportedMachine(u16),

    #[error("Could not locate the program image")]
    NoImage,

    #[error("No engine module for {0} programs")]
    NoEnginePath(Width),

    #[error("Cannot inject into a {0} program from a {} process", Width::native())]
    WidthMismatch(Width),

    #[error("Remote load failed: {0}")]
    Remote(String),
}

/// Lossy text of a NUL-terminated narrow string, for logging.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string.
#[cfg(windows)]
pub(crate) unsafe fn narrow_arg(ptr: *const u8) -> String {
    if ptr.is_null() {
        return String::new();
    }
    std::ffi::CStr::from_ptr(ptr.cast()).to_string_lossy().into_owned()
}

/// Lossy text of a NUL-terminated wide string, for logging.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated UTF-16 string.
#[cfg(windows)]
pub(crate) unsafe fn wide_arg(ptr: *const u16) -> String {
    if ptr.is_null() {
        return String::new();
    }
    let mut len = 0;
    while *ptr.add(len) != 0 {
        len += 1;
    }
    String::from_utf16_lossy(std::slice::from_raw_parts(ptr, len))
}
