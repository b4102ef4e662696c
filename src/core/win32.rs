//! Console screen buffer backend for Windows
//!
//! Implements [`Console`] over a console output handle. Calls made from here
//! go through this module's own import table, which is never patched, so they
//! reach the real console functions.

use windows::core::w;
use windows::Win32::Foundation::{CloseHandle, GENERIC_READ, GENERIC_WRITE, HANDLE};
use windows::Win32::Storage::FileSystem::{
    CreateFileW, FILE_FLAGS_AND_ATTRIBUTES, FILE_SHARE_READ, FILE_SHARE_WRITE, OPEN_EXISTING,
};
use windows::Win32::System::Console::{
    FillConsoleOutputAttribute, FillConsoleOutputCharacterW, GetConsoleMode,
    GetConsoleScreenBufferInfo, ScrollConsoleScreenBufferW, SetConsoleCursorPosition,
    SetConsoleTextAttribute, WriteConsoleW, CHAR_INFO, CHAR_INFO_0,
    CONSOLE_CHARACTER_ATTRIBUTES, CONSOLE_MODE, CONSOLE_SCREEN_BUFFER_INFO, COORD,
    SMALL_RECT,
};

use super::console::{Attribute, Console, Coord, Region, ScreenInfo};

/// A console output handle.
#[derive(Debug, Clone, Copy)]
pub struct Win32Console {
    handle: HANDLE,
}

impl Win32Console {
    pub fn new(handle: HANDLE) -> Self {
        Self { handle }
    }
}

/// Mode flags of a console handle; `None` when `handle` is not a console.
pub fn console_mode(handle: HANDLE) -> Option<u32> {
    let mut mode = CONSOLE_MODE(0);
    unsafe { GetConsoleMode(handle, &mut mode).ok()? };
    Some(mode.0)
}

/// Query a screen buffer without going through a [`Win32Console`].
pub fn query_screen_info(handle: HANDLE) -> Option<ScreenInfo> {
    let mut info = CONSOLE_SCREEN_BUFFER_INFO::default();
    unsafe { GetConsoleScreenBufferInfo(handle, &mut info).ok()? };
    Some(ScreenInfo {
        size: from_coord(info.dwSize),
        cursor: from_coord(info.dwCursorPosition),
        window: Region::new(
            info.srWindow.Left,
            info.srWindow.Top,
            info.srWindow.Right,
            info.srWindow.Bottom,
        ),
        attribute: Attribute::from_bits_retain(info.wAttributes.0),
    })
}

/// Run `f` with a handle to the process's active screen buffer (`CONOUT$`),
/// which may differ from a redirected standard output.
pub fn with_active_output<R>(f: impl FnOnce(HANDLE) -> R) -> Option<R> {
    unsafe {
        let handle = CreateFileW(
            w!("CONOUT$"),
            (GENERIC_READ | GENERIC_WRITE).0,
            FILE_SHARE_READ | FILE_SHARE_WRITE,
            None,
            OPEN_EXISTING,
            FILE_FLAGS_AND_ATTRIBUTES(0),
            HANDLE::default(),
        )
        .ok()?;
        let result = f(handle);
        let _ = CloseHandle(handle);
        Some(result)
    }
}

/// Geometry of the active screen buffer, if the process has a console.
pub fn active_screen_info() -> Option<ScreenInfo> {
    with_active_output(query_screen_info).flatten()
}

fn from_coord(c: COORD) -> Coord {
    Coord::new(c.X, c.Y)
}

fn to_coord(c: Coord) -> COORD {
    COORD { X: c.x, Y: c.y }
}

impl Console for Win32Console {
    fn screen_info(&mut self) -> Option<ScreenInfo> {
        query_screen_info(self.handle)
    }

    fn write_units(&mut self, units: &[u16]) {
        let mut written = 0u32;
        unsafe {
            let _ = WriteConsoleW(self.handle, units, Some(&mut written), None);
        }
    }

    fn set_attribute(&mut self, attribute: Attribute) {
        unsafe {
            let _ = SetConsoleTextAttribute(self.handle, CONSOLE_CHARACTER_ATTRIBUTES(attribute.bits()));
        }
    }

    fn set_cursor(&mut self, pos: Coord) {
        unsafe {
            let _ = SetConsoleCursorPosition(self.handle, to_coord(pos));
        }
    }

    fn fill(&mut self, start: Coord, len: u32, attribute: Attribute) {
        let mut written = 0u32;
        unsafe {
            let _ = FillConsoleOutputCharacterW(self.handle, b' ' as u16, len, to_coord(start), &mut written);
            let _ = FillConsoleOutputAttribute(self.handle, attribute.bits(), len, to_coord(start), &mut written);
        }
    }

    fn scroll(&mut self, source: Region, dest: Coord, fill: Attribute) {
        let rect = SMALL_RECT {
            Left: source.left,
            Top: source.top,
            Right: source.right,
            Bottom: source.bottom,
        };
        let blank = CHAR_INFO {
            Char: CHAR_INFO_0 { UnicodeChar: b' ' as u16 },
            Attributes: fill.bits(),
        };
        unsafe {
            let _ = ScrollConsoleScreenBufferW(self.handle, &rect, None, to_coord(dest), &blank);
        }
    }
}
