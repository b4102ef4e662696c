//! Core console emulation components.
//!
//! - **console**: the character-grid operations escape sequences map onto
//! - **term**: escape sequence parser, command planning and attribute state
//! - **interpreter**: per-process context feeding output through the parser
//! - **win32**: [`console::Console`] over a real console screen buffer
//!
//! # Architecture
//!
//! ```text
//! Interpreter
//! ├── EscParser (ANSI escape sequences)
//! ├── AttributeState (colours + saved cursor)
//! └── OutputBuffer ──► Console (Win32Console / test grid)
//! ```

pub mod console;
pub mod interpreter;
pub mod term;
#[cfg(windows)]
pub mod win32;
