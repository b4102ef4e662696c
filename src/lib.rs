//! vtshim - ANSI escape sequences for Windows console programs
//!
//! vtshim is loaded into a console process and rewrites the import tables of
//! every module so that console output passes through an escape sequence
//! interpreter first. It follows the program into the modules it loads and
//! the console programs it starts.
//!
//! # Features
//!
//! - **SGR colours**: bold, underline, reverse, concealed, 8 colours
//! - **Cursor control**: absolute and relative moves, save/restore
//! - **Editing**: erase display/line, insert/delete lines and characters
//! - **Propagation**: `LoadLibrary*` and `CreateProcess*` keep interception alive
//! - **Status variable**: `ANSICON` reports `WxH (wxh)` on demand
//!
//! # Supported Sequences
//!
//! | Sequence | Action |
//! |----------|--------|
//! | `ESC[n;...m` | Set graphics rendition |
//! | `ESC[y;xH` / `ESC[y;xf` | Cursor position |
//! | `ESC[nA` `B` `C` `D` | Cursor up/down/forward/back |
//! | `ESC[nE` `F` `G` | Next/previous line, column |
//! | `ESC[nJ` / `ESC[nK` | Erase display / line |
//! | `ESC[nL` `M` `@` `P` | Insert/delete lines and characters |
//! | `ESC[s` / `ESC[u` | Save / restore cursor |
//!
//! # Configuration
//!
//! See [`config`]. Logging is off unless `VTSHIM_LOG` is set or a log file
//! is configured.

pub mod config;
pub mod core;
pub mod hook;
pub mod intercept;
pub mod logging;
pub mod propagate;
pub mod runtime;
