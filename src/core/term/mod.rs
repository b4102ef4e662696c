//! Escape sequence handling: parsing, command planning and rendition state.

pub mod command;
pub mod parser;
pub mod state;

pub use command::{Command, ConsoleOp, EraseMode};
pub use parser::{EscParser, ParserState, Sequence, Step};
pub use state::AttributeState;
