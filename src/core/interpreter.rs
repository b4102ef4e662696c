//! Escape sequence interpreter
//!
//! Combines the parser, the attribute state and a bounded output buffer, and
//! executes completed sequences against a [`Console`].
//!
//! ```text
//! Interpreter
//! ├── EscParser (automaton + pending arguments)
//! ├── AttributeState (rendition + saved cursor)
//! ├── OutputBuffer (coalesced literal text)
//! └── target device (last handle written to)
//! ```

use tracing::trace;

use super::console::{Attribute, Console};
use super::term::{AttributeState, Command, ConsoleOp, EscParser, Step};

/// Literal units held before a forced flush.
pub const BUFFER_CAPACITY: usize = 256;

/// Identity of the device (console handle) a write targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(pub usize);

/// Fixed-capacity accumulator of literal code units.
#[derive(Debug)]
pub struct OutputBuffer {
    units: [u16; BUFFER_CAPACITY],
    len: usize,
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self {
            units: [0; BUFFER_CAPACITY],
            len: 0,
        }
    }
}

impl OutputBuffer {
    /// Append a unit; returns true once the buffer is full.
    pub fn push(&mut self, unit: u16) -> bool {
        self.units[self.len] = unit;
        self.len += 1;
        self.len >= BUFFER_CAPACITY
    }

    pub fn flush<C: Console + ?Sized>(&mut self, console: &mut C) {
        if self.len == 0 {
            return;
        }
        console.write_units(&self.units[..self.len]);
        self.len = 0;
    }
}

/// Per-process interpretation context.
#[derive(Debug)]
pub struct Interpreter {
    parser: EscParser,
    attrs: AttributeState,
    buffer: OutputBuffer,
    target: Option<DeviceId>,
}

impl Interpreter {
    /// `current` is the console's attribute at attach time; `ESC[0m` returns to it.
    pub fn new(current: Attribute) -> Self {
        Self {
            parser: EscParser::new(),
            attrs: AttributeState::new(current),
            buffer: OutputBuffer::default(),
            target: None,
        }
    }

    pub fn attributes(&self) -> &AttributeState {
        &self.attrs
    }

    pub fn parser(&self) -> &EscParser {
        &self.parser
    }

    /// Interpret `units` written to `device`, returning the number of units
    /// consumed (always all of them).
    pub fn write<C: Console + ?Sized>(&mut self, console: &mut C, device: DeviceId, units: &[u16]) -> usize {
        if self.target != Some(device) {
            // A new device has no pending escape context.
            self.target = Some(device);
            self.parser.reset();
        }

        for &unit in units {
            match self.parser.advance(unit) {
                Step::Pending => {}
                Step::Print(unit) => {
                    if self.buffer.push(unit) {
                        self.buffer.flush(console);
                    }
                }
                Step::BeginSequence => self.buffer.flush(console),
                Step::Sequence(seq) => {
                    self.buffer.flush(console);
                    match Command::parse(&seq) {
                        Some(cmd) => self.execute(console, &cmd),
                        None => trace!(suffix = seq.suffix, args = ?seq.args(), "ignored sequence"),
                    }
                }
            }
        }
        self.buffer.flush(console);
        units.len()
    }

    fn execute<C: Console + ?Sized>(&mut self, console: &mut C, cmd: &Command) {
        let Some(info) = console.screen_info() else {
            return;
        };
        for op in cmd.plan(&info, &mut self.attrs) {
            match op {
                ConsoleOp::SetAttribute(attr) => console.set_attribute(attr),
                ConsoleOp::SetCursor(pos) => console.set_cursor(pos),
                ConsoleOp::Fill { start, len, attribute } => console.fill(start, len, attribute),
                ConsoleOp::Scroll { source, dest, fill } => console.scroll(source, dest, fill),
            }
        }
    }

    /// Put the console back to the attach-time attribute.
    pub fn restore<C: Console + ?Sized>(&mut self, console: &mut C) {
        self.buffer.flush(console);
        console.set_attribute(self.attrs.original_attribute());
    }
}

/// Render code units for a single-line log entry, escaping control characters.
pub fn escape_for_log(units: &[u16]) -> String {
    let mut out = String::with_capacity(units.len());
    for ch in char::decode_utf16(units.iter().copied()) {
        let ch = ch.unwrap_or(char::REPLACEMENT_CHARACTER);
        match ch {
            '\x1b' => out.push_str("\\e"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\x08' => out.push_str("\\b"),
            '\\' => out.push_str("\\\\"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\{:o}", c as u32)),
            c => out.push(c),
        }
    }
    out
}
