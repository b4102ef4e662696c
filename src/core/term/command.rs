//! Control sequence commands
//!
//! [`Command::parse`] validates a [`Sequence`]'s argument count for its
//! suffix; [`Command::plan`] turns a command into the console operations it
//! needs, given the current screen geometry. Sequences with the wrong number of
//! arguments, out-of-range modes or unknown suffixes produce nothing.

use super::parser::Sequence;
use super::state::AttributeState;
use crate::core::console::{Attribute, Coord, Region, ScreenInfo};

/// Which part of the display or line to erase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EraseMode {
    /// Cursor to end.
    ToEnd,
    /// Start to cursor.
    ToCursor,
    /// Everything.
    All,
}

impl EraseMode {
    fn from_arg(arg: u32) -> Option<Self> {
        match arg {
            0 => Some(Self::ToEnd),
            1 => Some(Self::ToCursor),
            2 => Some(Self::All),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `m`
    SelectGraphicRendition(Vec<u32>),
    /// `J`
    EraseDisplay(EraseMode),
    /// `K`
    EraseLine(EraseMode),
    /// `L`
    InsertLines(u32),
    /// `M`
    DeleteLines(u32),
    /// `@`
    InsertChars(u32),
    /// `P`
    DeleteChars(u32),
    /// `A`
    CursorUp(u32),
    /// `B`
    CursorDown(u32),
    /// `C`
    CursorForward(u32),
    /// `D`
    CursorBack(u32),
    /// `E`
    CursorNextLine(u32),
    /// `F`
    CursorPrevLine(u32),
    /// `G`, 1-based
    CursorColumn(u32),
    /// `H` / `f`, 1-based
    CursorPosition { row: u32, col: u32 },
    /// `s`
    SaveCursor,
    /// `u`
    RestoreCursor,
}

/// A single console call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleOp {
    SetAttribute(Attribute),
    SetCursor(Coord),
    Fill { start: Coord, len: u32, attribute: Attribute },
    Scroll { source: Region, dest: Coord, fill: Attribute },
}

/// One numeric argument, defaulting when absent.
fn single(args: &[u32], default: u32) -> Option<u32> {
    match args {
        [] => Some(default),
        [n] => Some(*n),
        _ => None,
    }
}

fn erase_mode(args: &[u32]) -> Option<EraseMode> {
    single(args, 0).and_then(EraseMode::from_arg)
}

impl Command {
    pub fn parse(seq: &Sequence) -> Option<Self> {
        let args = seq.args();
        let suffix = char::from_u32(u32::from(seq.suffix))?;
        let cmd = match suffix {
            'm' => Command::SelectGraphicRendition(args.to_vec()),
            'J' => Command::EraseDisplay(erase_mode(args)?),
            'K' => Command::EraseLine(erase_mode(args)?),
            'L' => Command::InsertLines(single(args, 1)?),
            'M' => Command::DeleteLines(single(args, 1)?),
            '@' => Command::InsertChars(single(args, 1)?),
            'P' => Command::DeleteChars(single(args, 1)?),
            'A' => Command::CursorUp(single(args, 1)?),
            'B' => Command::CursorDown(single(args, 1)?),
            'C' => Command::CursorForward(single(args, 1)?),
            'D' => Command::CursorBack(single(args, 1)?),
            'E' => Command::CursorNextLine(single(args, 1)?),
            'F' => Command::CursorPrevLine(single(args, 1)?),
            'G' => Command::CursorColumn(single(args, 1)?),
            'H' | 'f' => match args {
                [] => Command::CursorPosition { row: 1, col: 1 },
                [row] => Command::CursorPosition { row: *row, col: 1 },
                [row, col] => Command::CursorPosition { row: *row, col: *col },
                _ => return None,
            },
            's' if args.is_empty() => Command::SaveCursor,
            'u' if args.is_empty() => Command::RestoreCursor,
            _ => return None,
        };
        Some(cmd)
    }

    /// Console calls for this command. SGR and save/restore also update `attrs`.
    pub fn plan(&self, info: &ScreenInfo, attrs: &mut AttributeState) -> Vec<ConsoleOp> {
        let width = i64::from(info.size.x);
        let height = i64::from(info.size.y);
        let x = i64::from(info.cursor.x);
        let y = i64::from(info.cursor.y);
        let current = info.attribute;
        if width <= 0 || height <= 0 {
            return Vec::new();
        }

        let at = |x: i64, y: i64| Coord::new(x as i16, y as i16);
        let cursor = |x: i64, y: i64| {
            ConsoleOp::SetCursor(at(x.clamp(0, width - 1), y.clamp(0, height - 1)))
        };
        let fill = |start: Coord, len: i64| ConsoleOp::Fill {
            start,
            len: len.max(0) as u32,
            attribute: current,
        };
        let scroll = |source: Region, dest: Coord| ConsoleOp::Scroll { source, dest, fill: current };

        match *self {
            Command::SelectGraphicRendition(ref params) => {
                attrs.apply_sgr(params);
                vec![ConsoleOp::SetAttribute(attrs.attribute())]
            }

            Command::EraseDisplay(mode) => match mode {
                EraseMode::ToEnd => vec![fill(info.cursor, (height - y) * width - x)],
                EraseMode::ToCursor => vec![fill(Coord::ORIGIN, y * width + x + 1)],
                EraseMode::All => vec![
                    fill(Coord::ORIGIN, width * height),
                    ConsoleOp::SetCursor(Coord::ORIGIN),
                ],
            },
            Command::EraseLine(mode) => match mode {
                EraseMode::ToEnd => vec![fill(info.cursor, width - x)],
                EraseMode::ToCursor => vec![fill(at(0, y), x + 1)],
                EraseMode::All => vec![fill(at(0, y), width)],
            },

            // A shift covering the whole remainder just blanks it.
            Command::InsertLines(n) => {
                let n = i64::from(n).min(height - y);
                if n == height - y {
                    return vec![fill(at(0, y), n * width)];
                }
                let source = Region::new(0, y as i16, (width - 1) as i16, (height - 1 - n) as i16);
                vec![scroll(source, at(0, y + n))]
            }
            Command::DeleteLines(n) => {
                let n = i64::from(n).min(height - y);
                if n == height - y {
                    return vec![fill(at(0, y), n * width)];
                }
                let source = Region::new(0, (y + n) as i16, (width - 1) as i16, (height - 1) as i16);
                vec![scroll(source, at(0, y))]
            }
            Command::InsertChars(n) => {
                let n = i64::from(n).min(width - x);
                if n == width - x {
                    return vec![fill(info.cursor, n)];
                }
                let source = Region::new(x as i16, y as i16, (width - 1 - n) as i16, y as i16);
                vec![scroll(source, at(x + n, y))]
            }
            Command::DeleteChars(n) => {
                let n = i64::from(n).min(width - x);
                if n == width - x {
                    return vec![fill(info.cursor, n)];
                }
                let source = Region::new((x + n) as i16, y as i16, (width - 1) as i16, y as i16);
                vec![scroll(source, info.cursor)]
            }

            Command::CursorUp(n) => vec![cursor(x, y - i64::from(n))],
            Command::CursorDown(n) => vec![cursor(x, y + i64::from(n))],
            Command::CursorForward(n) => vec![cursor(x + i64::from(n), y)],
            Command::CursorBack(n) => vec![cursor(x - i64::from(n), y)],
            Command::CursorNextLine(n) => vec![cursor(0, y + i64::from(n))],
            Command::CursorPrevLine(n) => vec![cursor(0, y - i64::from(n))],
            Command::CursorColumn(col) => vec![cursor(i64::from(col) - 1, y)],
            Command::CursorPosition { row, col } => {
                vec![cursor(i64::from(col) - 1, i64::from(row) - 1)]
            }

            Command::SaveCursor => {
                attrs.saved_cursor = info.cursor;
                Vec::new()
            }
            Command::RestoreCursor => vec![ConsoleOp::SetCursor(attrs.saved_cursor)],
        }
    }
}
