//! Escape sequence parser
//!
//! A four-state automaton over UTF-16 code units. Literal units are handed
//! back to the caller one at a time; a complete `ESC [ args suffix` sequence
//! is returned as a [`Sequence`] for interpretation.

/// Escape introducer.
pub const ESC: u16 = 0x1B;

/// Maximum number of arguments kept for one sequence.
pub const MAX_ARGS: usize = 16;

/// What the caller should do after feeding one code unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Nothing to emit yet (inside a sequence, or a unit was dropped).
    Pending,
    /// A literal code unit to print.
    Print(u16),
    /// A control sequence started; pending literal text must be flushed.
    BeginSequence,
    /// A control sequence is complete.
    Sequence(Sequence),
}

/// A parsed `ESC [` sequence: up to [`MAX_ARGS`] numeric arguments and the
/// terminating command unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sequence {
    args: [u32; MAX_ARGS],
    argc: usize,
    pub suffix: u16,
}

impl Sequence {
    pub fn new(args: &[u32], suffix: u16) -> Self {
        let mut seq = Self {
            args: [0; MAX_ARGS],
            argc: args.len().min(MAX_ARGS),
            suffix,
        };
        seq.args[..seq.argc].copy_from_slice(&args[..seq.argc]);
        seq
    }

    pub fn args(&self) -> &[u32] {
        &self.args[..self.argc]
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ParserState {
    #[default]
    Literal,
    SawEscape,
    CollectingPrefix,
    CollectingArgs,
}

/// Parser state machine
#[derive(Debug, Clone)]
pub struct EscParser {
    state: ParserState,
    args: [u32; MAX_ARGS],
    /// Index of the argument currently being collected.
    current: usize,
}

impl Default for EscParser {
    fn default() -> Self {
        Self::new()
    }
}

impl EscParser {
    pub fn new() -> Self {
        Self {
            state: ParserState::Literal,
            args: [0; MAX_ARGS],
            current: 0,
        }
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    /// Drop any partial sequence.
    pub fn reset(&mut self) {
        self.state = ParserState::Literal;
        self.current = 0;
    }

    /// Feed a single code unit to the parser
    pub fn advance(&mut self, unit: u16) -> Step {
        match self.state {
            ParserState::Literal => self.literal(unit),
            ParserState::SawEscape => self.saw_escape(unit),
            ParserState::CollectingPrefix => self.collecting_prefix(unit),
            ParserState::CollectingArgs => self.collecting_args(unit),
        }
    }

    fn literal(&mut self, unit: u16) -> Step {
        if unit == ESC {
            self.state = ParserState::SawEscape;
            Step::Pending
        } else {
            Step::Print(unit)
        }
    }

    fn saw_escape(&mut self, unit: u16) -> Step {
        match unit {
            // ESC ESC ... ESC == ESC
            ESC => Step::Pending,
            u if u == b'[' as u16 => {
                self.state = ParserState::CollectingPrefix;
                Step::BeginSequence
            }
            _ => {
                // Malformed; the unit is swallowed with the escape.
                self.state = ParserState::Literal;
                Step::Pending
            }
        }
    }

    fn collecting_prefix(&mut self, unit: u16) -> Step {
        if let Some(digit) = decimal(unit) {
            self.current = 0;
            self.args[0] = digit;
            self.state = ParserState::CollectingArgs;
            Step::Pending
        } else if unit == b';' as u16 {
            self.current = 1;
            self.args[0] = 0;
            self.args[1] = 0;
            self.state = ParserState::CollectingArgs;
            Step::Pending
        } else {
            self.state = ParserState::Literal;
            Step::Sequence(Sequence::new(&[], unit))
        }
    }

    fn collecting_args(&mut self, unit: u16) -> Step {
        if let Some(digit) = decimal(unit) {
            let arg = &mut self.args[self.current];
            *arg = arg.saturating_mul(10).saturating_add(digit);
            Step::Pending
        } else if unit == b';' as u16 {
            // Past the last slot, later arguments overwrite it.
            if self.current < MAX_ARGS - 1 {
                self.current += 1;
            }
            self.args[self.current] = 0;
            Step::Pending
        } else {
            self.state = ParserState::Literal;
            let argc = self.current + 1;
            Step::Sequence(Sequence::new(&self.args[..argc], unit))
        }
    }
}

fn decimal(unit: u16) -> Option<u32> {
    if (b'0' as u16..=b'9' as u16).contains(&unit) {
        Some(u32::from(unit - b'0' as u16))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(parser: &mut EscParser, text: &str) -> Vec<Step> {
        text.encode_utf16()
            .map(|u| parser.advance(u))
            .filter(|s| *s != Step::Pending)
            .collect()
    }

    fn sequences(text: &str) -> Vec<Sequence> {
        let mut parser = EscParser::new();
        feed(&mut parser, text)
            .into_iter()
            .filter_map(|s| match s {
                Step::Sequence(seq) => Some(seq),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_literal_passthrough() {
        let mut parser = EscParser::new();
        let text = "plain text, no escapes \u{263A}\r\n";
        let printed: Vec<u16> = feed(&mut parser, text)
            .into_iter()
            .map(|s| match s {
                Step::Print(u) => u,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(printed, text.encode_utf16().collect::<Vec<_>>());
        assert_eq!(parser.state(), ParserState::Literal);
    }

    #[test]
    fn test_sgr_arguments() {
        let seqs = sequences("\x1b[1;31;42m");
        assert_eq!(seqs.len(), 1);
        assert_eq!(seqs[0].args(), &[1, 31, 42]);
        assert_eq!(seqs[0].suffix, b'm' as u16);
    }

    #[test]
    fn test_no_arguments() {
        let seqs = sequences("\x1b[s");
        assert_eq!(seqs[0].args(), &[] as &[u32]);
        assert_eq!(seqs[0].suffix, b's' as u16);
    }

    #[test]
    fn test_leading_separator() {
        let seqs = sequences("\x1b[;5H");
        assert_eq!(seqs[0].args(), &[0, 5]);
    }

    #[test]
    fn test_trailing_separator_adds_zero() {
        let seqs = sequences("\x1b[7;H");
        assert_eq!(seqs[0].args(), &[7, 0]);
    }

    #[test]
    fn test_repeated_escape_collapses() {
        let seqs = sequences("\x1b\x1b\x1b[2J");
        assert_eq!(seqs.len(), 1);
        assert_eq!(seqs[0].args(), &[2]);
    }

    #[test]
    fn test_malformed_escape_drops_unit() {
        let mut parser = EscParser::new();
        let steps = feed(&mut parser, "a\x1bXb");
        assert_eq!(steps, vec![Step::Print(b'a' as u16), Step::Print(b'b' as u16)]);
    }

    #[test]
    fn test_begin_sequence_reported() {
        let mut parser = EscParser::new();
        let steps = feed(&mut parser, "x\x1b[");
        assert_eq!(steps, vec![Step::Print(b'x' as u16), Step::BeginSequence]);
        assert_eq!(parser.state(), ParserState::CollectingPrefix);
    }

    #[test]
    fn test_argument_overflow_overwrites_last_slot() {
        let args: Vec<String> = (1..=20).map(|n| n.to_string()).collect();
        let text = format!("\x1b[{}m", args.join(";"));
        let seqs = sequences(&text);
        let got = seqs[0].args();
        assert_eq!(got.len(), MAX_ARGS);
        assert_eq!(&got[..15], &(1..=15).collect::<Vec<u32>>()[..]);
        assert_eq!(got[15], 20);
    }

    #[test]
    fn test_huge_argument_saturates() {
        let seqs = sequences("\x1b[99999999999999999999A");
        assert_eq!(seqs[0].args(), &[u32::MAX]);
    }

    #[test]
    fn test_reset_discards_partial_sequence() {
        let mut parser = EscParser::new();
        feed(&mut parser, "\x1b[31");
        assert_eq!(parser.state(), ParserState::CollectingArgs);
        parser.reset();
        let steps = feed(&mut parser, "m");
        assert_eq!(steps, vec![Step::Print(b'm' as u16)]);
    }

    #[test]
    fn test_unknown_suffix_still_completes() {
        let mut parser = EscParser::new();
        let steps = feed(&mut parser, "\x1b[5zq");
        assert!(matches!(steps[1], Step::Sequence(s) if s.suffix == b'z' as u16));
        assert_eq!(steps[2], Step::Print(b'q' as u16));
    }
}
