//! Console attribute state
//!
//! Tracks the ANSI view of the current rendition (colour indices, bold,
//! underline, reverse, concealed) and folds it into a console attribute word.

use crate::core::console::{Attribute, Coord};

/// ANSI colour index (0..=7, black red green yellow blue magenta cyan white)
/// to console foreground bits.
const FOREGROUND: [u16; 8] = [
    0x0000,                 // black
    0x0004,                 // red
    0x0002,                 // green
    0x0004 | 0x0002,        // yellow
    0x0001,                 // blue
    0x0001 | 0x0004,        // magenta
    0x0001 | 0x0002,        // cyan
    0x0004 | 0x0002 | 0x0001, // white
];

/// Console colour bits (BGR order) to ANSI colour index.
const CONSOLE_TO_ANSI: [u8; 8] = [0, 4, 2, 6, 1, 5, 3, 7];

fn foreground(index: u8) -> u16 {
    FOREGROUND[(index & 7) as usize]
}

fn background(index: u8) -> u16 {
    FOREGROUND[(index & 7) as usize] << 4
}

/// Rendition captured from the live console at attach time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OriginalAttributes {
    pub foreground: u8,
    pub background: u8,
    pub bold: bool,
    pub underline: bool,
}

impl OriginalAttributes {
    pub fn from_console(attr: Attribute) -> Self {
        Self {
            foreground: CONSOLE_TO_ANSI[attr.foreground_bits() as usize],
            background: CONSOLE_TO_ANSI[attr.background_bits() as usize],
            bold: attr.contains(Attribute::FOREGROUND_INTENSITY),
            underline: attr.contains(Attribute::BACKGROUND_INTENSITY),
        }
    }
}

/// Current ANSI rendition plus the saved cursor position.
#[derive(Debug, Clone)]
pub struct AttributeState {
    pub foreground: u8,
    pub background: u8,
    pub bold: bool,
    pub underline: bool,
    pub reverse: bool,
    pub concealed: bool,
    pub original: OriginalAttributes,
    pub saved_cursor: Coord,
}

impl Default for AttributeState {
    fn default() -> Self {
        Self::new(Attribute::DEFAULT)
    }
}

impl AttributeState {
    /// Start from the console's current attribute, which also becomes the
    /// target of `ESC[0m`.
    pub fn new(current: Attribute) -> Self {
        let original = OriginalAttributes::from_console(current);
        Self {
            foreground: original.foreground,
            background: original.background,
            bold: original.bold,
            underline: original.underline,
            reverse: false,
            concealed: false,
            original,
            saved_cursor: Coord::ORIGIN,
        }
    }

    /// Fold SGR parameters into the state. An empty list means `0`.
    pub fn apply_sgr(&mut self, params: &[u32]) {
        if params.is_empty() {
            self.reset(true);
            return;
        }

        // A reset only restores bold/underline when it stands alone.
        let exclusive = params.len() == 1;
        for &param in params {
            match param {
                0 => self.reset(exclusive),
                1 => self.bold = true,
                4 | 5 => self.underline = true,
                7 => self.reverse = true,
                8 => self.concealed = true,
                21 => self.bold = false,
                24 | 25 => self.underline = false,
                27 => self.reverse = false,
                28 => self.concealed = false,
                30..=37 => self.foreground = (param - 30) as u8,
                40..=47 => self.background = (param - 40) as u8,
                _ => {}
            }
        }
    }

    fn reset(&mut self, exclusive: bool) {
        self.foreground = self.original.foreground;
        self.background = self.original.background;
        self.bold = exclusive && self.original.bold;
        self.underline = exclusive && self.original.underline;
        self.reverse = false;
        self.concealed = false;
    }

    /// The console attribute word for the current rendition.
    pub fn attribute(&self) -> Attribute {
        let fg_i = Attribute::FOREGROUND_INTENSITY.bits();
        let bg_i = Attribute::BACKGROUND_INTENSITY.bits();

        let bits = if self.concealed {
            // Same colour both sides; intensity follows the visible channel.
            if self.reverse {
                let mut bits = foreground(self.foreground) | background(self.foreground);
                if self.bold {
                    bits |= fg_i | bg_i;
                }
                bits
            } else {
                let mut bits = foreground(self.background) | background(self.background);
                if self.underline {
                    bits |= fg_i | bg_i;
                }
                bits
            }
        } else if self.reverse {
            let mut bits = foreground(self.background) | background(self.foreground);
            if self.bold {
                bits |= bg_i;
            }
            if self.underline {
                bits |= fg_i;
            }
            bits
        } else {
            let mut bits = foreground(self.foreground) | background(self.background);
            if self.bold {
                bits |= fg_i;
            }
            if self.underline {
                bits |= bg_i;
            }
            bits
        };

        Attribute::from_bits_retain(bits)
    }

    /// The attribute captured at attach time.
    pub fn original_attribute(&self) -> Attribute {
        let o = &self.original;
        let mut bits = foreground(o.foreground) | background(o.background);
        if o.bold {
            bits |= Attribute::FOREGROUND_INTENSITY.bits();
        }
        if o.underline {
            bits |= Attribute::BACKGROUND_INTENSITY.bits();
        }
        Attribute::from_bits_retain(bits)
    }
}
