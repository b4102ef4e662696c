//! Console character-grid model
//!
//! The interpreter never talks to a console handle directly. It plans
//! operations against the [`Console`] trait, which the Windows build implements
//! over a real screen buffer and the tests implement over an in-memory grid.

use bitflags::bitflags;

bitflags! {
    /// Console character attribute word (the `wAttributes` layout).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Attribute: u16 {
        const FOREGROUND_BLUE = 0x0001;
        const FOREGROUND_GREEN = 0x0002;
        const FOREGROUND_RED = 0x0004;
        const FOREGROUND_INTENSITY = 0x0008;
        const BACKGROUND_BLUE = 0x0010;
        const BACKGROUND_GREEN = 0x0020;
        const BACKGROUND_RED = 0x0040;
        const BACKGROUND_INTENSITY = 0x0080;
    }
}

impl Attribute {
    /// Light grey on black, the console default.
    pub const DEFAULT: Attribute = Attribute::from_bits_retain(0x0007);

    /// Foreground colour bits only (no intensity).
    pub fn foreground_bits(self) -> u16 {
        self.bits() & 0x0007
    }

    /// Background colour bits only, shifted down to 0..=7.
    pub fn background_bits(self) -> u16 {
        (self.bits() >> 4) & 0x0007
    }
}

impl Default for Attribute {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Zero-based cell coordinate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Coord {
    pub x: i16,
    pub y: i16,
}

impl Coord {
    pub const ORIGIN: Coord = Coord { x: 0, y: 0 };

    pub const fn new(x: i16, y: i16) -> Self {
        Self { x, y }
    }
}

/// Inclusive cell rectangle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Region {
    pub left: i16,
    pub top: i16,
    pub right: i16,
    pub bottom: i16,
}

impl Region {
    pub const fn new(left: i16, top: i16, right: i16, bottom: i16) -> Self {
        Self { left, top, right, bottom }
    }

    pub fn width(&self) -> i16 {
        self.right - self.left + 1
    }

    pub fn height(&self) -> i16 {
        self.bottom - self.top + 1
    }
}

/// Snapshot of a screen buffer's geometry and current attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenInfo {
    /// Full buffer size in cells.
    pub size: Coord,
    pub cursor: Coord,
    /// Visible window within the buffer.
    pub window: Region,
    /// Attribute used for newly written text.
    pub attribute: Attribute,
}

impl ScreenInfo {
    /// A buffer whose window covers the whole buffer, cursor at the origin.
    pub fn new(width: i16, height: i16) -> Self {
        Self {
            size: Coord::new(width, height),
            cursor: Coord::ORIGIN,
            window: Region::new(0, 0, width - 1, height - 1),
            attribute: Attribute::DEFAULT,
        }
    }
}

/// The console operations escape sequences translate into.
pub trait Console {
    /// Current geometry, or `None` if the device is not a screen buffer.
    fn screen_info(&mut self) -> Option<ScreenInfo>;

    /// Write literal code units at the cursor, advancing it.
    fn write_units(&mut self, units: &[u16]);

    fn set_attribute(&mut self, attribute: Attribute);

    fn set_cursor(&mut self, pos: Coord);

    /// Fill `len` cells starting at `start` (wrapping rows) with spaces in `attribute`.
    fn fill(&mut self, start: Coord, len: u32, attribute: Attribute);

    /// Move `source` so its top-left lands on `dest`; uncovered cells become
    /// spaces in `fill`. Content moved outside the buffer is dropped.
    fn scroll(&mut self, source: Region, dest: Coord, fill: Attribute);
}
