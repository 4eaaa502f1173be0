//! Packed grid cell: 8 bytes carrying content, style id, and hyperlink id.
//!
//! Layout of the 32-bit `bits` word:
//!
//! ```text
//! bit 31..30  unused
//! bit 29      protected (DECSCA / SPA)
//! bit 28      has grapheme extension (zero-width codepoints attached)
//! bit 27      wide spacer (tail cell of a 2-column glyph)
//! bit 26      wide (head cell of a 2-column glyph)
//! bit 25..24  content tag
//! bit 23..0   payload: codepoint (21 bits), palette index (8), or RGB (24)
//! ```

use crate::color::{Color, Rgb};
use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};

const PAYLOAD_MASK: u32 = 0x00FF_FFFF;
const TAG_SHIFT: u32 = 24;
const TAG_MASK: u32 = 0b11 << TAG_SHIFT;
const FLAGS_SHIFT: u32 = 26;
const FLAGS_MASK: u32 = 0b1111 << FLAGS_SHIFT;

/// What a cell's payload means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ContentTag {
    /// Nothing printed here; the cell renders as the default background.
    Empty = 0,
    /// A printed codepoint (the common case).
    Codepoint = 1,
    /// Erased with a palette background color.
    BgPalette = 2,
    /// Erased with a direct RGB background color.
    BgRgb = 3,
}

bitflags! {
    /// Per-cell boolean properties, packed into the content word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CellFlags: u8 {
        const WIDE        = 1 << 0;
        const WIDE_SPACER = 1 << 1;
        const GRAPHEME    = 1 << 2;
        const PROTECTED   = 1 << 3;
    }
}

/// One grid position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
#[repr(C)]
pub struct Cell {
    bits: u32,
    /// Interned style id within the owning page; 0 is the default style.
    pub style_id: u16,
    /// Interned hyperlink id within the owning page; 0 means none.
    pub hyperlink_id: u16,
}

impl Cell {
    pub const EMPTY: Cell = Cell {
        bits: 0,
        style_id: 0,
        hyperlink_id: 0,
    };

    pub fn tag(&self) -> ContentTag {
        match (self.bits & TAG_MASK) >> TAG_SHIFT {
            1 => ContentTag::Codepoint,
            2 => ContentTag::BgPalette,
            3 => ContentTag::BgRgb,
            _ => ContentTag::Empty,
        }
    }

    /// The printed codepoint, if this is a codepoint cell.
    pub fn codepoint(&self) -> Option<char> {
        if self.tag() != ContentTag::Codepoint {
            return None;
        }
        char::from_u32(self.bits & PAYLOAD_MASK)
    }

    /// The erase background color, for `BgPalette`/`BgRgb` cells.
    pub fn bg_content(&self) -> Option<Color> {
        match self.tag() {
            ContentTag::BgPalette => Some(Color::Palette((self.bits & 0xFF) as u8)),
            ContentTag::BgRgb => {
                let p = self.bits & PAYLOAD_MASK;
                Some(Color::Rgb(Rgb::new(
                    ((p >> 16) & 0xFF) as u8,
                    ((p >> 8) & 0xFF) as u8,
                    (p & 0xFF) as u8,
                )))
            }
            _ => None,
        }
    }

    pub fn set_codepoint(&mut self, cp: char) {
        self.bits = (self.bits & FLAGS_MASK)
            | ((ContentTag::Codepoint as u32) << TAG_SHIFT)
            | (cp as u32 & PAYLOAD_MASK);
    }

    pub fn set_empty(&mut self) {
        self.bits &= FLAGS_MASK;
    }

    pub fn set_bg_content(&mut self, color: Color) {
        match color {
            Color::Palette(idx) => {
                self.bits = (self.bits & FLAGS_MASK)
                    | ((ContentTag::BgPalette as u32) << TAG_SHIFT)
                    | idx as u32;
            }
            Color::Rgb(rgb) => {
                self.bits = (self.bits & FLAGS_MASK)
                    | ((ContentTag::BgRgb as u32) << TAG_SHIFT)
                    | ((rgb.r as u32) << 16)
                    | ((rgb.g as u32) << 8)
                    | rgb.b as u32;
            }
            Color::None => self.set_empty(),
        }
    }

    pub fn flags(&self) -> CellFlags {
        CellFlags::from_bits_truncate(((self.bits & FLAGS_MASK) >> FLAGS_SHIFT) as u8)
    }

    pub fn set_flags(&mut self, flags: CellFlags) {
        self.bits = (self.bits & !FLAGS_MASK) | ((flags.bits() as u32) << FLAGS_SHIFT);
    }

    pub fn set_flag(&mut self, flag: CellFlags, on: bool) {
        let mut f = self.flags();
        f.set(flag, on);
        self.set_flags(f);
    }

    pub fn has_flag(&self, flag: CellFlags) -> bool {
        self.flags().contains(flag)
    }

    /// The raw packed content word (tag, payload, and flags; not the ids).
    /// For snapshot/restore of a cell's visual content.
    pub fn content_bits(&self) -> u32 {
        self.bits
    }

    pub fn set_content_bits(&mut self, bits: u32) {
        self.bits = bits;
    }

    /// True when nothing is printed here (tag `Empty` or a bg-erase tag).
    pub fn is_blank(&self) -> bool {
        self.tag() != ContentTag::Codepoint
    }

    pub fn has_hyperlink(&self) -> bool {
        self.hyperlink_id != 0
    }
}
