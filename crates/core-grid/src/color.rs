//! Color model: 24-bit RGB plus the tagged terminal color
//! (default / palette index / direct RGB).

use bytemuck::{Pod, Zeroable};

/// 8-bit-per-channel RGB triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Pod, Zeroable)]
#[repr(C)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// A terminal color as carried by SGR state: unset (use the default),
/// a 256-palette index, or a direct RGB value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Color {
    #[default]
    None,
    Palette(u8),
    Rgb(Rgb),
}

const TAG_NONE: u8 = 0;
const TAG_PALETTE: u8 = 1;
const TAG_RGB: u8 = 2;

/// Fixed 4-byte encoding of [`Color`] used inside packed styles.
///
/// Invariant: payload bytes a tag does not use are zero, so byte equality of
/// two packed colors is exactly structural equality of the colors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Pod, Zeroable)]
#[repr(C)]
pub struct PackedColor {
    tag: u8,
    r: u8,
    g: u8,
    b: u8,
}

impl PackedColor {
    pub const NONE: Self = Self {
        tag: TAG_NONE,
        r: 0,
        g: 0,
        b: 0,
    };

    pub fn pack(color: Color) -> Self {
        match color {
            Color::None => Self::NONE,
            Color::Palette(idx) => Self {
                tag: TAG_PALETTE,
                r: idx,
                g: 0,
                b: 0,
            },
            Color::Rgb(rgb) => Self {
                tag: TAG_RGB,
                r: rgb.r,
                g: rgb.g,
                b: rgb.b,
            },
        }
    }

    pub fn unpack(self) -> Color {
        match self.tag {
            TAG_PALETTE => Color::Palette(self.r),
            TAG_RGB => Color::Rgb(Rgb::new(self.r, self.g, self.b)),
            _ => Color::None,
        }
    }
}

impl From<Color> for PackedColor {
    fn from(c: Color) -> Self {
        Self::pack(c)
    }
}

impl From<PackedColor> for Color {
    fn from(p: PackedColor) -> Self {
        p.unpack()
    }
}
