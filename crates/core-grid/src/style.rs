//! Packed SGR style: colors, underline shape, and attribute flags in a
//! fixed 16-byte representation.
//!
//! Styles are interned per page, so the representation doubles as the
//! canonical hash/equality form: every constructor and setter keeps unused
//! bytes zeroed, which makes byte-wise equality identical to structural
//! equality and gives [`Style::hash64`] a stable input.

use crate::color::{Color, PackedColor};
use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};

bitflags! {
    /// Boolean SGR attributes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StyleFlags: u16 {
        const BOLD          = 1 << 0;
        const FAINT         = 1 << 1;
        const ITALIC        = 1 << 2;
        const BLINK         = 1 << 3;
        const INVERSE       = 1 << 4;
        const INVISIBLE     = 1 << 5;
        const STRIKETHROUGH = 1 << 6;
        const OVERLINE      = 1 << 7;
    }
}

/// Underline shape (SGR 4 and its colon sub-parameters).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Underline {
    #[default]
    None = 0,
    Single = 1,
    Double = 2,
    Curly = 3,
    Dotted = 4,
    Dashed = 5,
}

impl Underline {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => Self::None,
            1 => Self::Single,
            2 => Self::Double,
            3 => Self::Curly,
            4 => Self::Dotted,
            5 => Self::Dashed,
            _ => return None,
        })
    }
}

/// One interned style value. 16 bytes, plain old data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Pod, Zeroable)]
#[repr(C)]
pub struct Style {
    fg: PackedColor,
    bg: PackedColor,
    underline_color: PackedColor,
    flags: u16,
    underline: u8,
    _pad: u8,
}

impl Style {
    /// The all-defaults style. Cells carrying it use style id 0 and are not
    /// ref-counted.
    pub const DEFAULT: Style = Style {
        fg: PackedColor::NONE,
        bg: PackedColor::NONE,
        underline_color: PackedColor::NONE,
        flags: 0,
        underline: 0,
        _pad: 0,
    };

    pub fn is_default(&self) -> bool {
        *self == Self::DEFAULT
    }

    pub fn fg(&self) -> Color {
        self.fg.unpack()
    }

    pub fn bg(&self) -> Color {
        self.bg.unpack()
    }

    pub fn underline_color(&self) -> Color {
        self.underline_color.unpack()
    }

    pub fn set_fg(&mut self, c: Color) {
        self.fg = PackedColor::pack(c);
    }

    pub fn set_bg(&mut self, c: Color) {
        self.bg = PackedColor::pack(c);
    }

    pub fn set_underline_color(&mut self, c: Color) {
        self.underline_color = PackedColor::pack(c);
    }

    pub fn flags(&self) -> StyleFlags {
        StyleFlags::from_bits_truncate(self.flags)
    }

    pub fn set_flags(&mut self, flags: StyleFlags) {
        self.flags = flags.bits();
    }

    pub fn set_flag(&mut self, flag: StyleFlags, on: bool) {
        let mut f = self.flags();
        f.set(flag, on);
        self.flags = f.bits();
    }

    pub fn has(&self, flag: StyleFlags) -> bool {
        self.flags().contains(flag)
    }

    pub fn underline(&self) -> Underline {
        Underline::from_u8(self.underline).unwrap_or_default()
    }

    pub fn set_underline(&mut self, u: Underline) {
        self.underline = u as u8;
    }

    /// Stable 64-bit hash of the canonical packed bytes. Equal styles hash
    /// equally on every run of the same build.
    pub fn hash64(&self) -> u64 {
        core_mem::stable_hash(bytemuck::bytes_of(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Rgb;

    #[test]
    fn default_is_all_zero_bytes() {
        assert_eq!(bytemuck::bytes_of(&Style::DEFAULT), &[0u8; 16]);
        assert!(Style::default().is_default());
    }

    #[test]
    fn equal_styles_hash_equal() {
        let mut a = Style::default();
        a.set_flag(StyleFlags::BOLD, true);
        a.set_fg(Color::Palette(1));

        let mut b = Style::default();
        b.set_fg(Color::Palette(1));
        b.set_flag(StyleFlags::BOLD, true);

        assert_eq!(a, b);
        assert_eq!(a.hash64(), b.hash64());
    }

    #[test]
    fn distinct_styles_differ() {
        let mut a = Style::default();
        a.set_underline(Underline::Curly);
        a.set_underline_color(Color::Rgb(Rgb::new(255, 0, 0)));
        let b = Style::default();
        assert_ne!(a, b);
        assert_ne!(a.hash64(), b.hash64());
    }

    #[test]
    fn setters_roundtrip() {
        let mut s = Style::default();
        s.set_bg(Color::Rgb(Rgb::new(10, 20, 30)));
        s.set_underline(Underline::Double);
        s.set_flag(StyleFlags::ITALIC, true);
        assert_eq!(s.bg(), Color::Rgb(Rgb::new(10, 20, 30)));
        assert_eq!(s.underline(), Underline::Double);
        assert!(s.has(StyleFlags::ITALIC));
        s.set_flag(StyleFlags::ITALIC, false);
        assert!(!s.has(StyleFlags::ITALIC));
    }
}
