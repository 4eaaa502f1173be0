//! SGR (`CSI … m`) parameter parsing into typed attributes.
//!
//! The separator matters: `38;5;196` and `38:5:196` both select palette
//! color 196, but colon-joined parameters are sub-parameters of the code
//! that precedes them, and `4:3` (curly underline) has no semicolon
//! equivalent. The parser consumes a [`CsiParams`] (which records where
//! colons occurred) and yields [`Attribute`]s; unknown codes are surfaced
//! with their context so the handler can log instead of guessing.

use crate::parser::CsiParams;
use core_grid::{Color, Rgb, Underline};

/// One SGR attribute delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attribute {
    /// SGR 0: reset everything.
    Unset,
    Bold,
    Faint,
    /// SGR 22 clears both bold and faint.
    ResetBoldFaint,
    Italic,
    ResetItalic,
    Underline(Underline),
    ResetUnderline,
    UnderlineColor(Color),
    ResetUnderlineColor,
    Blink,
    ResetBlink,
    Inverse,
    ResetInverse,
    Invisible,
    ResetInvisible,
    Strikethrough,
    ResetStrikethrough,
    Overline,
    ResetOverline,
    Foreground(Color),
    Background(Color),
    /// Unrecognized code with the full parameter list and the tail starting
    /// at the offending code, for logging.
    Unknown {
        full: Vec<u16>,
        remaining: Vec<u16>,
    },
}

/// Iterator over the attributes of one SGR sequence.
#[derive(Debug, Clone)]
pub struct SgrIter {
    csi: CsiParams,
    idx: usize,
    emitted_any: bool,
}

impl SgrIter {
    pub fn new(csi: &CsiParams) -> Self {
        Self {
            csi: *csi,
            idx: 0,
            emitted_any: false,
        }
    }

    /// Number of parameters colon-chained to the parameter at `i`
    /// (sub-parameters following it).
    fn chained(&self, i: usize) -> usize {
        let mut n = 0;
        let mut k = i;
        while k < self.csi.params().len().saturating_sub(1) && self.csi.colon_after(k) {
            n += 1;
            k += 1;
        }
        n
    }

    fn unknown(&self, at: usize) -> Attribute {
        Attribute::Unknown {
            full: self.csi.params().to_vec(),
            remaining: self.csi.params()[at..].to_vec(),
        }
    }

    /// Parse an extended color (38/48/58) starting at `i` (the code
    /// itself). Returns the color and the index just past what was
    /// consumed.
    fn extended_color(&self, i: usize) -> Option<(Color, usize)> {
        let params = self.csi.params();
        let colon = self.csi.colon_after(i);
        let kind = *params.get(i + 1)?;
        match kind {
            5 => {
                let idx = *params.get(i + 2)?;
                Some((Color::Palette(idx.min(255) as u8), i + 3))
            }
            2 => {
                if colon {
                    // Colon form may carry a color-space id: count the
                    // chained sub-parameters to tell `38:2:r:g:b` from
                    // `38:2:cs:r:g:b`.
                    let chained = self.chained(i);
                    let (r, g, b, end) = if chained >= 5 {
                        (params.get(i + 3)?, params.get(i + 4)?, params.get(i + 5)?, i + 6)
                    } else if chained == 4 {
                        (params.get(i + 2)?, params.get(i + 3)?, params.get(i + 4)?, i + 5)
                    } else {
                        return None;
                    };
                    Some((
                        Color::Rgb(Rgb::new(
                            (*r).min(255) as u8,
                            (*g).min(255) as u8,
                            (*b).min(255) as u8,
                        )),
                        end,
                    ))
                } else {
                    let r = *params.get(i + 2)?;
                    let g = *params.get(i + 3)?;
                    let b = *params.get(i + 4)?;
                    Some((
                        Color::Rgb(Rgb::new(
                            r.min(255) as u8,
                            g.min(255) as u8,
                            b.min(255) as u8,
                        )),
                        i + 5,
                    ))
                }
            }
            _ => None,
        }
    }
}

impl Iterator for SgrIter {
    type Item = Attribute;

    fn next(&mut self) -> Option<Attribute> {
        let params = self.csi.params();
        if params.is_empty() {
            // Bare `CSI m` is a reset.
            if self.emitted_any {
                return None;
            }
            self.emitted_any = true;
            return Some(Attribute::Unset);
        }
        if self.idx >= params.len() {
            return None;
        }
        let i = self.idx;
        let code = params[i];
        self.emitted_any = true;

        let attr = match code {
            0 => {
                self.idx = i + 1;
                Attribute::Unset
            }
            1 => {
                self.idx = i + 1;
                Attribute::Bold
            }
            2 => {
                self.idx = i + 1;
                Attribute::Faint
            }
            3 => {
                self.idx = i + 1;
                Attribute::Italic
            }
            4 => {
                if self.csi.colon_after(i) {
                    let sub = params.get(i + 1).copied().unwrap_or(1);
                    self.idx = i + 2;
                    match Underline::from_u8(sub.min(255) as u8) {
                        Some(u) => Attribute::Underline(u),
                        None => self.unknown(i),
                    }
                } else {
                    self.idx = i + 1;
                    Attribute::Underline(Underline::Single)
                }
            }
            5 | 6 => {
                self.idx = i + 1;
                Attribute::Blink
            }
            7 => {
                self.idx = i + 1;
                Attribute::Inverse
            }
            8 => {
                self.idx = i + 1;
                Attribute::Invisible
            }
            9 => {
                self.idx = i + 1;
                Attribute::Strikethrough
            }
            21 => {
                self.idx = i + 1;
                Attribute::Underline(Underline::Double)
            }
            22 => {
                self.idx = i + 1;
                Attribute::ResetBoldFaint
            }
            23 => {
                self.idx = i + 1;
                Attribute::ResetItalic
            }
            24 => {
                self.idx = i + 1;
                Attribute::ResetUnderline
            }
            25 => {
                self.idx = i + 1;
                Attribute::ResetBlink
            }
            27 => {
                self.idx = i + 1;
                Attribute::ResetInverse
            }
            28 => {
                self.idx = i + 1;
                Attribute::ResetInvisible
            }
            29 => {
                self.idx = i + 1;
                Attribute::ResetStrikethrough
            }
            30..=37 => {
                self.idx = i + 1;
                Attribute::Foreground(Color::Palette((code - 30) as u8))
            }
            38 => match self.extended_color(i) {
                Some((c, end)) => {
                    self.idx = end;
                    Attribute::Foreground(c)
                }
                None => {
                    self.idx = params.len();
                    self.unknown(i)
                }
            },
            39 => {
                self.idx = i + 1;
                Attribute::Foreground(Color::None)
            }
            40..=47 => {
                self.idx = i + 1;
                Attribute::Background(Color::Palette((code - 40) as u8))
            }
            48 => match self.extended_color(i) {
                Some((c, end)) => {
                    self.idx = end;
                    Attribute::Background(c)
                }
                None => {
                    self.idx = params.len();
                    self.unknown(i)
                }
            },
            49 => {
                self.idx = i + 1;
                Attribute::Background(Color::None)
            }
            53 => {
                self.idx = i + 1;
                Attribute::Overline
            }
            55 => {
                self.idx = i + 1;
                Attribute::ResetOverline
            }
            58 => match self.extended_color(i) {
                Some((c, end)) => {
                    self.idx = end;
                    Attribute::UnderlineColor(c)
                }
                None => {
                    self.idx = params.len();
                    self.unknown(i)
                }
            },
            59 => {
                self.idx = i + 1;
                Attribute::ResetUnderlineColor
            }
            90..=97 => {
                self.idx = i + 1;
                Attribute::Foreground(Color::Palette((code - 90 + 8) as u8))
            }
            100..=107 => {
                self.idx = i + 1;
                Attribute::Background(Color::Palette((code - 100 + 8) as u8))
            }
            _ => {
                self.idx = i + 1;
                self.unknown(i)
            }
        };
        Some(attr)
    }
}
