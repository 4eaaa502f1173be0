//! The 256-color palette plus the dynamic default/cursor colors.
//!
//! Initialized to the xterm defaults: 16 named colors, the 6×6×6 cube,
//! and 24 grays. OSC 4 mutates entries; OSC 104 and RIS restore defaults.

use core_grid::Rgb;

/// Default foreground/background/cursor, overridable via OSC 10/11/12.
const DEFAULT_FG: Rgb = Rgb::new(229, 229, 229);
const DEFAULT_BG: Rgb = Rgb::new(0, 0, 0);

/// xterm's 16 base colors.
#[rustfmt::skip]
const BASE16: [Rgb; 16] = [
    Rgb::new(0, 0, 0),       Rgb::new(205, 0, 0),
    Rgb::new(0, 205, 0),     Rgb::new(205, 205, 0),
    Rgb::new(0, 0, 238),     Rgb::new(205, 0, 205),
    Rgb::new(0, 205, 205),   Rgb::new(229, 229, 229),
    Rgb::new(127, 127, 127), Rgb::new(255, 0, 0),
    Rgb::new(0, 255, 0),     Rgb::new(255, 255, 0),
    Rgb::new(92, 92, 255),   Rgb::new(255, 0, 255),
    Rgb::new(0, 255, 255),   Rgb::new(255, 255, 255),
];

fn default_entry(index: u8) -> Rgb {
    match index {
        0..=15 => BASE16[index as usize],
        16..=231 => {
            let n = index as u32 - 16;
            let channel = |v: u32| -> u8 {
                if v == 0 { 0 } else { (55 + 40 * v) as u8 }
            };
            Rgb::new(
                channel(n / 36),
                channel((n / 6) % 6),
                channel(n % 6),
            )
        }
        _ => {
            let v = 8 + 10 * (index as u16 - 232);
            Rgb::new(v as u8, v as u8, v as u8)
        }
    }
}

/// Palette state: 256 indexed colors plus the dynamic colors.
#[derive(Debug, Clone)]
pub struct Palette {
    colors: [Rgb; 256],
    pub foreground: Rgb,
    pub background: Rgb,
    pub cursor: Rgb,
}

impl Default for Palette {
    fn default() -> Self {
        let mut colors = [Rgb::default(); 256];
        for (i, slot) in colors.iter_mut().enumerate() {
            *slot = default_entry(i as u8);
        }
        Self {
            colors,
            foreground: DEFAULT_FG,
            background: DEFAULT_BG,
            cursor: DEFAULT_FG,
        }
    }
}

impl Palette {
    pub fn get(&self, index: u8) -> Rgb {
        self.colors[index as usize]
    }

    pub fn set(&mut self, index: u8, rgb: Rgb) {
        self.colors[index as usize] = rgb;
    }

    pub fn reset_index(&mut self, index: u8) {
        self.colors[index as usize] = default_entry(index);
    }

    pub fn reset_all(&mut self) {
        for i in 0..=255u8 {
            self.reset_index(i);
        }
        self.foreground = DEFAULT_FG;
        self.background = DEFAULT_BG;
        self.cursor = DEFAULT_FG;
    }

    pub fn reset_foreground(&mut self) {
        self.foreground = DEFAULT_FG;
    }

    pub fn reset_background(&mut self) {
        self.background = DEFAULT_BG;
    }

    pub fn reset_cursor(&mut self) {
        self.cursor = DEFAULT_FG;
    }

    /// Whether the current background reads as a dark scheme (drives the
    /// color-scheme report).
    pub fn is_dark(&self) -> bool {
        let Rgb { r, g, b } = self.background;
        // Rec. 601 luma, integer form.
        let luma = 299 * r as u32 + 587 * g as u32 + 114 * b as u32;
        luma < 128_000
    }
}
