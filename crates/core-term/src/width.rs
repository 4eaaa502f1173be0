//! Codepoint display-width classification.
//!
//! One authoritative function `char_width` decides how many columns a
//! printed codepoint occupies: 0 (combining/zero-width, attaches to the
//! previous cell), 1, or 2 (East Asian wide plus pictographics).
//!
//! Precedence:
//! 1. Explicit zero-width codepoints (ZWJ, variation selectors, combining
//!    marks) are 0 regardless of what the baseline table says.
//! 2. The `unicode-width` baseline.
//! 3. A conservative pictographic widen: emoji-block codepoints the
//!    baseline reports as narrow are widened to 2. Over-estimation costs a
//!    blank cell; under-estimation drifts the cursor against the renderer.

use unicode_width::UnicodeWidthChar;

const ZWJ: char = '\u{200D}';

fn is_variation_selector(c: char) -> bool {
    ('\u{FE00}'..='\u{FE0F}').contains(&c) || ('\u{E0100}'..='\u{E01EF}').contains(&c)
}

fn is_combining_mark(c: char) -> bool {
    ('\u{0300}'..='\u{036F}').contains(&c)
        || ('\u{1AB0}'..='\u{1AFF}').contains(&c)
        || ('\u{1DC0}'..='\u{1DFF}').contains(&c)
        || ('\u{20D0}'..='\u{20FF}').contains(&c)
        || ('\u{FE20}'..='\u{FE2F}').contains(&c)
}

/// Rough Extended Pictographic coverage: the primary emoji blocks plus the
/// legacy symbol blocks terminals render as emoji.
fn is_extended_pictographic(c: char) -> bool {
    ('\u{1F300}'..='\u{1FAFF}').contains(&c) || ('\u{2600}'..='\u{27BF}').contains(&c)
}

fn is_regional_indicator(c: char) -> bool {
    ('\u{1F1E6}'..='\u{1F1FF}').contains(&c)
}

/// Terminal column width of one codepoint.
pub fn char_width(c: char) -> u16 {
    if c == ZWJ || is_variation_selector(c) || is_combining_mark(c) {
        return 0;
    }
    let base = UnicodeWidthChar::width(c).unwrap_or(0) as u16;
    if base == 0 {
        return 0;
    }
    if base == 1 && (is_extended_pictographic(c) || is_regional_indicator(c)) {
        return 2;
    }
    base
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_is_narrow() {
        assert_eq!(char_width('a'), 1);
        assert_eq!(char_width('~'), 1);
    }

    #[test]
    fn cjk_is_wide() {
        assert_eq!(char_width('界'), 2);
        assert_eq!(char_width('ｗ'), 2);
    }

    #[test]
    fn emoji_is_wide() {
        assert_eq!(char_width('😀'), 2);
        assert_eq!(char_width('🇺'), 2);
    }

    #[test]
    fn zero_width_attaches() {
        assert_eq!(char_width('\u{0301}'), 0);
        assert_eq!(char_width(ZWJ), 0);
        assert_eq!(char_width('\u{FE0F}'), 0);
    }
}
