//! Streaming UTF-8 decoder (Bjoern Hoehrmann's DFA).
//!
//! One table lookup per byte. Malformed input is replaced with U+FFFD; a
//! byte that breaks a sequence mid-way is *not* consumed, so the caller
//! feeds it again and it gets a fresh chance to start a valid sequence.
//! Surrogates and overlong encodings are rejected by the table itself.

/// Replacement character emitted for malformed input.
pub const REPLACEMENT: char = '\u{FFFD}';

const ACCEPT: u8 = 0;
const REJECT: u8 = 12;

/// Byte-class map (first 256 entries) followed by the state transition
/// table indexed by `256 + state + class`; states are multiples of 12.
#[rustfmt::skip]
static UTF8D: [u8; 364] = [
    // 00..7f: class 0 (ASCII)
    0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0, 0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,
    0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0, 0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,
    0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0, 0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,
    0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0, 0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,
    // 80..9f: continuation classes
    1,1,1,1,1,1,1,1,1,1,1,1,1,1,1,1, 9,9,9,9,9,9,9,9,9,9,9,9,9,9,9,9,
    // a0..bf
    7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,7, 7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,
    // c0..df: c0/c1 are overlong leads (class 8)
    8,8,2,2,2,2,2,2,2,2,2,2,2,2,2,2, 2,2,2,2,2,2,2,2,2,2,2,2,2,2,2,2,
    // e0..ef
    0xa,0x3,0x3,0x3,0x3,0x3,0x3,0x3,0x3,0x3,0x3,0x3,0x3,0x4,0x3,0x3,
    // f0..ff
    0xb,0x6,0x6,0x6,0x5,0x8,0x8,0x8,0x8,0x8,0x8,0x8,0x8,0x8,0x8,0x8,
    // transitions: 9 states x 12 classes
     0,12,24,36,60,96,84,12,12,12,48,72,
    12,12,12,12,12,12,12,12,12,12,12,12,
    12, 0,12,12,12,12,12, 0,12, 0,12,12,
    12,24,12,12,12,12,12,24,12,24,12,12,
    12,12,12,12,12,12,12,24,12,12,12,12,
    12,24,12,12,12,12,12,12,12,24,12,12,
    12,12,12,12,12,12,12,36,12,36,12,12,
    12,36,12,12,12,12,12,36,12,36,12,12,
    12,36,12,12,12,12,12,12,12,12,12,12,
];

/// Result of feeding one byte to the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Utf8Step {
    /// A decoded scalar, or U+FFFD on malformed input.
    pub codepoint: Option<char>,
    /// Whether the byte was consumed. `false` only when the byte broke a
    /// multi-byte sequence; feed it again.
    pub consumed: bool,
}

/// Streaming decoder state: one partial codepoint at most.
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8Decoder {
    state: u8,
    codepoint: u32,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a multi-byte sequence is in flight.
    pub fn in_progress(&self) -> bool {
        self.state != ACCEPT
    }

    /// Abandon any partial sequence.
    pub fn reset(&mut self) {
        self.state = ACCEPT;
        self.codepoint = 0;
    }

    pub fn next(&mut self, byte: u8) -> Utf8Step {
        let class = UTF8D[byte as usize];
        let candidate = if self.state == ACCEPT {
            (0xFFu32 >> class) & byte as u32
        } else {
            (byte as u32 & 0x3F) | (self.codepoint << 6)
        };
        let next = UTF8D[256 + self.state as usize + class as usize];
        match next {
            ACCEPT => {
                self.state = ACCEPT;
                self.codepoint = 0;
                Utf8Step {
                    codepoint: Some(char::from_u32(candidate).unwrap_or(REPLACEMENT)),
                    consumed: true,
                }
            }
            REJECT => {
                let was_mid_sequence = self.state != ACCEPT;
                self.reset();
                Utf8Step {
                    codepoint: Some(REPLACEMENT),
                    // A byte that merely broke someone else's sequence gets
                    // retried; an invalid lead byte is swallowed.
                    consumed: !was_mid_sequence,
                }
            }
            state => {
                self.state = state;
                self.codepoint = candidate;
                Utf8Step {
                    codepoint: None,
                    consumed: true,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(bytes: &[u8]) -> Vec<char> {
        let mut d = Utf8Decoder::new();
        let mut out = Vec::new();
        let mut i = 0;
        while i < bytes.len() {
            let step = d.next(bytes[i]);
            if let Some(cp) = step.codepoint {
                out.push(cp);
            }
            if step.consumed {
                i += 1;
            }
        }
        out
    }

    #[test]
    fn ascii_passthrough() {
        assert_eq!(decode_all(b"hello"), vec!['h', 'e', 'l', 'l', 'o']);
    }

    #[test]
    fn multibyte_sequences() {
        assert_eq!(decode_all("é".as_bytes()), vec!['é']);
        assert_eq!(decode_all("界".as_bytes()), vec!['界']);
        assert_eq!(decode_all("😀".as_bytes()), vec!['😀']);
    }

    #[test]
    fn stray_continuation_replaced() {
        assert_eq!(decode_all(&[0x80]), vec![REPLACEMENT]);
        assert_eq!(decode_all(&[0xBF, b'a']), vec![REPLACEMENT, 'a']);
    }

    #[test]
    fn truncated_sequence_retries_breaking_byte() {
        // E4 B8 starts 界 but 'x' breaks it; 'x' must survive.
        assert_eq!(decode_all(&[0xE4, 0xB8, b'x']), vec![REPLACEMENT, 'x']);
    }

    #[test]
    fn overlong_rejected() {
        // C0 80 is an overlong NUL.
        let out = decode_all(&[0xC0, 0x80]);
        assert!(out.contains(&REPLACEMENT));
        assert!(!out.contains(&'\0'));
    }

    #[test]
    fn surrogate_rejected() {
        // ED A0 80 would be U+D800.
        let out = decode_all(&[0xED, 0xA0, 0x80, b'y']);
        assert!(out.contains(&REPLACEMENT));
        assert_eq!(*out.last().unwrap(), 'y');
    }

    #[test]
    fn every_scalar_roundtrips() {
        let mut buf = [0u8; 4];
        for cp in (0u32..=0x10FFFF).filter_map(char::from_u32) {
            let s = cp.encode_utf8(&mut buf);
            assert_eq!(decode_all(s.as_bytes()), vec![cp], "scalar {cp:?}");
        }
    }
}
