//! Chunking-independence properties for the stream front-end.
//!
//! Feeding a byte stream as the concatenation of arbitrary substrings must
//! produce exactly the callback sequence of feeding it whole. These drive
//! the full pipeline (UTF-8 decoder, parser, dispatcher) with generated
//! input.

use core_vt::stream::{Handler, Stream};
use core_vt::{Attribute, Mode, SemanticMark};
use core_vt::stream::{EraseDisplayMode, EraseLineMode};
use core_vt::Result;
use proptest::prelude::*;

/// Records every observed callback as a comparable string.
#[derive(Default)]
struct Tape {
    events: Vec<String>,
}

impl Handler for Tape {
    fn print(&mut self, c: char) -> Result {
        self.events.push(format!("print {c:?}"));
        Ok(())
    }
    fn bell(&mut self) -> Result {
        self.events.push("bell".into());
        Ok(())
    }
    fn backspace(&mut self) -> Result {
        self.events.push("backspace".into());
        Ok(())
    }
    fn linefeed(&mut self) -> Result {
        self.events.push("linefeed".into());
        Ok(())
    }
    fn carriage_return(&mut self) -> Result {
        self.events.push("cr".into());
        Ok(())
    }
    fn horizontal_tab(&mut self, n: u16) -> Result {
        self.events.push(format!("tab {n}"));
        Ok(())
    }
    fn set_cursor_up(&mut self, n: u16) -> Result {
        self.events.push(format!("up {n}"));
        Ok(())
    }
    fn set_cursor_down(&mut self, n: u16) -> Result {
        self.events.push(format!("down {n}"));
        Ok(())
    }
    fn set_cursor_right(&mut self, n: u16) -> Result {
        self.events.push(format!("right {n}"));
        Ok(())
    }
    fn set_cursor_left(&mut self, n: u16) -> Result {
        self.events.push(format!("left {n}"));
        Ok(())
    }
    fn set_cursor_pos(&mut self, row: u16, col: u16) -> Result {
        self.events.push(format!("pos {row} {col}"));
        Ok(())
    }
    fn erase_display(&mut self, mode: EraseDisplayMode, selective: bool) -> Result {
        self.events.push(format!("ed {mode:?} {selective}"));
        Ok(())
    }
    fn erase_line(&mut self, mode: EraseLineMode, selective: bool) -> Result {
        self.events.push(format!("el {mode:?} {selective}"));
        Ok(())
    }
    fn set_attribute(&mut self, attr: Attribute) -> Result {
        self.events.push(format!("attr {attr:?}"));
        Ok(())
    }
    fn set_mode(&mut self, mode: Mode, enabled: bool) -> Result {
        self.events.push(format!("mode {mode:?} {enabled}"));
        Ok(())
    }
    fn set_title(&mut self, title: &str) -> Result {
        self.events.push(format!("title {title:?}"));
        Ok(())
    }
    fn semantic_prompt(&mut self, mark: SemanticMark) -> Result {
        self.events.push(format!("prompt {mark:?}"));
        Ok(())
    }
    fn hyperlink_start(&mut self, id: Option<&str>, uri: &str) -> Result {
        self.events.push(format!("link {id:?} {uri:?}"));
        Ok(())
    }
    fn hyperlink_end(&mut self) -> Result {
        self.events.push("link end".into());
        Ok(())
    }
    fn dcs_put(&mut self, byte: u8) -> Result {
        self.events.push(format!("dcs {byte}"));
        Ok(())
    }
    fn apc_put(&mut self, byte: u8) -> Result {
        self.events.push(format!("apc {byte}"));
        Ok(())
    }
}

fn run_whole(bytes: &[u8]) -> Vec<String> {
    let mut s = Stream::new(Tape::default());
    s.next_slice(bytes).unwrap();
    s.into_handler().events
}

fn run_chunked(bytes: &[u8], cuts: &[usize]) -> Vec<String> {
    let mut s = Stream::new(Tape::default());
    let mut start = 0;
    for &cut in cuts {
        let cut = cut.min(bytes.len());
        if cut > start {
            s.next_slice(&bytes[start..cut]).unwrap();
            start = cut;
        }
    }
    s.next_slice(&bytes[start..]).unwrap();
    s.into_handler().events
}

/// Realistic-ish stream material: text, escapes, partial sequences.
fn stream_fragments() -> impl Strategy<Value = Vec<u8>> {
    let fragment = prop_oneof![
        "[ -~]{0,8}".prop_map(|s| s.into_bytes()),
        Just(b"\x1b[1;31m".to_vec()),
        Just(b"\x1b[?1049h".to_vec()),
        Just(b"\x1b[2J".to_vec()),
        Just(b"\x1b]2;title\x07".to_vec()),
        Just(b"\x1b]8;;https://x\x1b\\".to_vec()),
        Just(b"\x1b]133;A\x07".to_vec()),
        Just("héllo 界".as_bytes().to_vec()),
        Just(b"\x1bP1q12\x1b\\".to_vec()),
        Just(b"\r\n\t\x08\x07".to_vec()),
        // Deliberately broken material.
        Just(vec![0xE4, 0xB8]),
        Just(vec![0x1b, b'[', b'1', b'2']),
        Just(vec![0xFF, 0x80]),
        proptest::collection::vec(any::<u8>(), 0..6),
    ];
    proptest::collection::vec(fragment, 0..12).prop_map(|frags| frags.concat())
}

proptest! {
    #[test]
    fn chunking_never_changes_output(
        bytes in stream_fragments(),
        cuts in proptest::collection::vec(0usize..64, 0..8),
    ) {
        let mut cuts = cuts;
        cuts.sort_unstable();
        let whole = run_whole(&bytes);
        let chunked = run_chunked(&bytes, &cuts);
        prop_assert_eq!(whole, chunked);
    }

    #[test]
    fn byte_at_a_time_equals_whole(bytes in stream_fragments()) {
        let whole = run_whole(&bytes);
        let mut s = Stream::new(Tape::default());
        for &b in &bytes {
            s.next(b).unwrap();
        }
        prop_assert_eq!(whole, s.into_handler().events);
    }

    #[test]
    fn arbitrary_bytes_never_panic(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
        let mut s = Stream::new(Tape::default());
        for &b in &bytes {
            s.next(b).unwrap();
        }
    }
}

#[test]
fn valid_utf8_prints_exact_chars() {
    let text = "plain, héllo, 世界, emoji 😀, mixed 1α2β";
    let events = run_whole(text.as_bytes());
    let printed: String = events
        .iter()
        .filter_map(|e| e.strip_prefix("print "))
        .map(|c| {
            // Events hold `'x'` debug forms.
            c.trim_matches('\'').chars().next().unwrap()
        })
        .collect();
    let expected: String = text.chars().filter(|c| *c != ' ').collect();
    let printed_no_space: String = printed.chars().filter(|c| *c != ' ').collect();
    assert_eq!(printed_no_space, expected);
}
