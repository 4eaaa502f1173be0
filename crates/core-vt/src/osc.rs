//! OSC (Operating System Command) payload parsing.
//!
//! The VT parser accumulates OSC bytes between `ESC ]` and the terminator
//! (BEL or ST); this module turns the accumulated payload into a typed
//! command. Unknown or malformed payloads come back as
//! [`OscCommand::Unknown`] so the dispatcher can log them without guessing.

use tracing::debug;

/// Shell-integration marks (OSC 133).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemanticMark {
    /// `133;A` — prompt is about to be printed.
    PromptStart,
    /// `133;B` — prompt done, user input begins.
    PromptEnd,
    /// `133;C` — input done, command output begins.
    OutputStart,
    /// `133;D[;code]` — command finished, with an optional exit code.
    CommandEnd(Option<u32>),
}

/// A parsed OSC payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OscCommand {
    /// OSC 0 / OSC 2.
    ChangeWindowTitle(String),
    /// OSC 1.
    ChangeWindowIcon(String),
    /// OSC 4 with `index;spec` pairs; `?` specs become report requests.
    Palette {
        set: Vec<(u8, String)>,
        report: Vec<u8>,
    },
    /// OSC 104 with the indexes to reset; empty means all.
    ResetPalette(Vec<u8>),
    /// OSC 10 / 11 / 12 with a color spec.
    SetForeground(String),
    SetBackground(String),
    SetCursorColor(String),
    /// OSC 10 / 11 / 12 with `?`.
    ReportForeground,
    ReportBackground,
    ReportCursorColor,
    /// OSC 110 / 111 / 112.
    ResetForeground,
    ResetBackground,
    ResetCursorColor,
    /// OSC 7 (`file://…`) or OSC 1337 `CurrentDir=…`.
    ReportPwd(String),
    /// OSC 8 with a non-empty URI.
    HyperlinkStart { id: Option<String>, uri: String },
    /// OSC 8 with an empty URI.
    HyperlinkEnd,
    /// OSC 52: set (`payload` is base64) or query (`payload` is `?`).
    Clipboard { kind: char, payload: String },
    /// OSC 133.
    SemanticPrompt(SemanticMark),
    /// OSC 22: pointer-shape name.
    MouseShape(String),
    /// Anything else; kept for logging.
    Unknown(String),
}

impl OscCommand {
    /// Parse a full OSC payload (everything between `ESC ]` and the
    /// terminator).
    pub fn parse(buf: &[u8]) -> OscCommand {
        let text = String::from_utf8_lossy(buf);
        let (num, rest) = match text.split_once(';') {
            Some((n, r)) => (n, Some(r)),
            None => (text.as_ref(), None),
        };
        match num {
            "0" | "2" => OscCommand::ChangeWindowTitle(rest.unwrap_or("").to_string()),
            "1" => OscCommand::ChangeWindowIcon(rest.unwrap_or("").to_string()),
            "4" => Self::parse_palette(rest.unwrap_or("")),
            "104" => OscCommand::ResetPalette(
                rest.map(Self::parse_index_list).unwrap_or_default(),
            ),
            "10" | "11" | "12" => Self::parse_dynamic_color(num, rest),
            "110" => OscCommand::ResetForeground,
            "111" => OscCommand::ResetBackground,
            "112" => OscCommand::ResetCursorColor,
            "7" => OscCommand::ReportPwd(rest.unwrap_or("").to_string()),
            "8" => Self::parse_hyperlink(rest.unwrap_or("")),
            "52" => Self::parse_clipboard(rest.unwrap_or("")),
            "133" => Self::parse_semantic(rest.unwrap_or("")),
            "22" => OscCommand::MouseShape(rest.unwrap_or("").to_string()),
            "1337" => Self::parse_iterm(rest.unwrap_or("")),
            _ => {
                debug!(target: "vt.osc", payload = %text, "unrecognized osc command");
                OscCommand::Unknown(text.into_owned())
            }
        }
    }

    fn parse_index_list(s: &str) -> Vec<u8> {
        s.split(';').filter_map(|p| p.parse::<u8>().ok()).collect()
    }

    fn parse_palette(rest: &str) -> OscCommand {
        let mut set = Vec::new();
        let mut report = Vec::new();
        let mut parts = rest.split(';');
        while let Some(idx) = parts.next() {
            let Some(spec) = parts.next() else { break };
            let Ok(idx) = idx.parse::<u8>() else { continue };
            if spec == "?" {
                report.push(idx);
            } else {
                set.push((idx, spec.to_string()));
            }
        }
        OscCommand::Palette { set, report }
    }

    fn parse_dynamic_color(num: &str, rest: Option<&str>) -> OscCommand {
        let query = rest == Some("?");
        match (num, query) {
            ("10", true) => OscCommand::ReportForeground,
            ("11", true) => OscCommand::ReportBackground,
            ("12", true) => OscCommand::ReportCursorColor,
            ("10", false) => OscCommand::SetForeground(rest.unwrap_or("").to_string()),
            ("11", false) => OscCommand::SetBackground(rest.unwrap_or("").to_string()),
            (_, false) => OscCommand::SetCursorColor(rest.unwrap_or("").to_string()),
            _ => unreachable!("caller matched 10|11|12"),
        }
    }

    fn parse_hyperlink(rest: &str) -> OscCommand {
        let (params, uri) = rest.split_once(';').unwrap_or((rest, ""));
        if uri.is_empty() {
            return OscCommand::HyperlinkEnd;
        }
        let id = params.split(':').find_map(|kv| {
            kv.strip_prefix("id=")
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        });
        OscCommand::HyperlinkStart {
            id,
            uri: uri.to_string(),
        }
    }

    fn parse_clipboard(rest: &str) -> OscCommand {
        let (kinds, payload) = rest.split_once(';').unwrap_or(("c", rest));
        let kind = kinds.chars().next().unwrap_or('c');
        OscCommand::Clipboard {
            kind,
            payload: payload.to_string(),
        }
    }

    fn parse_semantic(rest: &str) -> OscCommand {
        let mut parts = rest.split(';');
        match parts.next() {
            Some("A") => OscCommand::SemanticPrompt(SemanticMark::PromptStart),
            Some("B") => OscCommand::SemanticPrompt(SemanticMark::PromptEnd),
            Some("C") => OscCommand::SemanticPrompt(SemanticMark::OutputStart),
            Some("D") => {
                let code = parts.next().and_then(|c| c.parse::<u32>().ok());
                OscCommand::SemanticPrompt(SemanticMark::CommandEnd(code))
            }
            _ => OscCommand::Unknown(format!("133;{rest}")),
        }
    }

    fn parse_iterm(rest: &str) -> OscCommand {
        match rest.strip_prefix("CurrentDir=") {
            Some(dir) => OscCommand::ReportPwd(dir.to_string()),
            None => {
                debug!(target: "vt.osc", payload = rest, "unrecognized 1337 payload");
                OscCommand::Unknown(format!("1337;{rest}"))
            }
        }
    }
}

/// Accumulates OSC payload bytes between start and terminator.
#[derive(Debug, Default)]
pub struct OscParser {
    buf: Vec<u8>,
    overflow: bool,
}

/// Cap on accumulated payload size; larger payloads are truncated.
pub const MAX_OSC_BYTES: usize = 8 * 1024;

impl OscParser {
    pub fn start(&mut self) {
        self.buf.clear();
        self.overflow = false;
    }

    pub fn put(&mut self, byte: u8) {
        if self.buf.len() >= MAX_OSC_BYTES {
            self.overflow = true;
            return;
        }
        self.buf.push(byte);
    }

    pub fn end(&mut self) -> OscCommand {
        if self.overflow {
            debug!(target: "vt.osc", cap = MAX_OSC_BYTES, "osc payload truncated");
        }
        OscCommand::parse(&self.buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> OscCommand {
        OscCommand::parse(s.as_bytes())
    }

    #[test]
    fn window_title() {
        assert_eq!(
            parse("0;hello world"),
            OscCommand::ChangeWindowTitle("hello world".into())
        );
        assert_eq!(parse("2;t"), OscCommand::ChangeWindowTitle("t".into()));
        assert_eq!(parse("1;i"), OscCommand::ChangeWindowIcon("i".into()));
    }

    #[test]
    fn palette_set_and_query() {
        match parse("4;1;#ff0000;2;?") {
            OscCommand::Palette { set, report } => {
                assert_eq!(set, vec![(1, "#ff0000".to_string())]);
                assert_eq!(report, vec![2]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn palette_reset() {
        assert_eq!(parse("104"), OscCommand::ResetPalette(vec![]));
        assert_eq!(parse("104;3;4"), OscCommand::ResetPalette(vec![3, 4]));
    }

    #[test]
    fn dynamic_colors() {
        assert_eq!(parse("10;?"), OscCommand::ReportForeground);
        assert_eq!(parse("11;black"), OscCommand::SetBackground("black".into()));
        assert_eq!(parse("112"), OscCommand::ResetCursorColor);
    }

    #[test]
    fn hyperlink_roundtrip() {
        assert_eq!(
            parse("8;id=xyz;https://example.com"),
            OscCommand::HyperlinkStart {
                id: Some("xyz".into()),
                uri: "https://example.com".into()
            }
        );
        assert_eq!(
            parse("8;;https://example.com"),
            OscCommand::HyperlinkStart {
                id: None,
                uri: "https://example.com".into()
            }
        );
        assert_eq!(parse("8;;"), OscCommand::HyperlinkEnd);
    }

    #[test]
    fn pwd_forms() {
        assert_eq!(
            parse("7;file://host/tmp"),
            OscCommand::ReportPwd("file://host/tmp".into())
        );
        assert_eq!(
            parse("1337;CurrentDir=/home/u"),
            OscCommand::ReportPwd("/home/u".into())
        );
    }

    #[test]
    fn clipboard() {
        assert_eq!(
            parse("52;c;aGVsbG8="),
            OscCommand::Clipboard {
                kind: 'c',
                payload: "aGVsbG8=".into()
            }
        );
        assert_eq!(
            parse("52;p;?"),
            OscCommand::Clipboard {
                kind: 'p',
                payload: "?".into()
            }
        );
    }

    #[test]
    fn semantic_marks() {
        assert_eq!(
            parse("133;A"),
            OscCommand::SemanticPrompt(SemanticMark::PromptStart)
        );
        assert_eq!(
            parse("133;D;1"),
            OscCommand::SemanticPrompt(SemanticMark::CommandEnd(Some(1)))
        );
    }

    #[test]
    fn unknown_is_preserved() {
        assert!(matches!(parse("9999;x"), OscCommand::Unknown(_)));
    }

    #[test]
    fn oversized_payload_truncates() {
        let mut p = OscParser::default();
        p.start();
        for _ in 0..MAX_OSC_BYTES + 100 {
            p.put(b'a');
        }
        // Still parses (as unknown), no panic, bounded memory.
        let _ = p.end();
    }
}
