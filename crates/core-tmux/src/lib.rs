//! tmux control-mode (`tmux -CC`) notification parser.
//!
//! Line-buffered state machine over the bytes tmux writes to its client:
//! `%notification arg…` lines, and `%begin`/`%end`/`%error` blocks wrapping
//! command output. Feed it one byte at a time; it hands back at most one
//! [`Notification`] per byte, borrowing from the internal line buffer — the
//! caller must consume the notification before the next `put` call, which
//! may invalidate it.
//!
//! Robustness rules:
//! * Anything that is not a `%`-prefixed line in idle state breaks the
//!   stream: the client transitions to `broken`, emits [`Notification::Exit`]
//!   once, and swallows everything afterwards.
//! * A line or block exceeding the buffer cap also breaks the stream.
//! * `%begin`/`%end` pairing ignores the numeric tags tmux prints and
//!   relies purely on ordering. Control mode is a single ordered stream, so
//!   tag matching adds nothing; this is an intentional simplification.
//! * Unknown `%` notifications are logged and skipped.

use tracing::{debug, warn};

/// Upper bound on buffered bytes (line or block). Overflow breaks the
/// stream rather than growing without limit.
pub const MAX_BUFFER: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Notification,
    Block,
    Broken,
}

/// A parsed control-mode event. Borrowed payloads point into the client's
/// buffer and live until the next `put`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification<'a> {
    /// `%output %<pane> <data>`.
    Output { pane: u64, data: &'a [u8] },
    /// The accumulated body of a `%begin` … `%end` block.
    BlockEnd(&'a [u8]),
    /// The accumulated body of a `%begin` … `%error` block.
    BlockErr(&'a [u8]),
    /// `%session-changed $<id> <name>`.
    SessionChanged { id: u64, name: &'a str },
    /// `%sessions-changed`.
    SessionsChanged,
    /// `%window-add @<id>`.
    WindowAdd { id: u64 },
    /// `%window-renamed @<id> <name>`.
    WindowRenamed { id: u64, name: &'a str },
    /// The stream is broken (protocol violation or overflow); emitted once.
    Exit,
}

/// Control-mode client state machine.
#[derive(Debug)]
pub struct Client {
    state: State,
    /// Current line being accumulated.
    line: Vec<u8>,
    /// Accumulated block body between `%begin` and `%end`/`%error`.
    block: Vec<u8>,
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    pub fn new() -> Self {
        Self {
            state: State::Idle,
            line: Vec::new(),
            block: Vec::new(),
        }
    }

    pub fn is_broken(&self) -> bool {
        self.state == State::Broken
    }

    /// Feed one byte. Returns a notification when the byte completes one;
    /// `None` after the stream has broken.
    pub fn put(&mut self, byte: u8) -> Option<Notification<'_>> {
        match self.state {
            State::Broken => None,
            State::Idle => match byte {
                b'%' => {
                    self.line.clear();
                    self.line.push(byte);
                    self.state = State::Notification;
                    None
                }
                b'\n' | b'\r' => None,
                _ => {
                    warn!(target: "tmux.client", byte, "unexpected byte outside notification");
                    self.state = State::Broken;
                    Some(Notification::Exit)
                }
            },
            State::Notification => {
                if byte != b'\n' {
                    return self.accumulate_line(byte);
                }
                self.parse_notification()
            }
            State::Block => {
                if byte != b'\n' {
                    return self.accumulate_line(byte);
                }
                self.parse_block_line()
            }
        }
    }

    fn accumulate_line(&mut self, byte: u8) -> Option<Notification<'_>> {
        if byte == b'\r' {
            return None;
        }
        if self.line.len() + self.block.len() >= MAX_BUFFER {
            warn!(target: "tmux.client", cap = MAX_BUFFER, "buffer overflow; breaking stream");
            self.state = State::Broken;
            return Some(Notification::Exit);
        }
        self.line.push(byte);
        None
    }

    /// A complete `%…` line arrived in notification state.
    fn parse_notification(&mut self) -> Option<Notification<'_>> {
        self.state = State::Idle;
        let (word, rest) = split_word(&self.line);
        match word {
            b"%begin" => {
                self.block.clear();
                self.state = State::Block;
                None
            }
            b"%output" => {
                let (pane_word, data) = split_word(rest);
                let pane = parse_prefixed_id(pane_word, b'%')?;
                Some(Notification::Output { pane, data })
            }
            b"%session-changed" => {
                let (id_word, name) = split_word(rest);
                let id = parse_prefixed_id(id_word, b'$')?;
                Some(Notification::SessionChanged {
                    id,
                    name: std::str::from_utf8(name).ok()?,
                })
            }
            b"%sessions-changed" => Some(Notification::SessionsChanged),
            b"%window-add" => {
                let (id_word, _) = split_word(rest);
                let id = parse_prefixed_id(id_word, b'@')?;
                Some(Notification::WindowAdd { id })
            }
            b"%window-renamed" => {
                let (id_word, name) = split_word(rest);
                let id = parse_prefixed_id(id_word, b'@')?;
                Some(Notification::WindowRenamed {
                    id,
                    name: std::str::from_utf8(name).ok()?,
                })
            }
            other => {
                debug!(
                    target: "tmux.client",
                    notification = %String::from_utf8_lossy(other),
                    "unknown notification"
                );
                None
            }
        }
    }

    /// A complete line arrived inside a `%begin` block.
    fn parse_block_line(&mut self) -> Option<Notification<'_>> {
        let (word, _) = split_word(&self.line);
        if word == b"%end" || word == b"%error" {
            let err = word == b"%error";
            self.line.clear();
            self.state = State::Idle;
            if err {
                warn!(
                    target: "tmux.client",
                    body = %String::from_utf8_lossy(&self.block),
                    "command block failed"
                );
                return Some(Notification::BlockErr(&self.block));
            }
            return Some(Notification::BlockEnd(&self.block));
        }
        // Ordinary block content: move the line into the block body.
        if self.block.len() + self.line.len() + 1 >= MAX_BUFFER {
            warn!(target: "tmux.client", cap = MAX_BUFFER, "block overflow; breaking stream");
            self.state = State::Broken;
            return Some(Notification::Exit);
        }
        self.block.extend_from_slice(&self.line);
        self.block.push(b'\n');
        self.line.clear();
        None
    }
}

/// Split off the first space-delimited word.
fn split_word(bytes: &[u8]) -> (&[u8], &[u8]) {
    match bytes.iter().position(|&b| b == b' ') {
        Some(i) => (&bytes[..i], &bytes[i + 1..]),
        None => (bytes, &[]),
    }
}

/// Parse `%42` / `$7` / `@3` style ids.
fn parse_prefixed_id(word: &[u8], prefix: u8) -> Option<u64> {
    let digits = word.strip_prefix(&[prefix])?;
    if digits.is_empty() {
        return None;
    }
    std::str::from_utf8(digits).ok()?.parse().ok()
}
