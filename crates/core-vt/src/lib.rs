//! VT protocol layer: byte stream in, typed handler callbacks out.
//!
//! Pipeline: bytes → [`utf8::Utf8Decoder`] and [`parser::Parser`] →
//! [`stream::Stream`] → your [`stream::Handler`] implementation. The parser
//! is a faithful DEC state machine; the stream translates its actions into
//! ~70 semantic callbacks (cursor movement, erase, SGR attributes, modes,
//! OSC commands, kitty keyboard, DCS/APC passthrough). Invalid or
//! unsupported sequences are logged and tolerated; the parser itself never
//! errors.

pub mod modes;
pub mod osc;
pub mod parser;
pub mod sgr;
pub mod stream;
pub mod utf8;

pub use modes::{ALL_MODES, Mode, ModeState};
pub use osc::{OscCommand, SemanticMark};
pub use parser::{Action, CsiParams, MAX_PARAMS, Parser};
pub use sgr::{Attribute, SgrIter};
pub use stream::{
    Charset, CharsetActive, CharsetSlot, CursorStyle, DeviceAttributeReq, DeviceStatusReq,
    DynamicColor, EraseDisplayMode, EraseLineMode, Handler, KittyKeyboardFlags, KittySetMode,
    ModifyKeyFormat, StatusDisplay, Stream, TabClearMode,
};
pub use utf8::{REPLACEMENT, Utf8Decoder, Utf8Step};

use thiserror::Error as ThisError;

/// Errors surfaced by [`stream::Stream::next`] and handler callbacks.
#[derive(Debug, ThisError)]
pub enum Error {
    /// Page or interned-storage allocation failed and could not be
    /// recovered by growing the page.
    #[error("terminal storage exhausted")]
    OutOfMemory,
    /// An I/O error from a handler writing to the response channel.
    #[error("handler I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T = ()> = std::result::Result<T, Error>;
