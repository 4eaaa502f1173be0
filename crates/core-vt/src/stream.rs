//! Byte stream front-end: UTF-8 decoding, the escape-sequence parser, and
//! dispatch of parser actions onto a [`Handler`].
//!
//! The [`Stream`] owns the decoder and parser; callers feed raw PTY bytes
//! and implement only the handler callbacks they care about — every method
//! has a default body that records a trace log and succeeds, so the
//! dispatcher stays uniform and unimplemented sequences are tolerated, not
//! errors.
//!
//! Ordering guarantee: all actions produced by byte N are delivered before
//! any action of byte N+1, and the callback sequence for a byte stream is
//! identical however the stream is chunked.

use crate::modes::Mode;
use crate::osc::{OscCommand, SemanticMark};
use crate::parser::{Action, CsiParams, Parser};
use crate::sgr::{Attribute, SgrIter};
use crate::utf8::Utf8Decoder;
use crate::Result;
use bitflags::bitflags;
use tracing::{trace, warn};

/// DECSCUSR cursor styles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorStyle {
    Default,
    BlinkingBlock,
    SteadyBlock,
    BlinkingUnderline,
    SteadyUnderline,
    BlinkingBar,
    SteadyBar,
}

impl CursorStyle {
    pub fn from_param(p: u16) -> Option<Self> {
        Some(match p {
            0 => Self::Default,
            1 => Self::BlinkingBlock,
            2 => Self::SteadyBlock,
            3 => Self::BlinkingUnderline,
            4 => Self::SteadyUnderline,
            5 => Self::BlinkingBar,
            6 => Self::SteadyBar,
            _ => return None,
        })
    }
}

/// Which device-attributes request arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceAttributeReq {
    Primary,
    Secondary,
    Tertiary,
}

/// Which status report was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatusReq {
    /// DSR 5.
    OperatingStatus,
    /// DSR 6 / DECXCPR.
    CursorPosition,
    /// DSR ?996.
    ColorScheme,
}

/// ED parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EraseDisplayMode {
    Below,
    Above,
    Complete,
    Scrollback,
}

/// EL parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EraseLineMode {
    Right,
    Left,
    Complete,
}

/// TBC parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabClearMode {
    Current,
    All,
}

/// G0–G3 charset slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharsetSlot {
    G0,
    G1,
    G2,
    G3,
}

/// Charsets this terminal can designate into a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Charset {
    Ascii,
    British,
    DecSpecialGraphics,
}

/// Which half of the character table an invocation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharsetActive {
    Gl,
    Gr,
}

bitflags! {
    /// Kitty keyboard protocol progressive-enhancement flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct KittyKeyboardFlags: u8 {
        const DISAMBIGUATE       = 1 << 0;
        const REPORT_EVENTS      = 1 << 1;
        const REPORT_ALTERNATES  = 1 << 2;
        const REPORT_ALL         = 1 << 3;
        const REPORT_TEXT        = 1 << 4;
    }
}

/// How `CSI = flags ; mode u` combines with the current flag set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KittySetMode {
    Set,
    Union,
    Difference,
}

/// modifyOtherKeys format (`CSI > 4 ; n m`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifyKeyFormat {
    Disabled,
    ExceptWellDefined,
    All,
}

/// DECSASD target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusDisplay {
    Main,
    StatusLine,
}

/// OSC 10/11/12 color slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DynamicColor {
    Foreground,
    Background,
    Cursor,
}

#[inline]
fn skipped(name: &'static str) {
    trace!(target: "vt.stream", handler = name, "unimplemented handler");
}

/// Terminal action callbacks. Implement what you need; defaults log and
/// succeed. Only I/O and allocation failures should produce errors.
#[allow(unused_variables)]
pub trait Handler {
    fn print(&mut self, c: char) -> Result {
        skipped("print");
        Ok(())
    }
    fn bell(&mut self) -> Result {
        skipped("bell");
        Ok(())
    }
    fn backspace(&mut self) -> Result {
        skipped("backspace");
        Ok(())
    }
    fn horizontal_tab(&mut self, n: u16) -> Result {
        skipped("horizontal_tab");
        Ok(())
    }
    fn horizontal_tab_back(&mut self, n: u16) -> Result {
        skipped("horizontal_tab_back");
        Ok(())
    }
    fn linefeed(&mut self) -> Result {
        skipped("linefeed");
        Ok(())
    }
    fn carriage_return(&mut self) -> Result {
        skipped("carriage_return");
        Ok(())
    }
    fn invoke_charset(
        &mut self,
        active: CharsetActive,
        slot: CharsetSlot,
        single_shift: bool,
    ) -> Result {
        skipped("invoke_charset");
        Ok(())
    }
    fn configure_charset(&mut self, slot: CharsetSlot, charset: Charset) -> Result {
        skipped("configure_charset");
        Ok(())
    }
    fn set_cursor_up(&mut self, n: u16) -> Result {
        skipped("set_cursor_up");
        Ok(())
    }
    fn set_cursor_down(&mut self, n: u16) -> Result {
        skipped("set_cursor_down");
        Ok(())
    }
    fn set_cursor_right(&mut self, n: u16) -> Result {
        skipped("set_cursor_right");
        Ok(())
    }
    fn set_cursor_left(&mut self, n: u16) -> Result {
        skipped("set_cursor_left");
        Ok(())
    }
    /// 1-based column.
    fn set_cursor_col(&mut self, col: u16) -> Result {
        skipped("set_cursor_col");
        Ok(())
    }
    /// 1-based row.
    fn set_cursor_row(&mut self, row: u16) -> Result {
        skipped("set_cursor_row");
        Ok(())
    }
    /// 1-based row and column.
    fn set_cursor_pos(&mut self, row: u16, col: u16) -> Result {
        skipped("set_cursor_pos");
        Ok(())
    }
    fn erase_display(&mut self, mode: EraseDisplayMode, selective: bool) -> Result {
        skipped("erase_display");
        Ok(())
    }
    fn erase_line(&mut self, mode: EraseLineMode, selective: bool) -> Result {
        skipped("erase_line");
        Ok(())
    }
    fn insert_lines(&mut self, n: u16) -> Result {
        skipped("insert_lines");
        Ok(())
    }
    fn delete_lines(&mut self, n: u16) -> Result {
        skipped("delete_lines");
        Ok(())
    }
    fn insert_blanks(&mut self, n: u16) -> Result {
        skipped("insert_blanks");
        Ok(())
    }
    fn delete_chars(&mut self, n: u16) -> Result {
        skipped("delete_chars");
        Ok(())
    }
    fn erase_chars(&mut self, n: u16) -> Result {
        skipped("erase_chars");
        Ok(())
    }
    fn scroll_up(&mut self, n: u16) -> Result {
        skipped("scroll_up");
        Ok(())
    }
    fn scroll_down(&mut self, n: u16) -> Result {
        skipped("scroll_down");
        Ok(())
    }
    fn print_repeat(&mut self, n: u16) -> Result {
        skipped("print_repeat");
        Ok(())
    }
    fn device_attributes(&mut self, req: DeviceAttributeReq, params: &[u16]) -> Result {
        skipped("device_attributes");
        Ok(())
    }
    fn device_status_report(&mut self, req: DeviceStatusReq) -> Result {
        skipped("device_status_report");
        Ok(())
    }
    fn tab_set(&mut self) -> Result {
        skipped("tab_set");
        Ok(())
    }
    fn tab_clear(&mut self, which: TabClearMode) -> Result {
        skipped("tab_clear");
        Ok(())
    }
    /// DECST8C: reset stops to every 8 columns.
    fn tab_reset(&mut self) -> Result {
        skipped("tab_reset");
        Ok(())
    }
    fn set_mode(&mut self, mode: Mode, enabled: bool) -> Result {
        skipped("set_mode");
        Ok(())
    }
    fn save_mode(&mut self, mode: Mode) -> Result {
        skipped("save_mode");
        Ok(())
    }
    fn restore_mode(&mut self, mode: Mode) -> Result {
        skipped("restore_mode");
        Ok(())
    }
    fn set_attribute(&mut self, attr: Attribute) -> Result {
        skipped("set_attribute");
        Ok(())
    }
    fn set_cursor_style(&mut self, style: CursorStyle) -> Result {
        skipped("set_cursor_style");
        Ok(())
    }
    fn set_top_and_bottom_margin(&mut self, top: u16, bottom: u16) -> Result {
        skipped("set_top_and_bottom_margin");
        Ok(())
    }
    fn set_left_and_right_margin(&mut self, left: u16, right: u16) -> Result {
        skipped("set_left_and_right_margin");
        Ok(())
    }
    fn set_active_status_display(&mut self, target: StatusDisplay) -> Result {
        skipped("set_active_status_display");
        Ok(())
    }
    fn save_cursor(&mut self) -> Result {
        skipped("save_cursor");
        Ok(())
    }
    fn restore_cursor(&mut self) -> Result {
        skipped("restore_cursor");
        Ok(())
    }
    fn index(&mut self) -> Result {
        skipped("index");
        Ok(())
    }
    fn next_line(&mut self) -> Result {
        skipped("next_line");
        Ok(())
    }
    fn reverse_index(&mut self) -> Result {
        skipped("reverse_index");
        Ok(())
    }
    fn full_reset(&mut self) -> Result {
        skipped("full_reset");
        Ok(())
    }
    /// DECSTR.
    fn soft_reset(&mut self) -> Result {
        skipped("soft_reset");
        Ok(())
    }
    fn decaln(&mut self) -> Result {
        skipped("decaln");
        Ok(())
    }
    /// SPA/EPA and DECSCA.
    fn set_protected_mode(&mut self, protected: bool) -> Result {
        skipped("set_protected_mode");
        Ok(())
    }

    // OSC callbacks.
    fn set_title(&mut self, title: &str) -> Result {
        skipped("set_title");
        Ok(())
    }
    fn set_icon_name(&mut self, name: &str) -> Result {
        skipped("set_icon_name");
        Ok(())
    }
    fn set_mouse_shape(&mut self, shape: &str) -> Result {
        skipped("set_mouse_shape");
        Ok(())
    }
    fn clipboard_contents(&mut self, kind: char, payload: &str) -> Result {
        skipped("clipboard_contents");
        Ok(())
    }
    fn semantic_prompt(&mut self, mark: SemanticMark) -> Result {
        skipped("semantic_prompt");
        Ok(())
    }
    fn report_pwd(&mut self, url: &str) -> Result {
        skipped("report_pwd");
        Ok(())
    }
    fn hyperlink_start(&mut self, id: Option<&str>, uri: &str) -> Result {
        skipped("hyperlink_start");
        Ok(())
    }
    fn hyperlink_end(&mut self) -> Result {
        skipped("hyperlink_end");
        Ok(())
    }
    fn set_palette_color(&mut self, index: u8, spec: &str) -> Result {
        skipped("set_palette_color");
        Ok(())
    }
    fn report_palette_color(&mut self, index: u8) -> Result {
        skipped("report_palette_color");
        Ok(())
    }
    fn reset_palette_color(&mut self, indexes: &[u8]) -> Result {
        skipped("reset_palette_color");
        Ok(())
    }
    fn set_dynamic_color(&mut self, kind: DynamicColor, spec: &str) -> Result {
        skipped("set_dynamic_color");
        Ok(())
    }
    fn report_dynamic_color(&mut self, kind: DynamicColor) -> Result {
        skipped("report_dynamic_color");
        Ok(())
    }
    fn reset_dynamic_color(&mut self, kind: DynamicColor) -> Result {
        skipped("reset_dynamic_color");
        Ok(())
    }

    // Kitty keyboard protocol.
    fn kitty_keyboard_push(&mut self, flags: KittyKeyboardFlags) -> Result {
        skipped("kitty_keyboard_push");
        Ok(())
    }
    fn kitty_keyboard_pop(&mut self, n: u16) -> Result {
        skipped("kitty_keyboard_pop");
        Ok(())
    }
    fn kitty_keyboard_set(&mut self, flags: KittyKeyboardFlags, mode: KittySetMode) -> Result {
        skipped("kitty_keyboard_set");
        Ok(())
    }
    fn kitty_keyboard_query(&mut self) -> Result {
        skipped("kitty_keyboard_query");
        Ok(())
    }
    fn set_modify_key_format(&mut self, format: ModifyKeyFormat) -> Result {
        skipped("set_modify_key_format");
        Ok(())
    }
    fn query_modify_key_format(&mut self) -> Result {
        skipped("query_modify_key_format");
        Ok(())
    }

    // DCS / APC passthrough.
    fn dcs_hook(&mut self, params: &CsiParams) -> Result {
        skipped("dcs_hook");
        Ok(())
    }
    fn dcs_put(&mut self, byte: u8) -> Result {
        skipped("dcs_put");
        Ok(())
    }
    fn dcs_unhook(&mut self) -> Result {
        skipped("dcs_unhook");
        Ok(())
    }
    fn apc_start(&mut self) -> Result {
        skipped("apc_start");
        Ok(())
    }
    fn apc_put(&mut self, byte: u8) -> Result {
        skipped("apc_put");
        Ok(())
    }
    fn apc_end(&mut self) -> Result {
        skipped("apc_end");
        Ok(())
    }
}

/// The byte-stream processor: UTF-8 decoder + parser + dispatch.
#[derive(Debug)]
pub struct Stream<H: Handler> {
    pub handler: H,
    parser: Parser,
    utf8: Utf8Decoder,
}

impl<H: Handler> Stream<H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            parser: Parser::new(),
            utf8: Utf8Decoder::new(),
        }
    }

    pub fn into_handler(self) -> H {
        self.handler
    }

    /// Process one input byte.
    pub fn next(&mut self, byte: u8) -> Result {
        // In ground state, printable data flows through the UTF-8 decoder;
        // escape sequences and controls go to the parser. Outside ground,
        // the parser owns every byte (string payloads included).
        if self.parser.in_ground() && (self.utf8.in_progress() || byte >= 0x80) {
            let step = self.utf8.next(byte);
            if let Some(cp) = step.codepoint {
                self.handler.print(cp)?;
            }
            if step.consumed {
                return Ok(());
            }
            if byte >= 0x80 {
                // The byte broke a sequence; retried, it starts a new one.
                let step = self.utf8.next(byte);
                if let Some(cp) = step.codepoint {
                    self.handler.print(cp)?;
                }
                debug_assert!(step.consumed);
                return Ok(());
            }
            // An ASCII byte broke the sequence: fall through and treat it
            // normally.
        }
        if self.parser.in_ground() && (0x20..0x7F).contains(&byte) {
            return self.handler.print(byte as char);
        }
        let actions = self.parser.next(byte);
        for action in actions.into_iter().flatten() {
            self.dispatch(action)?;
        }
        Ok(())
    }

    /// Process a whole buffer.
    pub fn next_slice(&mut self, bytes: &[u8]) -> Result {
        for &b in bytes {
            self.next(b)?;
        }
        Ok(())
    }

    fn dispatch(&mut self, action: Action) -> Result {
        match action {
            Action::Print(c) => self.handler.print(c),
            Action::Execute(b) => self.execute(b),
            Action::CsiDispatch(csi) => self.csi_dispatch(&csi),
            Action::EscDispatch {
                intermediates,
                intermediates_len,
                final_byte,
            } => self.esc_dispatch(&intermediates[..intermediates_len as usize], final_byte),
            Action::OscDispatch(cmd) => self.osc_dispatch(cmd),
            Action::DcsHook(params) => self.handler.dcs_hook(&params),
            Action::DcsPut(b) => self.handler.dcs_put(b),
            Action::DcsUnhook => self.handler.dcs_unhook(),
            Action::ApcStart => self.handler.apc_start(),
            Action::ApcPut(b) => self.handler.apc_put(b),
            Action::ApcEnd => self.handler.apc_end(),
        }
    }

    fn execute(&mut self, byte: u8) -> Result {
        match byte {
            0x07 => self.handler.bell(),
            0x08 => self.handler.backspace(),
            0x09 => self.handler.horizontal_tab(1),
            0x0A | 0x0B | 0x0C => self.handler.linefeed(),
            0x0D => self.handler.carriage_return(),
            // SO / SI: locking shifts of G1 / G0.
            0x0E => self
                .handler
                .invoke_charset(CharsetActive::Gl, CharsetSlot::G1, false),
            0x0F => self
                .handler
                .invoke_charset(CharsetActive::Gl, CharsetSlot::G0, false),
            _ => {
                trace!(target: "vt.stream", byte, "ignored C0 control");
                Ok(())
            }
        }
    }

    fn csi_dispatch(&mut self, csi: &CsiParams) -> Result {
        let h = &mut self.handler;
        let marker = csi.private_marker();
        let intermediate = csi.intermediates().next();

        match (csi.final_byte, marker, intermediate) {
            (b'@', None, None) => h.insert_blanks(csi.param(0, 1)),
            (b'A', None, None) => h.set_cursor_up(csi.param(0, 1)),
            (b'B', None, None) | (b'e', None, None) => h.set_cursor_down(csi.param(0, 1)),
            (b'C', None, None) | (b'a', None, None) => h.set_cursor_right(csi.param(0, 1)),
            (b'D', None, None) => h.set_cursor_left(csi.param(0, 1)),
            (b'E', None, None) => {
                h.set_cursor_down(csi.param(0, 1))?;
                h.set_cursor_col(1)
            }
            (b'F', None, None) => {
                h.set_cursor_up(csi.param(0, 1))?;
                h.set_cursor_col(1)
            }
            (b'G', None, None) | (b'`', None, None) => h.set_cursor_col(csi.param(0, 1)),
            (b'H', None, None) | (b'f', None, None) => {
                h.set_cursor_pos(csi.param(0, 1), csi.param(1, 1))
            }
            (b'I', None, None) => h.horizontal_tab(csi.param(0, 1)),
            (b'J', m @ (None | Some(b'?')), None) => {
                let mode = match csi.param_raw(0).unwrap_or(0) {
                    0 => EraseDisplayMode::Below,
                    1 => EraseDisplayMode::Above,
                    2 => EraseDisplayMode::Complete,
                    3 => EraseDisplayMode::Scrollback,
                    other => {
                        warn!(target: "vt.stream", param = other, "invalid ED parameter");
                        return Ok(());
                    }
                };
                h.erase_display(mode, m.is_some())
            }
            (b'K', m @ (None | Some(b'?')), None) => {
                let mode = match csi.param_raw(0).unwrap_or(0) {
                    0 => EraseLineMode::Right,
                    1 => EraseLineMode::Left,
                    2 => EraseLineMode::Complete,
                    other => {
                        warn!(target: "vt.stream", param = other, "invalid EL parameter");
                        return Ok(());
                    }
                };
                h.erase_line(mode, m.is_some())
            }
            (b'L', None, None) => h.insert_lines(csi.param(0, 1)),
            (b'M', None, None) => h.delete_lines(csi.param(0, 1)),
            (b'P', None, None) => h.delete_chars(csi.param(0, 1)),
            (b'S', None, None) => h.scroll_up(csi.param(0, 1)),
            (b'T', None, None) => h.scroll_down(csi.param(0, 1)),
            (b'W', Some(b'?'), None) if csi.param_raw(0) == Some(5) => h.tab_reset(),
            (b'X', None, None) => h.erase_chars(csi.param(0, 1)),
            (b'Z', None, None) => h.horizontal_tab_back(csi.param(0, 1)),
            (b'b', None, None) => h.print_repeat(csi.param(0, 1)),
            (b'c', None, None) => h.device_attributes(DeviceAttributeReq::Primary, csi.params()),
            (b'c', Some(b'>'), None) => {
                h.device_attributes(DeviceAttributeReq::Secondary, csi.params())
            }
            (b'c', Some(b'='), None) => {
                h.device_attributes(DeviceAttributeReq::Tertiary, csi.params())
            }
            (b'd', None, None) => h.set_cursor_row(csi.param(0, 1)),
            (b'g', None, None) => match csi.param_raw(0).unwrap_or(0) {
                0 => h.tab_clear(TabClearMode::Current),
                3 => h.tab_clear(TabClearMode::All),
                other => {
                    warn!(target: "vt.stream", param = other, "invalid TBC parameter");
                    Ok(())
                }
            },
            (b'h', m @ (None | Some(b'?')), None) => {
                Self::set_modes(h, csi, m.is_none(), true)
            }
            (b'l', m @ (None | Some(b'?')), None) => {
                Self::set_modes(h, csi, m.is_none(), false)
            }
            (b'm', None, None) => {
                for attr in SgrIter::new(csi) {
                    h.set_attribute(attr)?;
                }
                Ok(())
            }
            (b'm', Some(b'>'), None) => {
                if csi.param_raw(0) == Some(4) {
                    let format = match csi.param_raw(1).unwrap_or(0) {
                        0 => ModifyKeyFormat::Disabled,
                        1 => ModifyKeyFormat::ExceptWellDefined,
                        2 => ModifyKeyFormat::All,
                        other => {
                            warn!(target: "vt.stream", param = other, "invalid modifyOtherKeys");
                            return Ok(());
                        }
                    };
                    h.set_modify_key_format(format)
                } else {
                    warn!(target: "vt.stream", params = ?csi.params(), "unhandled CSI > m");
                    Ok(())
                }
            }
            (b'm', Some(b'?'), None) if csi.param_raw(0) == Some(4) => h.query_modify_key_format(),
            (b'n', None, None) => match csi.param_raw(0).unwrap_or(0) {
                5 => h.device_status_report(DeviceStatusReq::OperatingStatus),
                6 => h.device_status_report(DeviceStatusReq::CursorPosition),
                other => {
                    warn!(target: "vt.stream", param = other, "unhandled DSR");
                    Ok(())
                }
            },
            (b'n', Some(b'?'), None) => match csi.param_raw(0).unwrap_or(0) {
                6 => h.device_status_report(DeviceStatusReq::CursorPosition),
                996 => h.device_status_report(DeviceStatusReq::ColorScheme),
                other => {
                    warn!(target: "vt.stream", param = other, "unhandled private DSR");
                    Ok(())
                }
            },
            (b'p', None, Some(b'!')) => h.soft_reset(),
            (b'q', None, Some(b' ')) => {
                match CursorStyle::from_param(csi.param_raw(0).unwrap_or(0)) {
                    Some(style) => h.set_cursor_style(style),
                    None => {
                        warn!(target: "vt.stream", params = ?csi.params(), "invalid DECSCUSR");
                        Ok(())
                    }
                }
            }
            (b'q', None, Some(b'"')) => match csi.param_raw(0).unwrap_or(0) {
                1 => h.set_protected_mode(true),
                0 | 2 => h.set_protected_mode(false),
                other => {
                    warn!(target: "vt.stream", param = other, "invalid DECSCA");
                    Ok(())
                }
            },
            (b'r', None, None) => {
                h.set_top_and_bottom_margin(csi.param_raw(0).unwrap_or(0), csi.param_raw(1).unwrap_or(0))
            }
            (b'r', Some(b'?'), None) => Self::per_mode(h, csi, |h, m| h.restore_mode(m)),
            (b's', Some(b'?'), None) => Self::per_mode(h, csi, |h, m| h.save_mode(m)),
            (b's', None, None) => {
                if csi.params().is_empty() {
                    h.save_cursor()
                } else {
                    h.set_left_and_right_margin(
                        csi.param_raw(0).unwrap_or(0),
                        csi.param_raw(1).unwrap_or(0),
                    )
                }
            }
            (b'u', None, None) => h.restore_cursor(),
            (b'u', Some(b'>'), None) => h.kitty_keyboard_push(KittyKeyboardFlags::from_bits_truncate(
                csi.param_raw(0).unwrap_or(0) as u8,
            )),
            (b'u', Some(b'<'), None) => h.kitty_keyboard_pop(csi.param(0, 1)),
            (b'u', Some(b'='), None) => {
                let flags =
                    KittyKeyboardFlags::from_bits_truncate(csi.param_raw(0).unwrap_or(0) as u8);
                let mode = match csi.param_raw(1).unwrap_or(1) {
                    1 => KittySetMode::Set,
                    2 => KittySetMode::Union,
                    3 => KittySetMode::Difference,
                    other => {
                        warn!(target: "vt.stream", param = other, "invalid kitty set mode");
                        return Ok(());
                    }
                };
                h.kitty_keyboard_set(flags, mode)
            }
            (b'u', Some(b'?'), None) => h.kitty_keyboard_query(),
            (b'}', None, Some(b'$')) => match csi.param_raw(0).unwrap_or(0) {
                0 => h.set_active_status_display(StatusDisplay::Main),
                1 => h.set_active_status_display(StatusDisplay::StatusLine),
                other => {
                    warn!(target: "vt.stream", param = other, "invalid DECSASD");
                    Ok(())
                }
            },
            _ => {
                warn!(
                    target: "vt.stream",
                    final_byte = csi.final_byte,
                    marker = ?marker.map(|m| m as char),
                    params = ?csi.params(),
                    "unimplemented CSI sequence"
                );
                Ok(())
            }
        }
    }

    fn set_modes(h: &mut H, csi: &CsiParams, ansi: bool, enabled: bool) -> Result {
        for &p in csi.params() {
            match Mode::from_tag(ansi, p) {
                Some(mode) => h.set_mode(mode, enabled)?,
                None => {
                    warn!(target: "vt.stream", number = p, ansi, "unrecognized mode");
                }
            }
        }
        Ok(())
    }

    fn per_mode(
        h: &mut H,
        csi: &CsiParams,
        mut f: impl FnMut(&mut H, Mode) -> Result,
    ) -> Result {
        for &p in csi.params() {
            match Mode::from_tag(false, p) {
                Some(mode) => f(h, mode)?,
                None => {
                    warn!(target: "vt.stream", number = p, "unrecognized private mode");
                }
            }
        }
        Ok(())
    }

    fn esc_dispatch(&mut self, intermediates: &[u8], final_byte: u8) -> Result {
        let h = &mut self.handler;
        match (intermediates.first().copied(), final_byte) {
            (None, b'7') => h.save_cursor(),
            (None, b'8') => h.restore_cursor(),
            (Some(b'#'), b'8') => h.decaln(),
            (None, b'D') => h.index(),
            (None, b'E') => h.next_line(),
            (None, b'H') => h.tab_set(),
            (None, b'M') => h.reverse_index(),
            (None, b'N') => h.invoke_charset(CharsetActive::Gl, CharsetSlot::G2, true),
            (None, b'O') => h.invoke_charset(CharsetActive::Gl, CharsetSlot::G3, true),
            (None, b'n') => h.invoke_charset(CharsetActive::Gl, CharsetSlot::G2, false),
            (None, b'o') => h.invoke_charset(CharsetActive::Gl, CharsetSlot::G3, false),
            (None, b'V') => h.set_protected_mode(true),
            (None, b'W') => h.set_protected_mode(false),
            (None, b'c') => h.full_reset(),
            (None, b'=') => h.set_mode(Mode::KeypadKeys, true),
            (None, b'>') => h.set_mode(Mode::KeypadKeys, false),
            // The second half of ST; the payload already dispatched.
            (None, b'\\') => Ok(()),
            (Some(slot @ (b'(' | b')' | b'*' | b'+')), f) => {
                let slot = match slot {
                    b'(' => CharsetSlot::G0,
                    b')' => CharsetSlot::G1,
                    b'*' => CharsetSlot::G2,
                    _ => CharsetSlot::G3,
                };
                let charset = match f {
                    b'B' => Charset::Ascii,
                    b'A' => Charset::British,
                    b'0' => Charset::DecSpecialGraphics,
                    other => {
                        warn!(target: "vt.stream", charset = other, "unrecognized charset");
                        return Ok(());
                    }
                };
                h.configure_charset(slot, charset)
            }
            _ => {
                warn!(target: "vt.stream", final_byte, "unimplemented ESC sequence");
                Ok(())
            }
        }
    }

    fn osc_dispatch(&mut self, cmd: OscCommand) -> Result {
        let h = &mut self.handler;
        match cmd {
            OscCommand::ChangeWindowTitle(t) => h.set_title(&t),
            OscCommand::ChangeWindowIcon(t) => h.set_icon_name(&t),
            OscCommand::Palette { set, report } => {
                for (idx, spec) in set {
                    h.set_palette_color(idx, &spec)?;
                }
                for idx in report {
                    h.report_palette_color(idx)?;
                }
                Ok(())
            }
            OscCommand::ResetPalette(indexes) => h.reset_palette_color(&indexes),
            OscCommand::SetForeground(s) => h.set_dynamic_color(DynamicColor::Foreground, &s),
            OscCommand::SetBackground(s) => h.set_dynamic_color(DynamicColor::Background, &s),
            OscCommand::SetCursorColor(s) => h.set_dynamic_color(DynamicColor::Cursor, &s),
            OscCommand::ReportForeground => h.report_dynamic_color(DynamicColor::Foreground),
            OscCommand::ReportBackground => h.report_dynamic_color(DynamicColor::Background),
            OscCommand::ReportCursorColor => h.report_dynamic_color(DynamicColor::Cursor),
            OscCommand::ResetForeground => h.reset_dynamic_color(DynamicColor::Foreground),
            OscCommand::ResetBackground => h.reset_dynamic_color(DynamicColor::Background),
            OscCommand::ResetCursorColor => h.reset_dynamic_color(DynamicColor::Cursor),
            OscCommand::ReportPwd(url) => h.report_pwd(&url),
            OscCommand::HyperlinkStart { id, uri } => h.hyperlink_start(id.as_deref(), &uri),
            OscCommand::HyperlinkEnd => h.hyperlink_end(),
            OscCommand::Clipboard { kind, payload } => h.clipboard_contents(kind, &payload),
            OscCommand::SemanticPrompt(mark) => h.semantic_prompt(mark),
            OscCommand::MouseShape(shape) => h.set_mouse_shape(&shape),
            OscCommand::Unknown(payload) => {
                warn!(target: "vt.stream", payload = %payload, "unimplemented OSC command");
                Ok(())
            }
        }
    }
}
