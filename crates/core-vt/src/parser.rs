//! DEC-compliant escape sequence state machine.
//!
//! Classic Williams DFA over the states {ground, escape,
//! escape_intermediate, csi_entry, csi_param, csi_intermediate, csi_ignore,
//! dcs_*, osc_string, sos/pm/apc strings}. Each input byte yields zero or
//! more typed [`Action`]s (at most three: a string terminator can finish a
//! payload, dispatch it, and re-enter escape handling).
//!
//! Deviations from the museum DFA, matching modern terminals:
//! * `:` inside CSI parameters is accepted and recorded as a sub-parameter
//!   separator instead of poisoning the sequence (SGR underline styles and
//!   direct color depend on it).
//! * APC strings are surfaced byte-wise (`ApcStart`/`ApcPut`/`ApcEnd`) so a
//!   higher layer can feed a graphics-protocol parser.
//!
//! Parameter parsing saturates at `u16::MAX` and caps at 16 parameters;
//! excess parameters are dropped and the dispatch is flagged truncated.

use crate::osc::{OscCommand, OscParser};

/// Ceiling on recorded CSI/DCS parameters.
pub const MAX_PARAMS: usize = 16;
/// Ceiling on recorded intermediate bytes (including private markers).
pub const MAX_INTERMEDIATES: usize = 2;

/// Parameters and identifying bytes of a CSI or DCS dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsiParams {
    pub params: [u16; MAX_PARAMS],
    pub len: u8,
    /// Bit `i` set: the separator *after* `params[i]` was a colon, making
    /// `params[i + 1]` a sub-parameter.
    pub colon_after: u16,
    pub intermediates: [u8; MAX_INTERMEDIATES],
    pub intermediates_len: u8,
    pub final_byte: u8,
    /// More than [`MAX_PARAMS`] parameters arrived; the excess was dropped.
    pub truncated: bool,
}

impl Default for CsiParams {
    fn default() -> Self {
        Self {
            params: [0; MAX_PARAMS],
            len: 0,
            colon_after: 0,
            intermediates: [0; MAX_INTERMEDIATES],
            intermediates_len: 0,
            final_byte: 0,
            truncated: false,
        }
    }
}

impl CsiParams {
    pub fn params(&self) -> &[u16] {
        &self.params[..self.len as usize]
    }

    /// First parameter, defaulted (0 is mapped to `default`, as almost all
    /// CSI sequences require).
    pub fn param(&self, i: usize, default: u16) -> u16 {
        match self.params().get(i) {
            Some(&0) | None => default,
            Some(&v) => v,
        }
    }

    /// Raw parameter without defaulting.
    pub fn param_raw(&self, i: usize) -> Option<u16> {
        self.params().get(i).copied()
    }

    /// Whether the separator after `params[i]` was a colon.
    pub fn colon_after(&self, i: usize) -> bool {
        i < MAX_PARAMS && self.colon_after & (1 << i) != 0
    }

    /// Whether any separator was a colon (SGR sub-parameter form).
    pub fn any_colon(&self) -> bool {
        self.colon_after != 0
    }

    /// The private-marker byte (`?`, `>`, `<`, `=`), if one led the
    /// sequence.
    pub fn private_marker(&self) -> Option<u8> {
        self.intermediates[..self.intermediates_len as usize]
            .iter()
            .copied()
            .find(|b| (0x3C..=0x3F).contains(b))
    }

    /// Intermediate bytes proper (0x20–0x2F), excluding private markers.
    pub fn intermediates(&self) -> impl Iterator<Item = u8> + '_ {
        self.intermediates[..self.intermediates_len as usize]
            .iter()
            .copied()
            .filter(|b| (0x20..=0x2F).contains(b))
    }
}

/// A decoded terminal action.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Print(char),
    Execute(u8),
    CsiDispatch(CsiParams),
    EscDispatch {
        intermediates: [u8; MAX_INTERMEDIATES],
        intermediates_len: u8,
        final_byte: u8,
    },
    OscDispatch(OscCommand),
    DcsHook(CsiParams),
    DcsPut(u8),
    DcsUnhook,
    ApcStart,
    ApcPut(u8),
    ApcEnd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Ground,
    Escape,
    EscapeIntermediate,
    CsiEntry,
    CsiParam,
    CsiIntermediate,
    CsiIgnore,
    DcsEntry,
    DcsParam,
    DcsIntermediate,
    DcsPassthrough,
    DcsIgnore,
    OscString,
    SosPmString,
    ApcString,
}

/// Up to three actions can fall out of a single byte.
pub type Actions = [Option<Action>; 3];

fn one(a: Action) -> Actions {
    [Some(a), None, None]
}

fn none() -> Actions {
    [None, None, None]
}

/// The escape-sequence state machine.
#[derive(Debug)]
pub struct Parser {
    state: State,
    intermediates: [u8; MAX_INTERMEDIATES],
    intermediates_len: u8,
    params: [u16; MAX_PARAMS],
    params_len: u8,
    colon_after: u16,
    param_acc: u16,
    param_acc_set: bool,
    params_truncated: bool,
    osc: OscParser,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    pub fn new() -> Self {
        Self {
            state: State::Ground,
            intermediates: [0; MAX_INTERMEDIATES],
            intermediates_len: 0,
            params: [0; MAX_PARAMS],
            params_len: 0,
            colon_after: 0,
            param_acc: 0,
            param_acc_set: false,
            params_truncated: false,
            osc: OscParser::default(),
        }
    }

    /// Whether the parser sits in ground state (printable fast path is
    /// safe).
    pub fn in_ground(&self) -> bool {
        self.state == State::Ground
    }

    /// Feed one byte; returns the actions it produced, in order.
    pub fn next(&mut self, byte: u8) -> Actions {
        // CAN and SUB abort any sequence from any state; ESC restarts one
        // (terminating strings first).
        match byte {
            0x18 | 0x1A => {
                let abort = self.abort_string();
                self.state = State::Ground;
                return match abort {
                    Some(a) => [Some(a), Some(Action::Execute(byte)), None],
                    None => one(Action::Execute(byte)),
                };
            }
            0x1B => {
                let finish = self.finish_string();
                self.clear();
                self.state = State::Escape;
                return match finish {
                    Some(a) => one(a),
                    None => none(),
                };
            }
            _ => {}
        }

        match self.state {
            State::Ground => self.ground(byte),
            State::Escape => self.escape(byte),
            State::EscapeIntermediate => self.escape_intermediate(byte),
            State::CsiEntry => self.csi_entry(byte),
            State::CsiParam => self.csi_param(byte),
            State::CsiIntermediate => self.csi_intermediate(byte),
            State::CsiIgnore => self.csi_ignore(byte),
            State::DcsEntry => self.dcs_entry(byte),
            State::DcsParam => self.dcs_param(byte),
            State::DcsIntermediate => self.dcs_intermediate(byte),
            State::DcsPassthrough => self.dcs_passthrough(byte),
            State::DcsIgnore => none(),
            State::OscString => self.osc_string(byte),
            State::SosPmString => none(),
            State::ApcString => one(Action::ApcPut(byte)),
        }
    }

    fn clear(&mut self) {
        self.intermediates_len = 0;
        self.params_len = 0;
        self.colon_after = 0;
        self.param_acc = 0;
        self.param_acc_set = false;
        self.params_truncated = false;
    }

    /// Terminate an in-flight string payload because of ESC (usually the
    /// first half of ST).
    fn finish_string(&mut self) -> Option<Action> {
        match self.state {
            State::OscString => Some(Action::OscDispatch(self.osc.end())),
            State::DcsPassthrough => Some(Action::DcsUnhook),
            State::ApcString => Some(Action::ApcEnd),
            _ => None,
        }
    }

    /// Abandon an in-flight string payload (CAN/SUB).
    fn abort_string(&mut self) -> Option<Action> {
        match self.state {
            State::DcsPassthrough => Some(Action::DcsUnhook),
            State::ApcString => Some(Action::ApcEnd),
            _ => None,
        }
    }

    fn collect(&mut self, byte: u8) {
        if (self.intermediates_len as usize) < MAX_INTERMEDIATES {
            self.intermediates[self.intermediates_len as usize] = byte;
            self.intermediates_len += 1;
        }
    }

    fn param_digit(&mut self, byte: u8) {
        let d = (byte - b'0') as u16;
        self.param_acc = self
            .param_acc
            .saturating_mul(10)
            .saturating_add(d);
        self.param_acc_set = true;
    }

    fn param_separator(&mut self, colon: bool) {
        if (self.params_len as usize) >= MAX_PARAMS {
            self.params_truncated = true;
        } else {
            if colon {
                self.colon_after |= 1 << self.params_len;
            }
            self.params[self.params_len as usize] = self.param_acc;
            self.params_len += 1;
        }
        self.param_acc = 0;
        self.param_acc_set = false;
    }

    fn finish_params(&mut self) {
        if self.param_acc_set || self.params_len > 0 {
            if (self.params_len as usize) >= MAX_PARAMS {
                self.params_truncated = true;
            } else {
                self.params[self.params_len as usize] = self.param_acc;
                self.params_len += 1;
            }
        }
        self.param_acc = 0;
        self.param_acc_set = false;
    }

    fn take_csi(&mut self, final_byte: u8) -> CsiParams {
        self.finish_params();
        CsiParams {
            params: self.params,
            len: self.params_len,
            colon_after: self.colon_after,
            intermediates: self.intermediates,
            intermediates_len: self.intermediates_len,
            final_byte,
            truncated: self.params_truncated,
        }
    }

    fn is_executable(byte: u8) -> bool {
        byte <= 0x17 || byte == 0x19 || (0x1C..=0x1F).contains(&byte)
    }

    fn ground(&mut self, byte: u8) -> Actions {
        if Self::is_executable(byte) {
            one(Action::Execute(byte))
        } else if byte == 0x7F {
            none()
        } else {
            // The stream layer routes multi-byte UTF-8 around the parser;
            // anything arriving here prints as-is.
            one(Action::Print(byte as char))
        }
    }

    fn escape(&mut self, byte: u8) -> Actions {
        match byte {
            b if Self::is_executable(b) => one(Action::Execute(b)),
            0x20..=0x2F => {
                self.clear();
                self.collect(byte);
                self.state = State::EscapeIntermediate;
                none()
            }
            b'[' => {
                self.clear();
                self.state = State::CsiEntry;
                none()
            }
            b']' => {
                self.osc.start();
                self.state = State::OscString;
                none()
            }
            b'P' => {
                self.clear();
                self.state = State::DcsEntry;
                none()
            }
            b'X' | b'^' => {
                self.state = State::SosPmString;
                none()
            }
            b'_' => {
                self.state = State::ApcString;
                one(Action::ApcStart)
            }
            0x30..=0x7E => {
                self.state = State::Ground;
                one(Action::EscDispatch {
                    intermediates: [0; MAX_INTERMEDIATES],
                    intermediates_len: 0,
                    final_byte: byte,
                })
            }
            _ => none(),
        }
    }

    fn escape_intermediate(&mut self, byte: u8) -> Actions {
        match byte {
            b if Self::is_executable(b) => one(Action::Execute(b)),
            0x20..=0x2F => {
                self.collect(byte);
                none()
            }
            0x30..=0x7E => {
                let action = Action::EscDispatch {
                    intermediates: self.intermediates,
                    intermediates_len: self.intermediates_len,
                    final_byte: byte,
                };
                self.state = State::Ground;
                one(action)
            }
            _ => none(),
        }
    }

    fn csi_entry(&mut self, byte: u8) -> Actions {
        match byte {
            b if Self::is_executable(b) => one(Action::Execute(b)),
            0x20..=0x2F => {
                self.collect(byte);
                self.state = State::CsiIntermediate;
                none()
            }
            b'0'..=b'9' => {
                self.param_digit(byte);
                self.state = State::CsiParam;
                none()
            }
            b';' => {
                self.param_separator(false);
                self.state = State::CsiParam;
                none()
            }
            b':' => {
                self.param_separator(true);
                self.state = State::CsiParam;
                none()
            }
            0x3C..=0x3F => {
                self.collect(byte);
                self.state = State::CsiParam;
                none()
            }
            0x40..=0x7E => {
                let csi = self.take_csi(byte);
                self.state = State::Ground;
                one(Action::CsiDispatch(csi))
            }
            _ => none(),
        }
    }

    fn csi_param(&mut self, byte: u8) -> Actions {
        match byte {
            b if Self::is_executable(b) => one(Action::Execute(b)),
            b'0'..=b'9' => {
                self.param_digit(byte);
                none()
            }
            b';' => {
                self.param_separator(false);
                none()
            }
            b':' => {
                self.param_separator(true);
                none()
            }
            0x20..=0x2F => {
                self.finish_params();
                self.collect(byte);
                self.state = State::CsiIntermediate;
                none()
            }
            0x3C..=0x3F => {
                self.state = State::CsiIgnore;
                none()
            }
            0x40..=0x7E => {
                let csi = self.take_csi(byte);
                self.state = State::Ground;
                one(Action::CsiDispatch(csi))
            }
            _ => none(),
        }
    }

    fn csi_intermediate(&mut self, byte: u8) -> Actions {
        match byte {
            b if Self::is_executable(b) => one(Action::Execute(b)),
            0x20..=0x2F => {
                self.collect(byte);
                none()
            }
            0x30..=0x3F => {
                self.state = State::CsiIgnore;
                none()
            }
            0x40..=0x7E => {
                let csi = self.take_csi(byte);
                self.state = State::Ground;
                one(Action::CsiDispatch(csi))
            }
            _ => none(),
        }
    }

    fn csi_ignore(&mut self, byte: u8) -> Actions {
        match byte {
            b if Self::is_executable(b) => one(Action::Execute(b)),
            0x40..=0x7E => {
                self.state = State::Ground;
                none()
            }
            _ => none(),
        }
    }

    fn dcs_entry(&mut self, byte: u8) -> Actions {
        match byte {
            0x20..=0x2F => {
                self.collect(byte);
                self.state = State::DcsIntermediate;
                none()
            }
            b'0'..=b'9' => {
                self.param_digit(byte);
                self.state = State::DcsParam;
                none()
            }
            b';' => {
                self.param_separator(false);
                self.state = State::DcsParam;
                none()
            }
            b':' => {
                self.state = State::DcsIgnore;
                none()
            }
            0x3C..=0x3F => {
                self.collect(byte);
                self.state = State::DcsParam;
                none()
            }
            0x40..=0x7E => self.dcs_hook(byte),
            _ => none(),
        }
    }

    fn dcs_param(&mut self, byte: u8) -> Actions {
        match byte {
            b'0'..=b'9' => {
                self.param_digit(byte);
                none()
            }
            b';' => {
                self.param_separator(false);
                none()
            }
            b':' | 0x3C..=0x3F => {
                self.state = State::DcsIgnore;
                none()
            }
            0x20..=0x2F => {
                self.finish_params();
                self.collect(byte);
                self.state = State::DcsIntermediate;
                none()
            }
            0x40..=0x7E => self.dcs_hook(byte),
            _ => none(),
        }
    }

    fn dcs_intermediate(&mut self, byte: u8) -> Actions {
        match byte {
            0x20..=0x2F => {
                self.collect(byte);
                none()
            }
            0x30..=0x3F => {
                self.state = State::DcsIgnore;
                none()
            }
            0x40..=0x7E => self.dcs_hook(byte),
            _ => none(),
        }
    }

    fn dcs_hook(&mut self, final_byte: u8) -> Actions {
        let csi = self.take_csi(final_byte);
        self.state = State::DcsPassthrough;
        one(Action::DcsHook(csi))
    }

    fn dcs_passthrough(&mut self, byte: u8) -> Actions {
        match byte {
            0x00..=0x7E => one(Action::DcsPut(byte)),
            _ => none(),
        }
    }

    fn osc_string(&mut self, byte: u8) -> Actions {
        match byte {
            0x07 => {
                let cmd = self.osc.end();
                self.state = State::Ground;
                one(Action::OscDispatch(cmd))
            }
            0x20..=0xFF => {
                self.osc.put(byte);
                none()
            }
            _ => none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(parser: &mut Parser, bytes: &[u8]) -> Vec<Action> {
        let mut out = Vec::new();
        for &b in bytes {
            for a in parser.next(b).into_iter().flatten() {
                out.push(a);
            }
        }
        out
    }

    fn csi_of(actions: &[Action]) -> &CsiParams {
        actions
            .iter()
            .find_map(|a| match a {
                Action::CsiDispatch(c) => Some(c),
                _ => None,
            })
            .expect("csi dispatch")
    }

    #[test]
    fn plain_print_and_execute() {
        let mut p = Parser::new();
        let actions = feed(&mut p, b"a\nb");
        assert_eq!(
            actions,
            vec![
                Action::Print('a'),
                Action::Execute(b'\n'),
                Action::Print('b'),
            ]
        );
    }

    #[test]
    fn simple_csi() {
        let mut p = Parser::new();
        let actions = feed(&mut p, b"\x1b[5C");
        let csi = csi_of(&actions);
        assert_eq!(csi.final_byte, b'C');
        assert_eq!(csi.params(), &[5]);
        assert!(!csi.truncated);
    }

    #[test]
    fn csi_with_empty_params() {
        let mut p = Parser::new();
        let actions = feed(&mut p, b"\x1b[;5H");
        let csi = csi_of(&actions);
        assert_eq!(csi.params(), &[0, 5]);
        // Defaulting maps zero to the requested default.
        assert_eq!(csi.param(0, 1), 1);
        assert_eq!(csi.param(1, 1), 5);
    }

    #[test]
    fn csi_private_marker() {
        let mut p = Parser::new();
        let actions = feed(&mut p, b"\x1b[?2004h");
        let csi = csi_of(&actions);
        assert_eq!(csi.private_marker(), Some(b'?'));
        assert_eq!(csi.params(), &[2004]);
        assert_eq!(csi.final_byte, b'h');
    }

    #[test]
    fn csi_intermediate_byte() {
        let mut p = Parser::new();
        let actions = feed(&mut p, b"\x1b[2 q");
        let csi = csi_of(&actions);
        assert_eq!(csi.params(), &[2]);
        assert_eq!(csi.intermediates().collect::<Vec<_>>(), vec![b' ']);
        assert_eq!(csi.final_byte, b'q');
    }

    #[test]
    fn colon_subparams_recorded() {
        let mut p = Parser::new();
        let actions = feed(&mut p, b"\x1b[4:3m");
        let csi = csi_of(&actions);
        assert_eq!(csi.params(), &[4, 3]);
        assert!(csi.colon_after(0));
        assert!(!csi.colon_after(1));
    }

    #[test]
    fn param_saturation_and_truncation() {
        let mut p = Parser::new();
        let actions = feed(&mut p, b"\x1b[99999999m");
        let csi = csi_of(&actions);
        assert_eq!(csi.params(), &[u16::MAX]);

        let mut p = Parser::new();
        let seq = format!("\x1b[{}m", "1;".repeat(20));
        let actions = feed(&mut p, seq.as_bytes());
        let csi = csi_of(&actions);
        assert_eq!(csi.params().len(), MAX_PARAMS);
        assert!(csi.truncated);
    }

    #[test]
    fn esc_dispatch() {
        let mut p = Parser::new();
        let actions = feed(&mut p, b"\x1b7");
        assert!(matches!(
            actions[0],
            Action::EscDispatch {
                final_byte: b'7',
                intermediates_len: 0,
                ..
            }
        ));

        let actions = feed(&mut p, b"\x1b(0");
        match &actions[0] {
            Action::EscDispatch {
                intermediates,
                intermediates_len,
                final_byte,
            } => {
                assert_eq!(*intermediates_len, 1);
                assert_eq!(intermediates[0], b'(');
                assert_eq!(*final_byte, b'0');
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn osc_bel_and_st_termination() {
        let mut p = Parser::new();
        let actions = feed(&mut p, b"\x1b]0;title\x07");
        assert_eq!(
            actions,
            vec![Action::OscDispatch(OscCommand::ChangeWindowTitle(
                "title".into()
            ))]
        );

        let actions = feed(&mut p, b"\x1b]0;two\x1b\\");
        assert!(actions.contains(&Action::OscDispatch(OscCommand::ChangeWindowTitle(
            "two".into()
        ))));
        // The trailing `\` of ST arrives in escape state and dispatches as
        // a (benign) ESC \ which the stream ignores.
        assert!(actions.iter().any(|a| matches!(
            a,
            Action::EscDispatch {
                final_byte: b'\\',
                ..
            }
        )));
    }

    #[test]
    fn dcs_hook_put_unhook() {
        let mut p = Parser::new();
        let actions = feed(&mut p, b"\x1bP1;2q\x31\x32\x1b\\");
        assert!(matches!(actions[0], Action::DcsHook(ref c) if c.params() == [1, 2] && c.final_byte == b'q'));
        assert_eq!(actions[1], Action::DcsPut(b'1'));
        assert_eq!(actions[2], Action::DcsPut(b'2'));
        assert_eq!(actions[3], Action::DcsUnhook);
    }

    #[test]
    fn apc_start_put_end() {
        let mut p = Parser::new();
        let actions = feed(&mut p, b"\x1b_Gi=1\x1b\\");
        assert_eq!(actions[0], Action::ApcStart);
        assert_eq!(actions[1], Action::ApcPut(b'G'));
        assert_eq!(actions[4], Action::ApcPut(b'1'));
        assert!(actions.contains(&Action::ApcEnd));
    }

    #[test]
    fn can_aborts_sequence() {
        let mut p = Parser::new();
        let actions = feed(&mut p, b"\x1b[12\x18Z");
        // CAN executes and returns to ground; 'Z' prints.
        assert!(actions.contains(&Action::Execute(0x18)));
        assert!(actions.contains(&Action::Print('Z')));
        assert!(!actions.iter().any(|a| matches!(a, Action::CsiDispatch(_))));
    }

    #[test]
    fn colon_in_dcs_entry_ignored() {
        let mut p = Parser::new();
        let actions = feed(&mut p, b"\x1bP:q\x1b\\");
        assert!(!actions.iter().any(|a| matches!(a, Action::DcsHook(_))));
    }
}
