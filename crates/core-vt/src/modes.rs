//! Settable terminal modes (ANSI SM/RM and DEC private DECSET/DECRST).
//!
//! The closed set of modes this terminal recognizes, with packed storage:
//! current values, a parallel single-slot save set (XTSAVE/XTRESTORE), and
//! the defaults RIS restores. Each mode maps to one bit, so the whole
//! state is three words.

/// Every mode the terminal recognizes. The discriminant is the bit index
/// in the packed sets, not the protocol number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Mode {
    // ANSI modes (SM/RM without a private marker).
    DisableKeyboard = 0,
    Insert = 1,
    SendReceiveMode = 2,
    Linefeed = 3,
    // DEC private modes (DECSET/DECRST, `?` marker).
    CursorKeys = 4,
    Column132 = 5,
    SlowScroll = 6,
    ReverseColors = 7,
    Origin = 8,
    Wraparound = 9,
    Autorepeat = 10,
    MouseEventX10 = 11,
    CursorBlinking = 12,
    CursorVisible = 13,
    EnableMode3 = 14,
    ReverseWrap = 15,
    KeypadKeys = 16,
    EnableLeftAndRightMargin = 17,
    MouseEventNormal = 18,
    MouseEventButton = 19,
    MouseEventAny = 20,
    FocusEvent = 21,
    MouseFormatUtf8 = 22,
    MouseFormatSgr = 23,
    MouseFormatUrxvt = 24,
    MouseFormatSgrPixels = 25,
    MouseAlternateScroll = 26,
    IgnoreKeypadWithNumlock = 27,
    AltEscPrefix = 28,
    AltSendsEscape = 29,
    ReverseWrapExtended = 30,
    AltScreen = 31,
    AltScreenSaveCursorClearEnter = 32,
    BracketedPaste = 33,
    SynchronizedOutput = 34,
    GraphemeCluster = 35,
    ReportColorScheme = 36,
    InBandSizeReports = 37,
}

/// All modes, for iteration.
pub const ALL_MODES: [Mode; 38] = [
    Mode::DisableKeyboard,
    Mode::Insert,
    Mode::SendReceiveMode,
    Mode::Linefeed,
    Mode::CursorKeys,
    Mode::Column132,
    Mode::SlowScroll,
    Mode::ReverseColors,
    Mode::Origin,
    Mode::Wraparound,
    Mode::Autorepeat,
    Mode::MouseEventX10,
    Mode::CursorBlinking,
    Mode::CursorVisible,
    Mode::EnableMode3,
    Mode::ReverseWrap,
    Mode::KeypadKeys,
    Mode::EnableLeftAndRightMargin,
    Mode::MouseEventNormal,
    Mode::MouseEventButton,
    Mode::MouseEventAny,
    Mode::FocusEvent,
    Mode::MouseFormatUtf8,
    Mode::MouseFormatSgr,
    Mode::MouseFormatUrxvt,
    Mode::MouseFormatSgrPixels,
    Mode::MouseAlternateScroll,
    Mode::IgnoreKeypadWithNumlock,
    Mode::AltEscPrefix,
    Mode::AltSendsEscape,
    Mode::ReverseWrapExtended,
    Mode::AltScreen,
    Mode::AltScreenSaveCursorClearEnter,
    Mode::BracketedPaste,
    Mode::SynchronizedOutput,
    Mode::GraphemeCluster,
    Mode::ReportColorScheme,
    Mode::InBandSizeReports,
];

impl Mode {
    /// Resolve a protocol mode number. `ansi` selects the SM/RM namespace;
    /// otherwise the DEC private (`?`) namespace.
    pub fn from_tag(ansi: bool, number: u16) -> Option<Mode> {
        Some(if ansi {
            match number {
                2 => Mode::DisableKeyboard,
                4 => Mode::Insert,
                12 => Mode::SendReceiveMode,
                20 => Mode::Linefeed,
                _ => return None,
            }
        } else {
            match number {
                1 => Mode::CursorKeys,
                3 => Mode::Column132,
                4 => Mode::SlowScroll,
                5 => Mode::ReverseColors,
                6 => Mode::Origin,
                7 => Mode::Wraparound,
                8 => Mode::Autorepeat,
                9 => Mode::MouseEventX10,
                12 => Mode::CursorBlinking,
                25 => Mode::CursorVisible,
                40 => Mode::EnableMode3,
                45 => Mode::ReverseWrap,
                66 => Mode::KeypadKeys,
                69 => Mode::EnableLeftAndRightMargin,
                1000 => Mode::MouseEventNormal,
                1002 => Mode::MouseEventButton,
                1003 => Mode::MouseEventAny,
                1004 => Mode::FocusEvent,
                1005 => Mode::MouseFormatUtf8,
                1006 => Mode::MouseFormatSgr,
                1007 => Mode::MouseAlternateScroll,
                1015 => Mode::MouseFormatUrxvt,
                1016 => Mode::MouseFormatSgrPixels,
                1035 => Mode::IgnoreKeypadWithNumlock,
                1036 => Mode::AltEscPrefix,
                1039 => Mode::AltSendsEscape,
                1045 => Mode::ReverseWrapExtended,
                1047 => Mode::AltScreen,
                1049 => Mode::AltScreenSaveCursorClearEnter,
                2004 => Mode::BracketedPaste,
                2026 => Mode::SynchronizedOutput,
                2027 => Mode::GraphemeCluster,
                2031 => Mode::ReportColorScheme,
                2048 => Mode::InBandSizeReports,
                _ => return None,
            }
        })
    }

    /// The protocol number this mode answers to.
    pub fn number(self) -> u16 {
        match self {
            Mode::DisableKeyboard => 2,
            Mode::Insert => 4,
            Mode::SendReceiveMode => 12,
            Mode::Linefeed => 20,
            Mode::CursorKeys => 1,
            Mode::Column132 => 3,
            Mode::SlowScroll => 4,
            Mode::ReverseColors => 5,
            Mode::Origin => 6,
            Mode::Wraparound => 7,
            Mode::Autorepeat => 8,
            Mode::MouseEventX10 => 9,
            Mode::CursorBlinking => 12,
            Mode::CursorVisible => 25,
            Mode::EnableMode3 => 40,
            Mode::ReverseWrap => 45,
            Mode::KeypadKeys => 66,
            Mode::EnableLeftAndRightMargin => 69,
            Mode::MouseEventNormal => 1000,
            Mode::MouseEventButton => 1002,
            Mode::MouseEventAny => 1003,
            Mode::FocusEvent => 1004,
            Mode::MouseFormatUtf8 => 1005,
            Mode::MouseFormatSgr => 1006,
            Mode::MouseAlternateScroll => 1007,
            Mode::MouseFormatUrxvt => 1015,
            Mode::MouseFormatSgrPixels => 1016,
            Mode::IgnoreKeypadWithNumlock => 1035,
            Mode::AltEscPrefix => 1036,
            Mode::AltSendsEscape => 1039,
            Mode::ReverseWrapExtended => 1045,
            Mode::AltScreen => 1047,
            Mode::AltScreenSaveCursorClearEnter => 1049,
            Mode::BracketedPaste => 2004,
            Mode::SynchronizedOutput => 2026,
            Mode::GraphemeCluster => 2027,
            Mode::ReportColorScheme => 2031,
            Mode::InBandSizeReports => 2048,
        }
    }

    pub fn is_ansi(self) -> bool {
        matches!(
            self,
            Mode::DisableKeyboard | Mode::Insert | Mode::SendReceiveMode | Mode::Linefeed
        )
    }

    #[inline]
    fn bit(self) -> u64 {
        1u64 << (self as u8)
    }

    /// Whether the mode is on after RIS.
    pub fn default_value(self) -> bool {
        matches!(
            self,
            Mode::SendReceiveMode
                | Mode::Wraparound
                | Mode::CursorVisible
                | Mode::MouseAlternateScroll
                | Mode::IgnoreKeypadWithNumlock
                | Mode::AltEscPrefix
        )
    }
}

const DEFAULTS: u64 = {
    let mut bits = 0u64;
    // Keep in sync with `Mode::default_value`.
    bits |= 1 << (Mode::SendReceiveMode as u8);
    bits |= 1 << (Mode::Wraparound as u8);
    bits |= 1 << (Mode::CursorVisible as u8);
    bits |= 1 << (Mode::MouseAlternateScroll as u8);
    bits |= 1 << (Mode::IgnoreKeypadWithNumlock as u8);
    bits |= 1 << (Mode::AltEscPrefix as u8);
    bits
};

/// Packed mode values plus the single-slot save set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeState {
    values: u64,
    saved: u64,
}

impl Default for ModeState {
    fn default() -> Self {
        Self::new()
    }
}

impl ModeState {
    pub fn new() -> Self {
        Self {
            values: DEFAULTS,
            saved: DEFAULTS,
        }
    }

    pub fn get(&self, mode: Mode) -> bool {
        self.values & mode.bit() != 0
    }

    pub fn set(&mut self, mode: Mode, on: bool) {
        if on {
            self.values |= mode.bit();
        } else {
            self.values &= !mode.bit();
        }
    }

    /// Stash the mode's current value (XTSAVE).
    pub fn save(&mut self, mode: Mode) {
        if self.get(mode) {
            self.saved |= mode.bit();
        } else {
            self.saved &= !mode.bit();
        }
    }

    /// Restore the stashed value (XTRESTORE). Returns the restored value.
    pub fn restore(&mut self, mode: Mode) -> bool {
        let on = self.saved & mode.bit() != 0;
        self.set(mode, on);
        on
    }

    pub fn reset_to_defaults(&mut self) {
        self.values = DEFAULTS;
        self.saved = DEFAULTS;
    }
}
