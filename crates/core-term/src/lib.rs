//! The terminal: applies VT stream callbacks to the page-list screen
//! model.
//!
//! [`Terminal`] implements [`core_vt::Handler`]. It owns two page lists
//! (primary with scrollback, alternate without), the mode state, tab
//! stops, palette, charsets, margins, and the current SGR/hyperlink state,
//! and writes any protocol responses (DA, DSR, OSC queries) to the writer
//! it was built with. Drive it through [`core_vt::Stream`]:
//!
//! ```
//! use core_term::{Config, Terminal};
//! use core_vt::Stream;
//!
//! let term = Terminal::new(Config::sized(80, 24), Vec::new());
//! let mut stream = Stream::new(term);
//! stream.next_slice(b"hello \x1b[1;31mworld\x1b[0m").unwrap();
//! assert_eq!(stream.handler.row_text(0), "hello world");
//! ```
//!
//! Failure semantics follow the error-handling contract of the protocol
//! layer: invalid sequences log and no-op; storage exhaustion during a
//! print drops the glyph (after one attempt to grow the page) without
//! advancing the cursor; response-channel I/O errors propagate.

pub mod charset;
pub mod config;
pub mod cursor_shape;
pub mod palette;
pub mod tabstops;
pub mod width;
pub mod x11_color;

pub use config::Config;
pub use cursor_shape::MouseShape;
pub use palette::Palette;

use charset::CharsetState;
use core_grid::{
    Cell, CellFlags, Color, Hyperlink, HyperlinkId, PageError, PageList, Pin, Scroll,
    SemanticPrompt, Style, StyleFlags, Underline,
};
use core_vt::stream::{
    Charset, CharsetActive, CharsetSlot, CursorStyle, DeviceAttributeReq, DeviceStatusReq,
    DynamicColor, EraseDisplayMode, EraseLineMode, Handler, KittyKeyboardFlags, KittySetMode,
    ModifyKeyFormat, StatusDisplay, TabClearMode,
};
use core_vt::{Attribute, Error, Mode, ModeState, Result, SemanticMark};
use std::io::Write;
use tabstops::TabStops;
use tracing::{debug, warn};
use unicode_segmentation::UnicodeSegmentation;
use width::char_width;

/// Depth cap on each screen's kitty keyboard stack.
const KITTY_STACK_MAX: usize = 8;

#[inline]
fn page_err(e: PageError) -> Error {
    debug!(target: "term", %e, "page storage error");
    Error::OutOfMemory
}

/// DECSC/DECRC register: everything save/restore-cursor round-trips.
#[derive(Debug, Clone)]
struct SavedCursor {
    x: u16,
    y: u16,
    style: Style,
    pending_wrap: bool,
    origin: bool,
    protected: bool,
    charsets: CharsetState,
}

/// The VT state machine's target: screen model plus all terminal state.
pub struct Terminal<W: Write> {
    writer: W,
    cfg: Config,

    primary: PageList,
    alt: PageList,
    active_alt: bool,

    modes: ModeState,
    tabs: TabStops,
    palette: Palette,
    charsets: CharsetState,

    cur_style: Style,
    cur_link: Option<Hyperlink>,
    next_link_id: u32,
    protected: bool,

    scroll_top: u16,
    scroll_bottom: u16,
    scroll_left: u16,
    scroll_right: u16,

    saved_primary: Option<SavedCursor>,
    saved_alt: Option<SavedCursor>,

    kitty_primary: Vec<KittyKeyboardFlags>,
    kitty_alt: Vec<KittyKeyboardFlags>,
    modify_keys: ModifyKeyFormat,
    cursor_style: CursorStyle,
    status_display: StatusDisplay,

    title: Option<String>,
    icon_name: Option<String>,
    pwd: Option<String>,
    mouse_shape: Option<MouseShape>,
    clipboard: Option<(char, String)>,

    /// Last printed codepoint, for REP.
    last_char: Option<char>,
    /// Cell the last codepoint landed in; grapheme extensions attach here.
    last_cell: Option<Pin>,
    /// Codepoints of the cluster in `last_cell` (grapheme-cluster mode).
    cluster: String,
}

impl<W: Write> Terminal<W> {
    pub fn new(cfg: Config, writer: W) -> Self {
        let primary = Self::make_list(&cfg, false);
        let alt = Self::make_list(&cfg, true);
        Self {
            writer,
            primary,
            alt,
            active_alt: false,
            modes: ModeState::new(),
            tabs: TabStops::new(cfg.cols),
            palette: Palette::default(),
            charsets: CharsetState::new(),
            cur_style: Style::DEFAULT,
            cur_link: None,
            next_link_id: 1,
            protected: false,
            scroll_top: 0,
            scroll_bottom: cfg.rows - 1,
            scroll_left: 0,
            scroll_right: cfg.cols - 1,
            saved_primary: None,
            saved_alt: None,
            kitty_primary: vec![KittyKeyboardFlags::empty()],
            kitty_alt: vec![KittyKeyboardFlags::empty()],
            modify_keys: ModifyKeyFormat::Disabled,
            cursor_style: CursorStyle::Default,
            status_display: StatusDisplay::Main,
            title: None,
            icon_name: None,
            pwd: None,
            mouse_shape: None,
            clipboard: None,
            last_char: None,
            last_cell: None,
            cluster: String::new(),
            cfg,
        }
    }

    fn make_list(cfg: &Config, alt: bool) -> PageList {
        let scrollback = if alt { 0 } else { cfg.max_scrollback };
        match cfg.page_rows {
            Some(pr) => PageList::with_page_rows(cfg.cols, cfg.rows, scrollback, pr),
            None => PageList::new(cfg.cols, cfg.rows, scrollback),
        }
    }

    // ---- accessors --------------------------------------------------------

    /// The active screen (primary or alternate).
    pub fn grid(&self) -> &PageList {
        if self.active_alt { &self.alt } else { &self.primary }
    }

    fn grid_mut(&mut self) -> &mut PageList {
        if self.active_alt {
            &mut self.alt
        } else {
            &mut self.primary
        }
    }

    pub fn primary_grid(&self) -> &PageList {
        &self.primary
    }

    pub fn is_alt_screen(&self) -> bool {
        self.active_alt
    }

    pub fn modes(&self) -> &ModeState {
        &self.modes
    }

    pub fn palette(&self) -> &Palette {
        &self.palette
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn icon_name(&self) -> Option<&str> {
        self.icon_name.as_deref()
    }

    pub fn status_display(&self) -> StatusDisplay {
        self.status_display
    }

    pub fn pwd(&self) -> Option<&str> {
        self.pwd.as_deref()
    }

    pub fn mouse_shape(&self) -> Option<MouseShape> {
        self.mouse_shape
    }

    pub fn cursor_display_style(&self) -> CursorStyle {
        self.cursor_style
    }

    pub fn kitty_flags(&self) -> KittyKeyboardFlags {
        *self.kitty_stack().last().expect("stack never empty")
    }

    /// Cursor position relative to the active region.
    pub fn cursor_pos(&self) -> (u16, u16) {
        self.grid().cursor_pos()
    }

    pub fn pending_wrap(&self) -> bool {
        self.grid().pending_wrap
    }

    pub fn cols(&self) -> u16 {
        self.cfg.cols
    }

    pub fn rows(&self) -> u16 {
        self.cfg.rows
    }

    /// Cell at active-region coordinates.
    pub fn cell_at(&self, x: u16, y: u16) -> Cell {
        let pin = self.grid().active_pin(x, y);
        self.grid().page(pin.node).cell(pin.col, pin.row)
    }

    /// Resolved style of the cell at active-region coordinates.
    pub fn style_at(&self, x: u16, y: u16) -> Style {
        let pin = self.grid().active_pin(x, y);
        let page = self.grid().page(pin.node);
        page.style(page.cell(pin.col, pin.row).style_id)
    }

    /// Plain text of an active row, trailing blanks trimmed. Test helper.
    pub fn row_text(&self, y: u16) -> String {
        let pin = self.grid().active_pin(0, y);
        let page = self.grid().page(pin.node);
        let cells = page.row_cells(pin.row);
        let mut out = String::new();
        for cell in cells {
            if cell.has_flag(CellFlags::WIDE_SPACER) {
                continue;
            }
            out.push(cell.codepoint().unwrap_or(' '));
        }
        out.trim_end().to_string()
    }

    /// Scroll the viewport (embedder API; does not touch VT state).
    pub fn scroll_viewport(&mut self, action: Scroll) {
        self.grid_mut().scroll(action);
    }

    pub fn writer_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    // ---- geometry helpers -------------------------------------------------

    fn left_margin(&self) -> u16 {
        if self.modes.get(Mode::EnableLeftAndRightMargin) {
            self.scroll_left
        } else {
            0
        }
    }

    fn right_margin(&self) -> u16 {
        if self.modes.get(Mode::EnableLeftAndRightMargin) {
            self.scroll_right
        } else {
            self.cfg.cols - 1
        }
    }

    fn erase_style(&self) -> Style {
        let mut s = Style::DEFAULT;
        s.set_bg(self.cur_style.bg());
        s
    }

    fn move_cursor(&mut self, x: u16, y: u16) {
        let grid = self.grid_mut();
        grid.set_cursor_xy(x, y);
        grid.pending_wrap = false;
        self.last_cell = None;
        self.cluster.clear();
    }

    fn cursor_home(&mut self) {
        if self.modes.get(Mode::Origin) {
            let (x, y) = (self.left_margin(), self.scroll_top);
            self.move_cursor(x, y);
        } else {
            self.move_cursor(0, 0);
        }
    }

    // ---- kitty stack ------------------------------------------------------

    fn kitty_stack(&self) -> &Vec<KittyKeyboardFlags> {
        if self.active_alt {
            &self.kitty_alt
        } else {
            &self.kitty_primary
        }
    }

    fn kitty_stack_mut(&mut self) -> &mut Vec<KittyKeyboardFlags> {
        if self.active_alt {
            &mut self.kitty_alt
        } else {
            &mut self.kitty_primary
        }
    }

    // ---- cell writing -----------------------------------------------------

    /// Apply the current style and hyperlink to a cell, growing the page's
    /// interned storage once on exhaustion. Returns false when the write
    /// must be dropped.
    fn apply_style_and_link(&mut self, pin: Pin) -> bool {
        let style = self.cur_style;
        let ok = {
            let page = self.grid_mut().page_mut(pin.node);
            page.set_style(pin.col, pin.row, &style).is_ok()
        };
        if !ok {
            if self.grid_mut().grow_node_storage(pin.node).is_err() {
                warn!(target: "term", "style storage exhausted; dropping glyph");
                return false;
            }
            let page = self.grid_mut().page_mut(pin.node);
            if page.set_style(pin.col, pin.row, &style).is_err() {
                warn!(target: "term", "style storage exhausted after grow; dropping glyph");
                return false;
            }
        }

        match self.cur_link.clone() {
            Some(link) => {
                let ok = {
                    let page = self.grid_mut().page_mut(pin.node);
                    page.set_hyperlink(pin.col, pin.row, &link).is_ok()
                };
                if !ok {
                    // A cell without its link beats a dropped glyph.
                    if self.grid_mut().grow_node_storage(pin.node).is_ok() {
                        let page = self.grid_mut().page_mut(pin.node);
                        if page.set_hyperlink(pin.col, pin.row, &link).is_err() {
                            warn!(target: "term", "hyperlink storage exhausted; cell unlinked");
                        }
                    } else {
                        warn!(target: "term", "hyperlink storage exhausted; cell unlinked");
                    }
                }
            }
            None => {
                self.grid_mut()
                    .page_mut(pin.node)
                    .clear_hyperlink(pin.col, pin.row);
            }
        }
        true
    }

    /// Clear the partner cells of any wide glyph we are about to damage.
    fn fixup_wide_overwrite(&mut self, x: u16, y: u16) {
        let pin = self.grid().active_pin(x, y);
        let cell = self.grid().page(pin.node).cell(pin.col, pin.row);
        let erase = Style::DEFAULT;
        if cell.has_flag(CellFlags::WIDE) && x + 1 < self.cfg.cols {
            let page = self.grid_mut().page_mut(pin.node);
            let _ = page.erase_cells(pin.row, x + 1, x + 2, &erase, false);
        }
        if cell.has_flag(CellFlags::WIDE_SPACER) && x > 0 {
            let page = self.grid_mut().page_mut(pin.node);
            let _ = page.erase_cells(pin.row, x - 1, x, &erase, false);
        }
    }

    /// The printing algorithm: wrap, write, advance.
    fn input_char(&mut self, c: char) -> Result {
        let c = if c.is_ascii() {
            self.charsets.translate(c)
        } else {
            c
        };
        let width = char_width(c);

        // Zero-width codepoints extend the previous cell's cluster.
        if width == 0 {
            if let Some(pin) = self.last_cell {
                self.grid_mut()
                    .page_mut(pin.node)
                    .cell_mut(pin.col, pin.row)
                    .set_flag(CellFlags::GRAPHEME, true);
                self.cluster.push(c);
            }
            return Ok(());
        }

        // Grapheme-cluster mode: a codepoint that does not start a new
        // cluster joins the previous cell (ZWJ emoji, regional pairs).
        if self.modes.get(Mode::GraphemeCluster)
            && !self.cluster.is_empty()
            && self.last_cell.is_some()
        {
            let mut tentative = self.cluster.clone();
            tentative.push(c);
            if tentative.graphemes(true).count() == 1 {
                let pin = self.last_cell.expect("checked above");
                self.grid_mut()
                    .page_mut(pin.node)
                    .cell_mut(pin.col, pin.row)
                    .set_flag(CellFlags::GRAPHEME, true);
                self.cluster = tentative;
                return Ok(());
            }
        }

        let autowrap = self.modes.get(Mode::Wraparound);
        if self.grid().pending_wrap {
            if autowrap {
                self.wrap_line()?;
            } else {
                self.grid_mut().pending_wrap = false;
            }
        }

        let right = self.right_margin();
        let (mut x, _) = self.grid().cursor_pos();
        // A wide glyph that no longer fits either wraps or overwrites the
        // final two columns.
        if width == 2 && x + 1 > right {
            if autowrap {
                self.wrap_line()?;
                x = self.grid().cursor_pos().0;
            } else {
                x = right.saturating_sub(1);
                let y = self.grid().cursor_pos().1;
                self.grid_mut().set_cursor_xy(x, y);
            }
        }

        if self.modes.get(Mode::Insert) {
            self.shift_cells_right(width)?;
        }

        let y = self.grid().cursor_pos().1;
        self.fixup_wide_overwrite(x, y);
        if width == 2 && x + 1 < self.cfg.cols {
            self.fixup_wide_overwrite(x + 1, y);
        }

        let pin = self.grid().active_pin(x, y);
        if !self.apply_style_and_link(pin) {
            // Storage exhausted: the byte is dropped, the cursor stays.
            return Ok(());
        }
        let mut flags = CellFlags::empty();
        if width == 2 {
            flags |= CellFlags::WIDE;
        }
        if self.protected {
            flags |= CellFlags::PROTECTED;
        }
        {
            let page = self.grid_mut().page_mut(pin.node);
            let cell = page.cell_mut(pin.col, pin.row);
            cell.set_codepoint(c);
            cell.set_flags(flags);
        }
        if width == 2 && x + 1 < self.cfg.cols {
            let spacer = self.grid().active_pin(x + 1, y);
            if self.apply_style_and_link(spacer) {
                let page = self.grid_mut().page_mut(spacer.node);
                let cell = page.cell_mut(spacer.col, spacer.row);
                cell.set_empty();
                cell.set_flags(CellFlags::WIDE_SPACER);
            }
        }

        self.last_char = Some(c);
        self.last_cell = Some(pin);
        self.cluster.clear();
        self.cluster.push(c);

        let next = x + width;
        if next > right {
            self.grid_mut().set_cursor_xy(right, y);
            self.grid_mut().pending_wrap = true;
        } else {
            self.grid_mut().set_cursor_xy(next, y);
            self.grid_mut().pending_wrap = false;
        }
        Ok(())
    }

    /// Deferred autowrap: mark the wrap, CR to the left margin, move down.
    fn wrap_line(&mut self) -> Result {
        {
            let grid = self.grid_mut();
            let cur = grid.cursor;
            grid.page_mut(cur.node).row_meta_mut(cur.row).set_wrap(true);
        }
        let left = self.left_margin();
        let y = self.grid().cursor_pos().1;
        self.grid_mut().set_cursor_xy(left, y);
        self.index_impl()?;
        {
            let grid = self.grid_mut();
            let cur = grid.cursor;
            grid.page_mut(cur.node)
                .row_meta_mut(cur.row)
                .set_wrap_continuation(true);
            grid.pending_wrap = false;
        }
        Ok(())
    }

    /// IRM: slide cells right of the cursor to make room for `n` columns.
    fn shift_cells_right(&mut self, n: u16) -> Result {
        let (x, y) = self.grid().cursor_pos();
        let right = self.right_margin();
        if x > right || n == 0 {
            return Ok(());
        }
        let n = n.min(right - x + 1);
        let pin = self.grid().active_pin(0, y);
        // Cells in [x, right+1-n) survive, shifted right by n.
        let snaps: Vec<core_grid::CellSnapshot> = {
            let page = self.grid().page(pin.node);
            (x..right + 1 - n)
                .map(|sx| page.snapshot_cell(sx, pin.row))
                .collect()
        };
        let erase = self.erase_style();
        let page = self.grid_mut().page_mut(pin.node);
        for (i, snap) in snaps.iter().enumerate() {
            page.apply_snapshot(x + n + i as u16, pin.row, snap)
                .map_err(page_err)?;
        }
        page.erase_cells(pin.row, x, x + n, &erase, false)
            .map_err(page_err)?;
        Ok(())
    }

    // ---- scrolling --------------------------------------------------------

    fn region_is_full_screen(&self) -> bool {
        self.scroll_top == 0
            && self.scroll_bottom == self.cfg.rows - 1
            && self.left_margin() == 0
            && self.right_margin() == self.cfg.cols - 1
    }

    /// Content inside the scroll region moves up `n` rows; the vacated
    /// bottom rows are erased. With a full-screen region the top rows move
    /// into scrollback instead of being destroyed.
    fn scroll_region_up(&mut self, n: u16) -> Result {
        let height = self.scroll_bottom - self.scroll_top + 1;
        let n = n.clamp(1, height);
        let erase = self.erase_style();
        if self.region_is_full_screen() {
            let (cx, cy) = self.grid().cursor_pos();
            for _ in 0..n {
                self.grid_mut().scroll_active().map_err(page_err)?;
            }
            self.grid_mut().set_cursor_xy(cx, cy);
            if !erase.is_default() {
                for y in self.cfg.rows - n..self.cfg.rows {
                    self.erase_active_span(y, 0, self.cfg.cols, false)?;
                }
            }
            return Ok(());
        }
        let (l, r) = (self.left_margin(), self.right_margin());
        if n < height {
            for y in self.scroll_top..=self.scroll_bottom - n {
                self.grid_mut()
                    .copy_active_row_span(y, y + n, l, r)
                    .map_err(page_err)?;
            }
        }
        for y in self.scroll_bottom + 1 - n..=self.scroll_bottom {
            self.erase_active_span(y, l, r + 1, false)?;
        }
        Ok(())
    }

    /// Content inside the scroll region moves down `n` rows.
    fn scroll_region_down(&mut self, n: u16) -> Result {
        let height = self.scroll_bottom - self.scroll_top + 1;
        let n = n.clamp(1, height);
        let (l, r) = (self.left_margin(), self.right_margin());
        for y in (self.scroll_top + n..=self.scroll_bottom).rev() {
            self.grid_mut()
                .copy_active_row_span(y, y - n, l, r)
                .map_err(page_err)?;
        }
        for y in self.scroll_top..self.scroll_top + n {
            self.erase_active_span(y, l, r + 1, false)?;
        }
        Ok(())
    }

    fn index_impl(&mut self) -> Result {
        let (x, y) = self.grid().cursor_pos();
        if y == self.scroll_bottom {
            if self.region_is_full_screen() {
                self.grid_mut().scroll_active().map_err(page_err)?;
                self.grid_mut().set_cursor_xy(x, y);
                let erase = self.erase_style();
                if !erase.is_default() {
                    self.erase_active_span(y, 0, self.cfg.cols, false)?;
                    self.grid_mut().set_cursor_xy(x, y);
                }
            } else {
                self.scroll_region_up(1)?;
            }
        } else if y < self.cfg.rows - 1 {
            self.grid_mut().set_cursor_xy(x, y + 1);
        }
        self.grid_mut().pending_wrap = false;
        Ok(())
    }

    // ---- erase helpers ----------------------------------------------------

    fn erase_active_span(
        &mut self,
        y: u16,
        x0: u16,
        x1_exclusive: u16,
        selective: bool,
    ) -> Result {
        let erase = self.erase_style();
        let pin = self.grid().active_pin(0, y);
        self.grid_mut()
            .page_mut(pin.node)
            .erase_cells(pin.row, x0, x1_exclusive, &erase, selective)
            .map_err(page_err)
    }

    fn erase_all_active(&mut self, selective: bool) -> Result {
        for y in 0..self.cfg.rows {
            self.erase_active_span(y, 0, self.cfg.cols, selective)?;
            let pin = self.grid().active_pin(0, y);
            let grid = self.grid_mut();
            let meta = grid.page_mut(pin.node).row_meta_mut(pin.row);
            meta.set_wrap(false);
            meta.set_wrap_continuation(false);
        }
        Ok(())
    }

    // ---- save/restore cursor ---------------------------------------------

    fn save_cursor_impl(&mut self) {
        let (x, y) = self.grid().cursor_pos();
        let saved = SavedCursor {
            x,
            y,
            style: self.cur_style,
            pending_wrap: self.grid().pending_wrap,
            origin: self.modes.get(Mode::Origin),
            protected: self.protected,
            charsets: self.charsets,
        };
        if self.active_alt {
            self.saved_alt = Some(saved);
        } else {
            self.saved_primary = Some(saved);
        }
    }

    fn restore_cursor_impl(&mut self) {
        let saved = if self.active_alt {
            self.saved_alt.clone()
        } else {
            self.saved_primary.clone()
        };
        match saved {
            Some(sc) => {
                self.cur_style = sc.style;
                self.protected = sc.protected;
                self.charsets = sc.charsets;
                self.modes.set(Mode::Origin, sc.origin);
                self.move_cursor(sc.x, sc.y);
                self.grid_mut().pending_wrap = sc.pending_wrap;
            }
            None => {
                self.cur_style = Style::DEFAULT;
                self.protected = false;
                self.move_cursor(0, 0);
            }
        }
    }

    // ---- alternate screen -------------------------------------------------

    fn enter_alt(&mut self, clear: bool) -> Result {
        if !self.active_alt {
            let (x, y) = self.primary.cursor_pos();
            self.active_alt = true;
            self.grid_mut().set_cursor_xy(x, y);
            self.grid_mut().pending_wrap = false;
        }
        if clear {
            self.erase_all_active(false)?;
        }
        self.last_cell = None;
        self.cluster.clear();
        Ok(())
    }

    fn exit_alt(&mut self, clear_alt: bool) -> Result {
        if self.active_alt {
            if clear_alt {
                self.erase_all_active(false)?;
            }
            self.active_alt = false;
            self.last_cell = None;
            self.cluster.clear();
        }
        Ok(())
    }

    // ---- reports ----------------------------------------------------------

    fn send_size_report(&mut self) -> Result {
        // Pixel dimensions are the renderer's business; report zeros.
        let (rows, cols) = (self.cfg.rows, self.cfg.cols);
        write!(self.writer, "\x1b[48;{rows};{cols};0;0t")?;
        Ok(())
    }

    fn send_color_scheme_report(&mut self) -> Result {
        let scheme = if self.palette.is_dark() { 1 } else { 2 };
        write!(self.writer, "\x1b[?997;{scheme}n")?;
        Ok(())
    }

    // ---- resets -----------------------------------------------------------

    /// RIS.
    fn reset_all(&mut self) {
        self.primary = Self::make_list(&self.cfg, false);
        self.alt = Self::make_list(&self.cfg, true);
        self.active_alt = false;
        self.modes.reset_to_defaults();
        self.tabs = TabStops::new(self.cfg.cols);
        self.palette.reset_all();
        self.charsets = CharsetState::new();
        self.cur_style = Style::DEFAULT;
        self.cur_link = None;
        self.protected = false;
        self.scroll_top = 0;
        self.scroll_bottom = self.cfg.rows - 1;
        self.scroll_left = 0;
        self.scroll_right = self.cfg.cols - 1;
        self.saved_primary = None;
        self.saved_alt = None;
        self.kitty_primary = vec![KittyKeyboardFlags::empty()];
        self.kitty_alt = vec![KittyKeyboardFlags::empty()];
        self.modify_keys = ModifyKeyFormat::Disabled;
        self.cursor_style = CursorStyle::Default;
        self.last_char = None;
        self.last_cell = None;
        self.cluster.clear();
    }

    /// Resize the grid (embedder API). Reflows both screens and resets
    /// margins and tab stops to match the new shape.
    pub fn resize(&mut self, cols: u16, rows: u16) -> Result {
        if cols == self.cfg.cols && rows == self.cfg.rows {
            return Ok(());
        }
        self.primary.resize(cols, rows).map_err(page_err)?;
        self.alt.resize(cols, rows).map_err(page_err)?;
        self.cfg.cols = cols;
        self.cfg.rows = rows;
        self.tabs.resize(cols);
        self.scroll_top = 0;
        self.scroll_bottom = rows - 1;
        self.scroll_left = 0;
        self.scroll_right = cols - 1;
        self.last_cell = None;
        self.cluster.clear();
        if self.modes.get(Mode::InBandSizeReports) {
            self.send_size_report()?;
        }
        Ok(())
    }

    fn mode_set(&mut self, mode: Mode, on: bool) -> Result {
        self.modes.set(mode, on);
        match mode {
            Mode::Origin => self.cursor_home(),
            Mode::Column132 => {
                if self.modes.get(Mode::EnableMode3) {
                    let cols = if on { 132 } else { 80 };
                    self.resize(cols, self.cfg.rows)?;
                    self.erase_all_active(false)?;
                    self.cursor_home();
                }
            }
            Mode::AltScreen => {
                if on {
                    self.enter_alt(false)?;
                } else {
                    self.exit_alt(true)?;
                }
            }
            Mode::AltScreenSaveCursorClearEnter => {
                if on {
                    self.save_cursor_impl();
                    self.enter_alt(true)?;
                } else {
                    self.exit_alt(false)?;
                    self.restore_cursor_impl();
                }
            }
            Mode::EnableLeftAndRightMargin => {
                if !on {
                    self.scroll_left = 0;
                    self.scroll_right = self.cfg.cols - 1;
                }
            }
            Mode::InBandSizeReports => {
                if on {
                    self.send_size_report()?;
                }
            }
            Mode::ReportColorScheme => {
                if on {
                    self.send_color_scheme_report()?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn fold_attribute(&mut self, attr: Attribute) {
        let s = &mut self.cur_style;
        match attr {
            Attribute::Unset => *s = Style::DEFAULT,
            Attribute::Bold => s.set_flag(StyleFlags::BOLD, true),
            Attribute::Faint => s.set_flag(StyleFlags::FAINT, true),
            Attribute::ResetBoldFaint => {
                s.set_flag(StyleFlags::BOLD, false);
                s.set_flag(StyleFlags::FAINT, false);
            }
            Attribute::Italic => s.set_flag(StyleFlags::ITALIC, true),
            Attribute::ResetItalic => s.set_flag(StyleFlags::ITALIC, false),
            Attribute::Underline(u) => s.set_underline(u),
            Attribute::ResetUnderline => s.set_underline(Underline::None),
            Attribute::UnderlineColor(c) => s.set_underline_color(c),
            Attribute::ResetUnderlineColor => s.set_underline_color(Color::None),
            Attribute::Blink => s.set_flag(StyleFlags::BLINK, true),
            Attribute::ResetBlink => s.set_flag(StyleFlags::BLINK, false),
            Attribute::Inverse => s.set_flag(StyleFlags::INVERSE, true),
            Attribute::ResetInverse => s.set_flag(StyleFlags::INVERSE, false),
            Attribute::Invisible => s.set_flag(StyleFlags::INVISIBLE, true),
            Attribute::ResetInvisible => s.set_flag(StyleFlags::INVISIBLE, false),
            Attribute::Strikethrough => s.set_flag(StyleFlags::STRIKETHROUGH, true),
            Attribute::ResetStrikethrough => s.set_flag(StyleFlags::STRIKETHROUGH, false),
            Attribute::Overline => s.set_flag(StyleFlags::OVERLINE, true),
            Attribute::ResetOverline => s.set_flag(StyleFlags::OVERLINE, false),
            Attribute::Foreground(c) => s.set_fg(c),
            Attribute::Background(c) => s.set_bg(c),
            Attribute::Unknown { full, remaining } => {
                warn!(target: "term", ?full, ?remaining, "unknown SGR attribute");
            }
        }
    }
}

impl<W: Write> Handler for Terminal<W> {
    fn print(&mut self, c: char) -> Result {
        self.input_char(c)
    }

    fn backspace(&mut self) -> Result {
        let (x, y) = self.grid().cursor_pos();
        let left = self.left_margin();
        if x > left {
            self.grid_mut().set_cursor_xy(x - 1, y);
            self.grid_mut().pending_wrap = false;
            return Ok(());
        }
        // Reverse wrap: step back to the end of the previous row.
        let extended = self.modes.get(Mode::ReverseWrapExtended);
        let plain = self.modes.get(Mode::ReverseWrap);
        let continuation = {
            let grid = self.grid();
            let cur = grid.cursor;
            grid.page(cur.node).row_meta(cur.row).wrap_continuation()
        };
        if y > self.scroll_top && (extended || (plain && (continuation || self.grid().pending_wrap)))
        {
            let right = self.right_margin();
            self.grid_mut().set_cursor_xy(right, y - 1);
            self.grid_mut().pending_wrap = false;
        }
        Ok(())
    }

    fn horizontal_tab(&mut self, n: u16) -> Result {
        let right = self.right_margin();
        let (mut x, y) = self.grid().cursor_pos();
        for _ in 0..n.max(1) {
            x = self.tabs.next_stop(x).min(right);
        }
        self.grid_mut().set_cursor_xy(x, y);
        self.grid_mut().pending_wrap = false;
        Ok(())
    }

    fn horizontal_tab_back(&mut self, n: u16) -> Result {
        let left = self.left_margin();
        let (mut x, y) = self.grid().cursor_pos();
        for _ in 0..n.max(1) {
            x = self.tabs.prev_stop(x).max(left);
        }
        self.grid_mut().set_cursor_xy(x, y);
        self.grid_mut().pending_wrap = false;
        Ok(())
    }

    fn linefeed(&mut self) -> Result {
        self.index_impl()?;
        if self.modes.get(Mode::Linefeed) {
            self.carriage_return()?;
        }
        Ok(())
    }

    fn carriage_return(&mut self) -> Result {
        let left = self.left_margin();
        let y = self.grid().cursor_pos().1;
        let x = if self.grid().cursor_pos().0 < left { 0 } else { left };
        self.grid_mut().set_cursor_xy(x, y);
        self.grid_mut().pending_wrap = false;
        Ok(())
    }

    fn invoke_charset(
        &mut self,
        active: CharsetActive,
        slot: CharsetSlot,
        single_shift: bool,
    ) -> Result {
        self.charsets.invoke(active, slot, single_shift);
        Ok(())
    }

    fn configure_charset(&mut self, slot: CharsetSlot, charset: Charset) -> Result {
        self.charsets.designate(slot, charset);
        Ok(())
    }

    fn set_cursor_up(&mut self, n: u16) -> Result {
        let (x, y) = self.grid().cursor_pos();
        let floor = if y >= self.scroll_top { self.scroll_top } else { 0 };
        let y = y.saturating_sub(n.max(1)).max(floor);
        self.move_cursor(x, y);
        Ok(())
    }

    fn set_cursor_down(&mut self, n: u16) -> Result {
        let (x, y) = self.grid().cursor_pos();
        let ceil = if y <= self.scroll_bottom {
            self.scroll_bottom
        } else {
            self.cfg.rows - 1
        };
        let y = y.saturating_add(n.max(1)).min(ceil);
        self.move_cursor(x, y);
        Ok(())
    }

    fn set_cursor_right(&mut self, n: u16) -> Result {
        let (x, y) = self.grid().cursor_pos();
        let ceil = if x <= self.right_margin() {
            self.right_margin()
        } else {
            self.cfg.cols - 1
        };
        self.move_cursor(x.saturating_add(n.max(1)).min(ceil), y);
        Ok(())
    }

    fn set_cursor_left(&mut self, n: u16) -> Result {
        let (x, y) = self.grid().cursor_pos();
        let floor = if x >= self.left_margin() { self.left_margin() } else { 0 };
        self.move_cursor(x.saturating_sub(n.max(1)).max(floor), y);
        Ok(())
    }

    fn set_cursor_col(&mut self, col: u16) -> Result {
        let y = self.grid().cursor_pos().1;
        let x = if self.modes.get(Mode::Origin) {
            self.left_margin().saturating_add(col.max(1) - 1).min(self.right_margin())
        } else {
            (col.max(1) - 1).min(self.cfg.cols - 1)
        };
        self.move_cursor(x, y);
        Ok(())
    }

    fn set_cursor_row(&mut self, row: u16) -> Result {
        let x = self.grid().cursor_pos().0;
        let y = if self.modes.get(Mode::Origin) {
            self.scroll_top.saturating_add(row.max(1) - 1).min(self.scroll_bottom)
        } else {
            (row.max(1) - 1).min(self.cfg.rows - 1)
        };
        self.move_cursor(x, y);
        Ok(())
    }

    fn set_cursor_pos(&mut self, row: u16, col: u16) -> Result {
        if self.modes.get(Mode::Origin) {
            let y = self.scroll_top.saturating_add(row.max(1) - 1).min(self.scroll_bottom);
            let x = self.left_margin().saturating_add(col.max(1) - 1).min(self.right_margin());
            self.move_cursor(x, y);
        } else {
            let y = (row.max(1) - 1).min(self.cfg.rows - 1);
            let x = (col.max(1) - 1).min(self.cfg.cols - 1);
            self.move_cursor(x, y);
        }
        Ok(())
    }

    fn erase_display(&mut self, mode: EraseDisplayMode, selective: bool) -> Result {
        let (x, y) = self.grid().cursor_pos();
        match mode {
            EraseDisplayMode::Below => {
                self.erase_active_span(y, x, self.cfg.cols, selective)?;
                for row in y + 1..self.cfg.rows {
                    self.erase_active_span(row, 0, self.cfg.cols, selective)?;
                }
            }
            EraseDisplayMode::Above => {
                for row in 0..y {
                    self.erase_active_span(row, 0, self.cfg.cols, selective)?;
                }
                self.erase_active_span(y, 0, x + 1, selective)?;
            }
            EraseDisplayMode::Complete => self.erase_all_active(selective)?,
            EraseDisplayMode::Scrollback => {
                self.grid_mut().clear_history().map_err(page_err)?;
            }
        }
        self.grid_mut().pending_wrap = false;
        Ok(())
    }

    fn erase_line(&mut self, mode: EraseLineMode, selective: bool) -> Result {
        let (x, y) = self.grid().cursor_pos();
        match mode {
            EraseLineMode::Right => self.erase_active_span(y, x, self.cfg.cols, selective)?,
            EraseLineMode::Left => self.erase_active_span(y, 0, x + 1, selective)?,
            EraseLineMode::Complete => self.erase_active_span(y, 0, self.cfg.cols, selective)?,
        }
        self.grid_mut().pending_wrap = false;
        Ok(())
    }

    fn insert_lines(&mut self, n: u16) -> Result {
        let (_, y) = self.grid().cursor_pos();
        if y < self.scroll_top || y > self.scroll_bottom {
            return Ok(());
        }
        let n = n.max(1).min(self.scroll_bottom - y + 1);
        let (l, r) = (self.left_margin(), self.right_margin());
        for dst in ((y + n)..=self.scroll_bottom).rev() {
            self.grid_mut()
                .copy_active_row_span(dst, dst - n, l, r)
                .map_err(page_err)?;
        }
        for row in y..y + n {
            self.erase_active_span(row, l, r + 1, false)?;
        }
        let left = self.left_margin();
        self.move_cursor(left, y);
        Ok(())
    }

    fn delete_lines(&mut self, n: u16) -> Result {
        let (_, y) = self.grid().cursor_pos();
        if y < self.scroll_top || y > self.scroll_bottom {
            return Ok(());
        }
        let n = n.max(1).min(self.scroll_bottom - y + 1);
        let (l, r) = (self.left_margin(), self.right_margin());
        if n <= self.scroll_bottom - y {
            for dst in y..=self.scroll_bottom - n {
                self.grid_mut()
                    .copy_active_row_span(dst, dst + n, l, r)
                    .map_err(page_err)?;
            }
        }
        for row in self.scroll_bottom + 1 - n..=self.scroll_bottom {
            self.erase_active_span(row, l, r + 1, false)?;
        }
        let left = self.left_margin();
        self.move_cursor(left, y);
        Ok(())
    }

    fn insert_blanks(&mut self, n: u16) -> Result {
        self.grid_mut().pending_wrap = false;
        self.shift_cells_right(n.max(1))
    }

    fn delete_chars(&mut self, n: u16) -> Result {
        let (x, y) = self.grid().cursor_pos();
        let right = self.right_margin();
        if x > right {
            return Ok(());
        }
        let n = n.max(1).min(right - x + 1);
        let pin = self.grid().active_pin(0, y);
        let snaps: Vec<core_grid::CellSnapshot> = {
            let page = self.grid().page(pin.node);
            (x + n..=right).map(|sx| page.snapshot_cell(sx, pin.row)).collect()
        };
        let erase = self.erase_style();
        let page = self.grid_mut().page_mut(pin.node);
        for (i, snap) in snaps.iter().enumerate() {
            page.apply_snapshot(x + i as u16, pin.row, snap)
                .map_err(page_err)?;
        }
        page.erase_cells(pin.row, right + 1 - n, right + 1, &erase, false)
            .map_err(page_err)?;
        self.grid_mut().pending_wrap = false;
        Ok(())
    }

    fn erase_chars(&mut self, n: u16) -> Result {
        let (x, y) = self.grid().cursor_pos();
        let end = x.saturating_add(n.max(1)).min(self.cfg.cols);
        // ECH honors the protected attribute.
        self.erase_active_span(y, x, end, true)?;
        self.grid_mut().pending_wrap = false;
        Ok(())
    }

    fn scroll_up(&mut self, n: u16) -> Result {
        self.scroll_region_up(n.max(1))
    }

    fn scroll_down(&mut self, n: u16) -> Result {
        self.scroll_region_down(n.max(1))
    }

    fn print_repeat(&mut self, n: u16) -> Result {
        if let Some(c) = self.last_char {
            for _ in 0..n.max(1) {
                self.input_char(c)?;
            }
        }
        Ok(())
    }

    fn device_attributes(&mut self, req: DeviceAttributeReq, _params: &[u16]) -> Result {
        match req {
            DeviceAttributeReq::Primary => write!(self.writer, "\x1b[?62;22c")?,
            DeviceAttributeReq::Secondary => write!(self.writer, "\x1b[>1;10;0c")?,
            DeviceAttributeReq::Tertiary => write!(self.writer, "\x1bP!|00000000\x1b\\")?,
        }
        Ok(())
    }

    fn device_status_report(&mut self, req: DeviceStatusReq) -> Result {
        match req {
            DeviceStatusReq::OperatingStatus => write!(self.writer, "\x1b[0n")?,
            DeviceStatusReq::CursorPosition => {
                let (x, y) = self.grid().cursor_pos();
                let (row, col) = if self.modes.get(Mode::Origin) {
                    (
                        y.saturating_sub(self.scroll_top) + 1,
                        x.saturating_sub(self.left_margin()) + 1,
                    )
                } else {
                    (y + 1, x + 1)
                };
                write!(self.writer, "\x1b[{row};{col}R")?;
            }
            DeviceStatusReq::ColorScheme => self.send_color_scheme_report()?,
        }
        Ok(())
    }

    fn tab_set(&mut self) -> Result {
        let x = self.grid().cursor_pos().0;
        self.tabs.set(x);
        Ok(())
    }

    fn tab_clear(&mut self, which: TabClearMode) -> Result {
        match which {
            TabClearMode::Current => {
                let x = self.grid().cursor_pos().0;
                self.tabs.clear(x);
            }
            TabClearMode::All => self.tabs.clear_all(),
        }
        Ok(())
    }

    fn tab_reset(&mut self) -> Result {
        self.tabs.reset_default();
        Ok(())
    }

    fn set_mode(&mut self, mode: Mode, enabled: bool) -> Result {
        self.mode_set(mode, enabled)
    }

    fn save_mode(&mut self, mode: Mode) -> Result {
        self.modes.save(mode);
        Ok(())
    }

    fn restore_mode(&mut self, mode: Mode) -> Result {
        let on = self.modes.restore(mode);
        self.mode_set(mode, on)
    }

    fn set_attribute(&mut self, attr: Attribute) -> Result {
        self.fold_attribute(attr);
        Ok(())
    }

    fn set_cursor_style(&mut self, style: CursorStyle) -> Result {
        self.cursor_style = style;
        Ok(())
    }

    fn set_top_and_bottom_margin(&mut self, top: u16, bottom: u16) -> Result {
        let top = top.max(1) - 1;
        let bottom = if bottom == 0 || bottom > self.cfg.rows {
            self.cfg.rows - 1
        } else {
            bottom - 1
        };
        if top >= bottom {
            warn!(target: "term", top, bottom, "ignoring invalid DECSTBM");
            return Ok(());
        }
        self.scroll_top = top;
        self.scroll_bottom = bottom;
        self.cursor_home();
        Ok(())
    }

    fn set_left_and_right_margin(&mut self, left: u16, right: u16) -> Result {
        if !self.modes.get(Mode::EnableLeftAndRightMargin) {
            debug!(target: "term", "DECSLRM without DECLRMM; ignored");
            return Ok(());
        }
        let left = left.max(1) - 1;
        let right = if right == 0 || right > self.cfg.cols {
            self.cfg.cols - 1
        } else {
            right - 1
        };
        if left >= right {
            warn!(target: "term", left, right, "ignoring invalid DECSLRM");
            return Ok(());
        }
        self.scroll_left = left;
        self.scroll_right = right;
        self.cursor_home();
        Ok(())
    }

    fn set_active_status_display(&mut self, target: StatusDisplay) -> Result {
        self.status_display = target;
        Ok(())
    }

    fn save_cursor(&mut self) -> Result {
        self.save_cursor_impl();
        Ok(())
    }

    fn restore_cursor(&mut self) -> Result {
        self.restore_cursor_impl();
        Ok(())
    }

    fn index(&mut self) -> Result {
        self.index_impl()
    }

    fn next_line(&mut self) -> Result {
        self.index_impl()?;
        self.carriage_return()
    }

    fn reverse_index(&mut self) -> Result {
        let (x, y) = self.grid().cursor_pos();
        if y == self.scroll_top {
            self.scroll_region_down(1)?;
        } else if y > 0 {
            self.grid_mut().set_cursor_xy(x, y - 1);
        }
        self.grid_mut().pending_wrap = false;
        Ok(())
    }

    fn full_reset(&mut self) -> Result {
        self.reset_all();
        Ok(())
    }

    fn soft_reset(&mut self) -> Result {
        self.modes.set(Mode::Origin, false);
        self.modes.set(Mode::Insert, false);
        self.modes.set(Mode::CursorVisible, true);
        self.modes.set(Mode::Wraparound, true);
        self.scroll_top = 0;
        self.scroll_bottom = self.cfg.rows - 1;
        self.scroll_left = 0;
        self.scroll_right = self.cfg.cols - 1;
        self.cur_style = Style::DEFAULT;
        self.protected = false;
        self.charsets = CharsetState::new();
        self.saved_primary = None;
        self.saved_alt = None;
        Ok(())
    }

    fn decaln(&mut self) -> Result {
        self.scroll_top = 0;
        self.scroll_bottom = self.cfg.rows - 1;
        self.scroll_left = 0;
        self.scroll_right = self.cfg.cols - 1;
        for y in 0..self.cfg.rows {
            self.erase_active_span(y, 0, self.cfg.cols, false)?;
            let pin = self.grid().active_pin(0, y);
            let page = self.grid_mut().page_mut(pin.node);
            for x in 0..page.cols() {
                page.cell_mut(x, pin.row).set_codepoint('E');
            }
        }
        self.move_cursor(0, 0);
        Ok(())
    }

    fn set_protected_mode(&mut self, protected: bool) -> Result {
        self.protected = protected;
        Ok(())
    }

    // ---- OSC --------------------------------------------------------------

    fn set_title(&mut self, title: &str) -> Result {
        self.title = Some(title.to_string());
        Ok(())
    }

    fn set_icon_name(&mut self, name: &str) -> Result {
        self.icon_name = Some(name.to_string());
        Ok(())
    }

    fn set_mouse_shape(&mut self, shape: &str) -> Result {
        match shape.parse::<MouseShape>() {
            Ok(s) => self.mouse_shape = Some(s),
            Err(()) => warn!(target: "term.osc", shape, "unrecognized pointer shape"),
        }
        Ok(())
    }

    fn clipboard_contents(&mut self, kind: char, payload: &str) -> Result {
        if payload == "?" {
            let stored = match &self.clipboard {
                Some((k, data)) if *k == kind => data.clone(),
                _ => String::new(),
            };
            write!(self.writer, "\x1b]52;{kind};{stored}\x07")?;
        } else {
            self.clipboard = Some((kind, payload.to_string()));
        }
        Ok(())
    }

    fn semantic_prompt(&mut self, mark: SemanticMark) -> Result {
        let tag = match mark {
            SemanticMark::PromptStart => SemanticPrompt::Prompt,
            SemanticMark::PromptEnd => SemanticPrompt::Input,
            SemanticMark::OutputStart => SemanticPrompt::Output,
            SemanticMark::CommandEnd(_) => return Ok(()),
        };
        let cur = self.grid().cursor;
        self.grid_mut()
            .page_mut(cur.node)
            .row_meta_mut(cur.row)
            .set_semantic_prompt(tag);
        Ok(())
    }

    fn report_pwd(&mut self, url: &str) -> Result {
        self.pwd = Some(url.to_string());
        Ok(())
    }

    fn hyperlink_start(&mut self, id: Option<&str>, uri: &str) -> Result {
        let id = match id {
            Some(explicit) => HyperlinkId::Explicit(explicit.to_string()),
            None => {
                let n = self.next_link_id;
                self.next_link_id += 1;
                HyperlinkId::Implicit(n)
            }
        };
        self.cur_link = Some(Hyperlink {
            id,
            uri: uri.to_string(),
        });
        Ok(())
    }

    fn hyperlink_end(&mut self) -> Result {
        self.cur_link = None;
        Ok(())
    }

    fn set_palette_color(&mut self, index: u8, spec: &str) -> Result {
        match x11_color::parse_color(spec) {
            Some(rgb) => self.palette.set(index, rgb),
            None => warn!(target: "term.osc", index, spec, "unparsable color spec"),
        }
        Ok(())
    }

    fn report_palette_color(&mut self, index: u8) -> Result {
        let rgb = self.palette.get(index);
        write!(
            self.writer,
            "\x1b]4;{index};{}\x07",
            x11_color::format_color(rgb)
        )?;
        Ok(())
    }

    fn reset_palette_color(&mut self, indexes: &[u8]) -> Result {
        if indexes.is_empty() {
            for i in 0..=255u8 {
                self.palette.reset_index(i);
            }
        } else {
            for &i in indexes {
                self.palette.reset_index(i);
            }
        }
        Ok(())
    }

    fn set_dynamic_color(&mut self, kind: DynamicColor, spec: &str) -> Result {
        match x11_color::parse_color(spec) {
            Some(rgb) => match kind {
                DynamicColor::Foreground => self.palette.foreground = rgb,
                DynamicColor::Background => self.palette.background = rgb,
                DynamicColor::Cursor => self.palette.cursor = rgb,
            },
            None => warn!(target: "term.osc", ?kind, spec, "unparsable color spec"),
        }
        Ok(())
    }

    fn report_dynamic_color(&mut self, kind: DynamicColor) -> Result {
        let (code, rgb) = match kind {
            DynamicColor::Foreground => (10, self.palette.foreground),
            DynamicColor::Background => (11, self.palette.background),
            DynamicColor::Cursor => (12, self.palette.cursor),
        };
        write!(
            self.writer,
            "\x1b]{code};{}\x07",
            x11_color::format_color(rgb)
        )?;
        Ok(())
    }

    fn reset_dynamic_color(&mut self, kind: DynamicColor) -> Result {
        match kind {
            DynamicColor::Foreground => self.palette.reset_foreground(),
            DynamicColor::Background => self.palette.reset_background(),
            DynamicColor::Cursor => self.palette.reset_cursor(),
        }
        Ok(())
    }

    // ---- kitty keyboard ---------------------------------------------------

    fn kitty_keyboard_push(&mut self, flags: KittyKeyboardFlags) -> Result {
        let stack = self.kitty_stack_mut();
        if stack.len() >= KITTY_STACK_MAX {
            stack.remove(0);
        }
        stack.push(flags);
        Ok(())
    }

    fn kitty_keyboard_pop(&mut self, n: u16) -> Result {
        let stack = self.kitty_stack_mut();
        for _ in 0..n.max(1) {
            if stack.len() > 1 {
                stack.pop();
            } else {
                stack[0] = KittyKeyboardFlags::empty();
            }
        }
        Ok(())
    }

    fn kitty_keyboard_set(&mut self, flags: KittyKeyboardFlags, mode: KittySetMode) -> Result {
        let stack = self.kitty_stack_mut();
        let top = stack.last_mut().expect("stack never empty");
        match mode {
            KittySetMode::Set => *top = flags,
            KittySetMode::Union => *top |= flags,
            KittySetMode::Difference => *top &= !flags,
        }
        Ok(())
    }

    fn kitty_keyboard_query(&mut self) -> Result {
        let flags = self.kitty_flags().bits();
        write!(self.writer, "\x1b[?{flags}u")?;
        Ok(())
    }

    fn set_modify_key_format(&mut self, format: ModifyKeyFormat) -> Result {
        self.modify_keys = format;
        Ok(())
    }

    fn query_modify_key_format(&mut self) -> Result {
        let n = match self.modify_keys {
            ModifyKeyFormat::Disabled => 0,
            ModifyKeyFormat::ExceptWellDefined => 1,
            ModifyKeyFormat::All => 2,
        };
        write!(self.writer, "\x1b[>4;{n}m")?;
        Ok(())
    }
}

impl<W: Write> std::fmt::Debug for Terminal<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Terminal")
            .field("cols", &self.cfg.cols)
            .field("rows", &self.cfg.rows)
            .field("alt", &self.active_alt)
            .field("cursor", &self.grid().cursor_pos())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn term() -> Terminal<Vec<u8>> {
        Terminal::new(Config::sized(10, 4), Vec::new())
    }

    #[test]
    fn print_advances_cursor() {
        let mut t = term();
        t.print('A').unwrap();
        t.print('B').unwrap();
        assert_eq!(t.cursor_pos(), (2, 0));
        assert_eq!(t.cell_at(0, 0).codepoint(), Some('A'));
        assert_eq!(t.cell_at(1, 0).codepoint(), Some('B'));
        assert!(!t.pending_wrap());
    }

    #[test]
    fn wrap_is_deferred() {
        let mut t = term();
        for _ in 0..10 {
            t.print('x').unwrap();
        }
        assert_eq!(t.cursor_pos(), (9, 0));
        assert!(t.pending_wrap());
        t.print('y').unwrap();
        assert_eq!(t.cursor_pos(), (1, 1));
        assert_eq!(t.cell_at(0, 1).codepoint(), Some('y'));
        // The wrapped rows carry their flags.
        let pin = t.grid().active_pin(0, 0);
        assert!(t.grid().page(pin.node).row_meta(pin.row).wrap());
    }

    #[test]
    fn autowrap_off_overwrites_last_cell() {
        let mut t = term();
        t.mode_set(Mode::Wraparound, false).unwrap();
        for c in "abcdefghij".chars() {
            t.print(c).unwrap();
        }
        t.print('Z').unwrap();
        assert_eq!(t.cursor_pos(), (9, 0));
        assert_eq!(t.cell_at(9, 0).codepoint(), Some('Z'));
    }

    #[test]
    fn wide_char_occupies_two_cells() {
        let mut t = term();
        t.print('界').unwrap();
        assert_eq!(t.cursor_pos(), (2, 0));
        assert!(t.cell_at(0, 0).has_flag(CellFlags::WIDE));
        assert!(t.cell_at(1, 0).has_flag(CellFlags::WIDE_SPACER));
    }

    #[test]
    fn linefeed_scrolls_at_bottom() {
        let mut t = term();
        for _ in 0..3 {
            t.linefeed().unwrap();
        }
        assert_eq!(t.cursor_pos().1, 3);
        t.print('q').unwrap();
        t.linefeed().unwrap();
        assert_eq!(t.cursor_pos().1, 3);
        assert_eq!(t.grid().history_rows(), 1);
        // The printed row moved up.
        assert_eq!(t.cell_at(0, 2).codepoint(), Some('q'));
    }

    #[test]
    fn osc_and_cursor_state() {
        let mut t = term();
        t.set_title("hello").unwrap();
        assert_eq!(t.title(), Some("hello"));
        t.set_cursor_style(CursorStyle::SteadyBar).unwrap();
        assert_eq!(t.cursor_display_style(), CursorStyle::SteadyBar);
    }

    #[test]
    fn insert_and_delete_chars() {
        let mut t = term();
        for c in "abcd".chars() {
            t.print(c).unwrap();
        }
        t.set_cursor_pos(1, 2).unwrap(); // on 'b'
        t.insert_blanks(1).unwrap();
        assert_eq!(t.row_text(0), "a bcd");
        t.delete_chars(1).unwrap();
        assert_eq!(t.row_text(0), "abcd");
    }

    #[test]
    fn scroll_region_confines_lines() {
        let mut t = term();
        for (y, c) in "abcd".chars().enumerate() {
            t.set_cursor_pos(y as u16 + 1, 1).unwrap();
            t.print(c).unwrap();
        }
        t.set_top_and_bottom_margin(2, 3).unwrap();
        t.set_cursor_pos(2, 1).unwrap();
        t.delete_lines(1).unwrap();
        assert_eq!(t.row_text(0), "a");
        assert_eq!(t.row_text(1), "c");
        assert_eq!(t.row_text(2), "");
        assert_eq!(t.row_text(3), "d");
    }

    #[test]
    fn dsr_reports_cursor() {
        let mut t = term();
        t.set_cursor_pos(2, 5).unwrap();
        t.device_status_report(DeviceStatusReq::CursorPosition)
            .unwrap();
        assert_eq!(t.writer_mut().as_slice(), b"\x1b[2;5R");
    }

    #[test]
    fn alt_screen_round_trip() {
        let mut t = term();
        t.print('p').unwrap();
        t.mode_set(Mode::AltScreenSaveCursorClearEnter, true).unwrap();
        assert!(t.is_alt_screen());
        // The alternate screen inherits the cursor position.
        assert_eq!(t.cursor_pos(), (1, 0));
        t.print('q').unwrap();
        assert_eq!(t.cell_at(1, 0).codepoint(), Some('q'));
        t.mode_set(Mode::AltScreenSaveCursorClearEnter, false)
            .unwrap();
        assert!(!t.is_alt_screen());
        assert_eq!(t.cell_at(0, 0).codepoint(), Some('p'));
        assert_eq!(t.cursor_pos(), (1, 0));
    }

    #[test]
    fn rep_repeats_last_char() {
        let mut t = term();
        t.print('z').unwrap();
        t.print_repeat(3).unwrap();
        assert_eq!(t.row_text(0), "zzzz");
    }
}
