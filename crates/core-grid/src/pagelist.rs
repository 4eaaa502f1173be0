//! Doubly linked list of pages: scrollback, the active region, and
//! coordinate translation between pins and tagged points.
//!
//! Nodes live in a slab (`Vec<Option<Node>>`) and are linked by ids, so a
//! [`Pin`] stays valid across unrelated mutations and only dies when its
//! node is freed (scrollback trimming) or the list reflows.
//!
//! Core invariants (must hold after every public call; checked by
//! [`PageList::verify_integrity`]):
//! * The active region is exactly `rows` rows ending at the last live row
//!   of the tail page.
//! * `active`, `cursor`, and a pinned viewport always reference live nodes
//!   and in-range rows.
//! * History (rows above the active region) never exceeds `max_scrollback`;
//!   excess oldest rows are discarded when new rows append.
//! * `total_rows` equals the sum of live rows across pages.

use crate::cell::{Cell, CellFlags};
use crate::page::{CellSnapshot, EncodeOpts, Page, PageCapacity, SemanticPrompt};
use crate::style::Style;
use crate::PageError;
use tracing::debug;

/// Stable identity of a page node within the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

#[derive(Debug)]
struct Node {
    page: Page,
    prev: Option<NodeId>,
    next: Option<NodeId>,
}

/// A stable grid coordinate: (page node, row within page, column).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pin {
    pub node: NodeId,
    pub row: u16,
    pub col: u16,
}

/// Coordinate spaces a [`Point`] can be expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointTag {
    /// Relative to the active region's top-left.
    Active,
    /// Relative to the viewport's top-left.
    Viewport,
    /// Relative to the first stored row (history plus active).
    Screen,
    /// Relative to the first history row.
    History,
}

/// A tagged (x, y) coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Point {
    pub tag: PointTag,
    pub x: u16,
    pub y: usize,
}

/// Where the viewport is anchored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Viewport {
    /// Following the active region (the default).
    Active,
    /// Pinned to a specific row in history.
    Pin(Pin),
}

/// Viewport scroll requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scroll {
    Delta(isize),
    Top,
    Bottom,
    Active,
}

/// An ordered pair of pins with a rectangle flag; the search result type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub start: Pin,
    pub end: Pin,
    pub rectangle: bool,
}

/// The screen: a list of pages with scrollback, plus the cursor pin.
pub struct PageList {
    nodes: Vec<Option<Node>>,
    free_nodes: Vec<u32>,
    head: NodeId,
    tail: NodeId,
    cols: u16,
    rows: u16,
    max_scrollback: usize,
    total_rows: usize,
    /// Top-left of the active region.
    active: Pin,
    viewport: Viewport,
    /// The cursor: pin (including column) plus the deferred-wrap flag.
    pub cursor: Pin,
    pub pending_wrap: bool,
    /// Row capacity of newly allocated pages.
    page_rows_cap: u16,
}

impl PageList {
    pub fn new(cols: u16, rows: u16, max_scrollback: usize) -> Self {
        let page_rows = rows.max(64);
        Self::with_page_rows(cols, rows, max_scrollback, page_rows)
    }

    /// Like [`Self::new`] but with explicit per-page row capacity. Small
    /// capacities force page boundaries, which tests rely on.
    pub fn with_page_rows(cols: u16, rows: u16, max_scrollback: usize, page_rows: u16) -> Self {
        assert!(cols > 0 && rows > 0 && page_rows > 0);
        let mut list = Self {
            nodes: Vec::new(),
            free_nodes: Vec::new(),
            head: NodeId(0),
            tail: NodeId(0),
            cols,
            rows,
            max_scrollback,
            total_rows: 0,
            active: Pin {
                node: NodeId(0),
                row: 0,
                col: 0,
            },
            viewport: Viewport::Active,
            cursor: Pin {
                node: NodeId(0),
                row: 0,
                col: 0,
            },
            pending_wrap: false,
            page_rows_cap: page_rows,
        };
        let first = list.alloc_node();
        list.head = first;
        list.tail = first;
        // Pre-fill the active region.
        for _ in 0..rows {
            list.append_row_inner().expect("initial page holds the active region");
        }
        list.active = Pin {
            node: first,
            row: 0,
            col: 0,
        };
        list.cursor = list.active;
        list
    }

    fn page_caps(&self) -> PageCapacity {
        PageCapacity {
            rows: self.page_rows_cap,
            ..PageCapacity::for_grid(self.cols, self.page_rows_cap)
        }
    }

    fn alloc_node(&mut self) -> NodeId {
        let page = Page::new(self.page_caps());
        let node = Node {
            page,
            prev: None,
            next: None,
        };
        if let Some(idx) = self.free_nodes.pop() {
            self.nodes[idx as usize] = Some(node);
            NodeId(idx)
        } else {
            self.nodes.push(Some(node));
            NodeId(self.nodes.len() as u32 - 1)
        }
    }

    fn node(&self, id: NodeId) -> &Node {
        self.nodes[id.0 as usize].as_ref().expect("live node")
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        self.nodes[id.0 as usize].as_mut().expect("live node")
    }

    pub fn page(&self, id: NodeId) -> &Page {
        &self.node(id).page
    }

    pub fn page_mut(&mut self, id: NodeId) -> &mut Page {
        &mut self.node_mut(id).page
    }

    pub fn cols(&self) -> u16 {
        self.cols
    }

    pub fn rows(&self) -> u16 {
        self.rows
    }

    pub fn max_scrollback(&self) -> usize {
        self.max_scrollback
    }

    pub fn total_rows(&self) -> usize {
        self.total_rows
    }

    pub fn history_rows(&self) -> usize {
        self.total_rows - self.rows as usize
    }

    pub fn next_node(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).next
    }

    pub fn prev_node(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).prev
    }

    pub fn head_node(&self) -> NodeId {
        self.head
    }

    pub fn tail_node(&self) -> NodeId {
        self.tail
    }

    // ---- absolute row arithmetic ------------------------------------------

    /// Absolute row index (0 = oldest stored row) of a pin's row.
    pub fn pin_abs_row(&self, pin: Pin) -> usize {
        let mut abs = 0usize;
        let mut id = Some(self.head);
        while let Some(cur) = id {
            if cur == pin.node {
                return abs + pin.row as usize;
            }
            abs += self.node(cur).page.rows_used() as usize;
            id = self.node(cur).next;
        }
        debug_assert!(false, "pin references a node outside the list");
        0
    }

    /// Pin (column 0) addressing an absolute row index.
    pub fn pin_at_abs_row(&self, abs: usize) -> Option<Pin> {
        let mut remaining = abs;
        let mut id = Some(self.head);
        while let Some(cur) = id {
            let used = self.node(cur).page.rows_used() as usize;
            if remaining < used {
                return Some(Pin {
                    node: cur,
                    row: remaining as u16,
                    col: 0,
                });
            }
            remaining -= used;
            id = self.node(cur).next;
        }
        None
    }

    /// Walk a pin down `n` rows, crossing page boundaries.
    pub fn pin_down(&self, pin: Pin, n: usize) -> Option<Pin> {
        let abs = self.pin_abs_row(pin) + n;
        self.pin_at_abs_row(abs).map(|p| Pin { col: pin.col, ..p })
    }

    /// Walk a pin up `n` rows.
    pub fn pin_up(&self, pin: Pin, n: usize) -> Option<Pin> {
        let abs = self.pin_abs_row(pin);
        if n > abs {
            return None;
        }
        self.pin_at_abs_row(abs - n).map(|p| Pin { col: pin.col, ..p })
    }

    fn active_abs(&self) -> usize {
        self.history_rows()
    }

    fn viewport_abs(&self) -> usize {
        match self.viewport {
            Viewport::Active => self.active_abs(),
            Viewport::Pin(p) => self.pin_abs_row(p),
        }
    }

    /// Pin of a row in the active region, with a column.
    pub fn active_pin(&self, x: u16, y: u16) -> Pin {
        debug_assert!(y < self.rows);
        let abs = self.active_abs() + y as usize;
        let mut pin = self.pin_at_abs_row(abs).expect("active region in range");
        pin.col = x;
        pin
    }

    /// Top-left pin of the active region.
    pub fn active_top(&self) -> Pin {
        self.active
    }

    /// Top-left pin of the viewport.
    pub fn viewport_top(&self) -> Pin {
        self.pin_at_abs_row(self.viewport_abs())
            .expect("viewport in range")
    }

    /// Cursor position relative to the active region's top-left.
    pub fn cursor_pos(&self) -> (u16, u16) {
        let y = self.pin_abs_row(self.cursor) - self.active_abs();
        (self.cursor.col, y as u16)
    }

    /// Re-pin the cursor at active-relative coordinates.
    pub fn set_cursor_xy(&mut self, x: u16, y: u16) {
        self.cursor = self.active_pin(x.min(self.cols - 1), y.min(self.rows - 1));
    }

    /// Copy the cell span `[x0, x1]` of one active-region row over another,
    /// re-interning references. Row metadata follows only for full-width
    /// copies. Used by scroll-region and insert/delete-line operations.
    pub fn copy_active_row_span(
        &mut self,
        dst_y: u16,
        src_y: u16,
        x0: u16,
        x1: u16,
    ) -> Result<(), PageError> {
        if dst_y == src_y {
            return Ok(());
        }
        let src = self.active_pin(0, src_y);
        let dst = self.active_pin(0, dst_y);
        let full_width = x0 == 0 && x1 >= self.cols - 1;
        let x1 = x1.min(self.cols - 1);
        let (snaps, meta) = {
            let page = self.page(src.node);
            let snaps: Vec<CellSnapshot> = (x0..=x1)
                .map(|x| page.snapshot_cell(x, src.row))
                .collect();
            (snaps, page.row_meta(src.row))
        };
        let page = self.page_mut(dst.node);
        for (i, snap) in snaps.iter().enumerate() {
            page.apply_snapshot(x0 + i as u16, dst.row, snap)?;
        }
        if full_width {
            *page.row_meta_mut(dst.row) = meta;
        }
        Ok(())
    }

    // ---- point translation ------------------------------------------------

    fn origin_abs(&self, tag: PointTag) -> usize {
        match tag {
            PointTag::Active => self.active_abs(),
            PointTag::Viewport => self.viewport_abs(),
            PointTag::Screen | PointTag::History => 0,
        }
    }

    /// Express a pin as a point in the given coordinate space, if the pin
    /// sits at or below that space's origin.
    pub fn point_from_pin(&self, tag: PointTag, pin: Pin) -> Option<Point> {
        let abs = self.pin_abs_row(pin);
        let origin = self.origin_abs(tag);
        if abs < origin {
            return None;
        }
        if tag == PointTag::History && abs >= self.active_abs() {
            return None;
        }
        Some(Point {
            tag,
            x: pin.col,
            y: abs - origin,
        })
    }

    /// Resolve a tagged point to a pin.
    pub fn pin_from_point(&self, point: Point) -> Option<Pin> {
        let abs = self.origin_abs(point.tag) + point.y;
        if point.tag == PointTag::History && point.y >= self.history_rows() {
            return None;
        }
        if abs >= self.total_rows {
            return None;
        }
        self.pin_at_abs_row(abs).map(|p| Pin {
            col: point.x,
            ..p
        })
    }

    /// Iterate pins of successive rows starting at a tag's origin, until the
    /// tag's implicit end.
    pub fn row_iterator(&self, tag: PointTag) -> RowIter<'_> {
        let (start, len) = match tag {
            PointTag::Active => (self.active_abs(), self.rows as usize),
            PointTag::Viewport => (
                self.viewport_abs(),
                (self.rows as usize).min(self.total_rows - self.viewport_abs()),
            ),
            PointTag::Screen => (0, self.total_rows),
            PointTag::History => (0, self.history_rows()),
        };
        RowIter {
            list: self,
            next: self.pin_at_abs_row(start),
            remaining: len,
        }
    }

    // ---- scrolling --------------------------------------------------------

    /// Move the viewport.
    pub fn scroll(&mut self, action: Scroll) {
        match action {
            Scroll::Active | Scroll::Bottom => self.viewport = Viewport::Active,
            Scroll::Top => {
                self.viewport = if self.history_rows() == 0 {
                    Viewport::Active
                } else {
                    Viewport::Pin(self.pin_at_abs_row(0).expect("row 0 exists"))
                }
            }
            Scroll::Delta(n) => {
                let cur = self.viewport_abs() as isize;
                let max = self.active_abs() as isize;
                let target = (cur + n).clamp(0, max) as usize;
                self.viewport = if target == max as usize {
                    Viewport::Active
                } else {
                    Viewport::Pin(self.pin_at_abs_row(target).expect("clamped in range"))
                };
            }
        }
    }

    /// Whether the viewport is following the active region.
    pub fn viewport_is_active(&self) -> bool {
        matches!(self.viewport, Viewport::Active)
    }

    // ---- growth -----------------------------------------------------------

    fn append_row_inner(&mut self) -> Result<Pin, PageError> {
        let tail = self.tail;
        if self.node(tail).page.rows_available() == 0 {
            let new = self.alloc_node();
            self.node_mut(new).prev = Some(tail);
            self.node_mut(tail).next = Some(new);
            self.tail = new;
        }
        let tail = self.tail;
        let page = &mut self.node_mut(tail).page;
        let row = page.rows_used();
        page.live_rows += 1;
        self.total_rows += 1;
        Ok(Pin {
            node: tail,
            row,
            col: 0,
        })
    }

    /// Append one row at the bottom and shift the active region down onto
    /// it, trimming scrollback to its limit. Returns the new bottom row pin.
    pub fn scroll_active(&mut self) -> Result<Pin, PageError> {
        self.append_row_inner()?;
        let active_abs = self.total_rows - self.rows as usize;
        self.active = self
            .pin_at_abs_row(active_abs)
            .expect("active within stored rows");
        self.trim_scrollback()?;
        Ok(Pin { col: 0, ..self.active_pin(0, self.rows - 1) })
    }

    fn trim_scrollback(&mut self) -> Result<(), PageError> {
        while self.history_rows() > self.max_scrollback {
            let over = self.history_rows() - self.max_scrollback;
            let head = self.head;
            let head_rows = self.node(head).page.rows_used() as usize;
            if head_rows <= over && self.node(head).next.is_some() {
                // Drop the whole head page.
                let next = self.node(head).next.expect("checked above");
                self.node_mut(next).prev = None;
                self.head = next;
                self.total_rows -= head_rows;
                self.relocate_pins_off(head, next);
                self.nodes[head.0 as usize] = None;
                self.free_nodes.push(head.0);
            } else {
                // `over` is strictly less than the head page's row count
                // here: either a later page exists (checked above) or the
                // single page also holds the active region.
                let n = over as u16;
                self.node_mut(head).page.discard_front_rows(n)?;
                self.total_rows -= n as usize;
                self.shift_pins_up(head, n);
            }
        }
        Ok(())
    }

    fn relocate_pins_off(&mut self, dead: NodeId, to: NodeId) {
        let fallback = Pin {
            node: to,
            row: 0,
            col: 0,
        };
        if self.active.node == dead {
            self.active = fallback;
        }
        if self.cursor.node == dead {
            let col = self.cursor.col;
            self.cursor = Pin { col, ..fallback };
        }
        if let Viewport::Pin(p) = self.viewport {
            if p.node == dead {
                self.viewport = Viewport::Pin(fallback);
            }
        }
    }

    fn shift_pins_up(&mut self, node: NodeId, n: u16) {
        if self.active.node == node {
            self.active.row = self.active.row.saturating_sub(n);
        }
        if self.cursor.node == node {
            self.cursor.row = self.cursor.row.saturating_sub(n);
        }
        if let Viewport::Pin(p) = &mut self.viewport {
            if p.node == node {
                p.row = p.row.saturating_sub(n);
            }
        }
    }

    /// Drop all history rows (ED 3). The active region is untouched.
    pub fn clear_history(&mut self) -> Result<(), PageError> {
        let saved = self.max_scrollback;
        self.max_scrollback = 0;
        self.trim_scrollback()?;
        self.max_scrollback = saved;
        self.scroll(Scroll::Active);
        Ok(())
    }

    /// Rebuild a node's page with grown interned-storage capacity, keeping
    /// its content and identity. Recovery path for id/string exhaustion.
    pub fn grow_node_storage(&mut self, id: NodeId) -> Result<(), PageError> {
        debug!(target: "grid.pagelist", node = ?id, "growing page interned storage");
        let caps = self.node(id).page.capacity().grown();
        let live = self.node(id).page.rows_used();
        let mut fresh = Page::new(caps);
        fresh.live_rows = live;
        for y in 0..live {
            let old = &self.node(id).page;
            // clone_row_from needs simultaneous access; snapshot per cell.
            let metas = old.row_meta(y);
            let snaps: Vec<CellSnapshot> =
                (0..self.cols).map(|x| old.snapshot_cell(x, y)).collect();
            *fresh.row_meta_mut(y) = metas;
            for (x, snap) in snaps.iter().enumerate() {
                fresh.apply_snapshot(x as u16, y, snap)?;
            }
        }
        self.node_mut(id).page = fresh;
        Ok(())
    }

    // ---- resize -----------------------------------------------------------

    /// Resize the grid. Same-width resizes slide the active region; width
    /// changes reflow wrapped logical lines. Reflow invalidates outstanding
    /// pins; the list's own pins (cursor, active, viewport) are remapped.
    pub fn resize(&mut self, cols: u16, rows: u16) -> Result<(), PageError> {
        assert!(cols > 0 && rows > 0);
        if cols == self.cols {
            return self.resize_rows(rows);
        }
        self.reflow(cols, rows)
    }

    fn resize_rows(&mut self, rows: u16) -> Result<(), PageError> {
        let cursor_abs = self.pin_abs_row(self.cursor);
        self.rows = rows;
        while self.total_rows < rows as usize {
            self.append_row_inner()?;
        }
        let active_abs = self.total_rows - rows as usize;
        self.active = self.pin_at_abs_row(active_abs).expect("in range");
        if cursor_abs < active_abs {
            let col = self.cursor.col;
            self.cursor = Pin { col, ..self.active };
        }
        self.pending_wrap = false;
        self.trim_scrollback()?;
        self.scroll(Scroll::Active);
        Ok(())
    }

    fn reflow(&mut self, cols: u16, rows: u16) -> Result<(), PageError> {
        debug!(target: "grid.pagelist", cols, rows, "reflowing grid");
        let cursor_abs = self.pin_abs_row(self.cursor);
        let cursor_col = self.cursor.col;

        // Gather logical lines: runs of rows joined by the wrap flag.
        // The cursor is tracked as (line index, column within the line).
        let mut cursor_line: usize = 0;
        let mut cursor_line_col: usize = cursor_col as usize;

        struct Line {
            cells: Vec<CellSnapshot>,
            prompt: SemanticPrompt,
        }
        let mut lines: Vec<Line> = Vec::new();
        let mut abs = 0usize;
        let mut id = Some(self.head);
        while let Some(cur) = id {
            let page = &self.node(cur).page;
            for y in 0..page.rows_used() {
                let meta = page.row_meta(y);
                let continues = meta.wrap_continuation();
                if !continues || lines.is_empty() {
                    lines.push(Line {
                        cells: Vec::new(),
                        prompt: meta.semantic_prompt(),
                    });
                }
                let this_line_idx = lines.len() - 1;
                let line = lines.last_mut().expect("pushed above");
                if abs == cursor_abs {
                    cursor_line = this_line_idx;
                    cursor_line_col = line.cells.len() + cursor_col as usize;
                }
                // Trailing blanks of a row only matter when the line
                // continues; otherwise they are padding.
                let row_cells = page.row_cells(y);
                let mut last = row_cells.len();
                if !meta.wrap() {
                    while last > 0 && row_cells[last - 1].is_blank() {
                        last -= 1;
                    }
                }
                for x in 0..last as u16 {
                    if row_cells[x as usize].has_flag(CellFlags::WIDE_SPACER) {
                        continue;
                    }
                    line.cells.push(page.snapshot_cell(x, y));
                }
                abs += 1;
            }
            id = self.node(cur).next;
        }

        // Rebuild into a fresh list of pages at the new width.
        let mut fresh = PageList::empty(cols, rows, self.max_scrollback, self.page_rows_cap);
        let mut new_cursor: Option<(usize, u16)> = None; // (abs row, col)
        for (li, line) in lines.iter().enumerate() {
            let mut pin = fresh.append_row_inner()?;
            let line_start_abs = fresh.total_rows - 1;
            let mut x: u16 = 0;
            {
                let meta = fresh.page_mut(pin.node).row_meta_mut(pin.row);
                meta.set_semantic_prompt(line.prompt);
            }
            for (ci, snap) in line.cells.iter().enumerate() {
                let wide = {
                    let mut probe = Cell::EMPTY;
                    probe.set_content_bits(snap.content_bits);
                    probe.has_flag(CellFlags::WIDE)
                };
                let width: u16 = if wide { 2 } else { 1 };
                // `x > 0` keeps a glyph wider than the whole grid from
                // wrapping forever; it is written clipped at column 0.
                if x + width > cols && x > 0 {
                    fresh
                        .page_mut(pin.node)
                        .row_meta_mut(pin.row)
                        .set_wrap(true);
                    pin = fresh.append_row_inner()?;
                    fresh
                        .page_mut(pin.node)
                        .row_meta_mut(pin.row)
                        .set_wrap_continuation(true);
                    x = 0;
                }
                if li == cursor_line && ci == cursor_line_col {
                    new_cursor = Some((fresh.total_rows - 1, x));
                }
                let page = fresh.page_mut(pin.node);
                page.apply_snapshot(x, pin.row, snap)?;
                if wide && x + 1 < cols {
                    let spacer = page.cell_mut(x + 1, pin.row);
                    spacer.set_empty();
                    spacer.set_flags(CellFlags::WIDE_SPACER);
                }
                x += width;
            }
            if li == cursor_line && new_cursor.is_none() {
                // Cursor sat past the line's content; recompute by plain
                // division over the new width.
                let col = cursor_line_col;
                let extra_rows = col / cols as usize;
                let new_x = (col % cols as usize) as u16;
                new_cursor = Some((line_start_abs + extra_rows, new_x));
            }
        }

        // Ensure the active region exists.
        while fresh.total_rows < rows as usize {
            fresh.append_row_inner()?;
        }
        fresh.rows = rows;
        fresh.cols = cols;
        let active_abs = fresh.total_rows - rows as usize;
        fresh.active = fresh.pin_at_abs_row(active_abs).expect("in range");

        let (cur_abs, cur_col) = new_cursor.unwrap_or((active_abs, 0));
        let cur_abs = cur_abs.clamp(active_abs, fresh.total_rows - 1);
        let mut cursor = fresh.pin_at_abs_row(cur_abs).expect("clamped");
        cursor.col = cur_col.min(cols - 1);
        fresh.cursor = cursor;
        fresh.pending_wrap = false;
        fresh.trim_scrollback()?;

        *self = fresh;
        Ok(())
    }

    /// A list with a single empty page and no pre-filled rows. Reflow
    /// scaffolding.
    fn empty(cols: u16, rows: u16, max_scrollback: usize, page_rows: u16) -> Self {
        let mut list = Self {
            nodes: Vec::new(),
            free_nodes: Vec::new(),
            head: NodeId(0),
            tail: NodeId(0),
            cols,
            rows,
            max_scrollback,
            total_rows: 0,
            active: Pin {
                node: NodeId(0),
                row: 0,
                col: 0,
            },
            viewport: Viewport::Active,
            cursor: Pin {
                node: NodeId(0),
                row: 0,
                col: 0,
            },
            pending_wrap: false,
            page_rows_cap: page_rows,
        };
        let first = list.alloc_node();
        list.head = first;
        list.tail = first;
        list.active = Pin {
            node: first,
            row: 0,
            col: 0,
        };
        list.cursor = list.active;
        list
    }

    // ---- encoding ---------------------------------------------------------

    /// Encode the whole screen (history plus active) as UTF-8.
    pub fn encode_utf8(&self, out: &mut Vec<u8>, opts: &EncodeOpts) {
        let mut id = Some(self.head);
        while let Some(cur) = id {
            self.node(cur).page.encode_utf8(out, opts, None);
            id = self.node(cur).next;
        }
    }

    // ---- integrity --------------------------------------------------------

    /// Check the list-level invariants. Test and debug aid.
    pub fn verify_integrity(&self) -> Result<(), String> {
        let mut sum = 0usize;
        let mut id = Some(self.head);
        let mut prev: Option<NodeId> = None;
        while let Some(cur) = id {
            let node = self.node(cur);
            if node.prev != prev {
                return Err(format!("node {cur:?} has wrong prev link"));
            }
            node.page
                .verify_integrity()
                .map_err(|e| format!("page {cur:?}: {e}"))?;
            sum += node.page.rows_used() as usize;
            prev = Some(cur);
            id = node.next;
        }
        if prev != Some(self.tail) {
            return Err("tail link does not terminate the chain".into());
        }
        if sum != self.total_rows {
            return Err(format!(
                "total_rows {} but pages sum to {sum}",
                self.total_rows
            ));
        }
        if self.total_rows < self.rows as usize {
            return Err("fewer stored rows than the active region".into());
        }
        if self.history_rows() > self.max_scrollback {
            return Err(format!(
                "history {} exceeds max_scrollback {}",
                self.history_rows(),
                self.max_scrollback
            ));
        }
        if self.pin_abs_row(self.active) != self.active_abs() {
            return Err("active pin out of place".into());
        }
        let cursor_abs = self.pin_abs_row(self.cursor);
        if cursor_abs < self.active_abs() || cursor_abs >= self.total_rows {
            return Err("cursor outside the active region".into());
        }
        Ok(())
    }
}

impl std::fmt::Debug for PageList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageList")
            .field("cols", &self.cols)
            .field("rows", &self.rows)
            .field("total_rows", &self.total_rows)
            .field("max_scrollback", &self.max_scrollback)
            .finish()
    }
}

/// Iterator over successive row pins. See [`PageList::row_iterator`].
pub struct RowIter<'a> {
    list: &'a PageList,
    next: Option<Pin>,
    remaining: usize,
}

impl Iterator for RowIter<'_> {
    type Item = Pin;

    fn next(&mut self) -> Option<Pin> {
        if self.remaining == 0 {
            return None;
        }
        let cur = self.next?;
        self.remaining -= 1;
        self.next = self.list.pin_down(cur, 1);
        Some(cur)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::EncodeOpts;

    fn print_row(list: &mut PageList, y: u16, text: &str) {
        let pin = list.active_pin(0, y);
        let page = list.page_mut(pin.node);
        for (i, ch) in text.chars().enumerate() {
            page.cell_mut(i as u16, pin.row).set_codepoint(ch);
        }
    }

    #[test]
    fn initial_list_holds_active_region() {
        let list = PageList::new(80, 24, 1000);
        assert_eq!(list.total_rows(), 24);
        assert_eq!(list.history_rows(), 0);
        list.verify_integrity().unwrap();
    }

    #[test]
    fn scroll_active_builds_history() {
        let mut list = PageList::new(10, 4, 100);
        for _ in 0..6 {
            list.scroll_active().unwrap();
        }
        assert_eq!(list.total_rows(), 10);
        assert_eq!(list.history_rows(), 6);
        list.verify_integrity().unwrap();
    }

    #[test]
    fn growth_crosses_page_boundary() {
        let mut list = PageList::with_page_rows(10, 4, 100, 5);
        for _ in 0..8 {
            list.scroll_active().unwrap();
        }
        // 12 rows across a 5-row page capacity: at least 3 pages.
        assert_eq!(list.total_rows(), 12);
        let mut pages = 0;
        let mut id = Some(list.head_node());
        while let Some(cur) = id {
            pages += 1;
            id = list.next_node(cur);
        }
        assert!(pages >= 3);
        list.verify_integrity().unwrap();
    }

    #[test]
    fn scrollback_is_bounded() {
        let mut list = PageList::with_page_rows(10, 4, 6, 5);
        for _ in 0..50 {
            list.scroll_active().unwrap();
        }
        assert!(list.history_rows() <= 6);
        list.verify_integrity().unwrap();
    }

    #[test]
    fn zero_scrollback_keeps_only_active() {
        let mut list = PageList::with_page_rows(10, 4, 0, 5);
        for _ in 0..20 {
            list.scroll_active().unwrap();
        }
        assert_eq!(list.history_rows(), 0);
        assert_eq!(list.total_rows(), 4);
        list.verify_integrity().unwrap();
    }

    #[test]
    fn point_pin_roundtrip() {
        let mut list = PageList::with_page_rows(10, 4, 100, 5);
        for _ in 0..7 {
            list.scroll_active().unwrap();
        }
        let p = list
            .pin_from_point(Point {
                tag: PointTag::Active,
                x: 3,
                y: 2,
            })
            .unwrap();
        let back = list.point_from_pin(PointTag::Active, p).unwrap();
        assert_eq!((back.x, back.y), (3, 2));

        // The same pin in screen space sits below history.
        let screen = list.point_from_pin(PointTag::Screen, p).unwrap();
        assert_eq!(screen.y, list.history_rows() + 2);
    }

    #[test]
    fn history_point_rejects_active_rows() {
        let mut list = PageList::new(10, 4, 100);
        for _ in 0..3 {
            list.scroll_active().unwrap();
        }
        let active_pin = list.active_pin(0, 0);
        assert!(list.point_from_pin(PointTag::History, active_pin).is_none());
        let hist_pin = list.pin_at_abs_row(0).unwrap();
        assert_eq!(
            list.point_from_pin(PointTag::History, hist_pin).unwrap().y,
            0
        );
    }

    #[test]
    fn viewport_scrolling_clamps() {
        let mut list = PageList::new(10, 4, 100);
        for _ in 0..10 {
            list.scroll_active().unwrap();
        }
        assert!(list.viewport_is_active());
        list.scroll(Scroll::Delta(-3));
        assert!(!list.viewport_is_active());
        assert_eq!(list.viewport_abs(), 7);
        list.scroll(Scroll::Delta(-100));
        assert_eq!(list.viewport_abs(), 0);
        list.scroll(Scroll::Delta(100));
        assert!(list.viewport_is_active());
        list.scroll(Scroll::Top);
        assert_eq!(list.viewport_abs(), 0);
        list.scroll(Scroll::Bottom);
        assert!(list.viewport_is_active());
    }

    #[test]
    fn row_iterator_spans_pages() {
        let mut list = PageList::with_page_rows(10, 4, 100, 5);
        for _ in 0..8 {
            list.scroll_active().unwrap();
        }
        let pins: Vec<Pin> = list.row_iterator(PointTag::Screen).collect();
        assert_eq!(pins.len(), list.total_rows());
        // Pins cross at least one node boundary.
        assert!(pins.windows(2).any(|w| w[0].node != w[1].node));

        let active: Vec<Pin> = list.row_iterator(PointTag::Active).collect();
        assert_eq!(active.len(), 4);
        assert_eq!(active[0], list.active_top());
    }

    #[test]
    fn resize_rows_shrink_and_grow() {
        let mut list = PageList::new(10, 6, 100);
        print_row(&mut list, 5, "bottom");
        list.cursor = list.active_pin(0, 5);
        list.resize(10, 3).unwrap();
        assert_eq!(list.rows(), 3);
        // The bottom row (with the cursor) stays in the active region.
        let pin = list.active_pin(0, 2);
        assert_eq!(list.page(pin.node).cell(0, pin.row).codepoint(), Some('b'));
        list.verify_integrity().unwrap();

        list.resize(10, 6).unwrap();
        assert_eq!(list.rows(), 6);
        list.verify_integrity().unwrap();
    }

    #[test]
    fn reflow_shrink_wraps_long_lines() {
        let mut list = PageList::new(10, 4, 100);
        print_row(&mut list, 0, "abcdefghij");
        list.cursor = list.active_pin(0, 3);
        list.resize(5, 4).unwrap();

        let mut out = Vec::new();
        list.encode_utf8(&mut out, &EncodeOpts::default());
        let text = String::from_utf8(out).unwrap();
        // The logical line survives, now wrapped across two rows.
        assert!(text.contains("abcdefghij"), "got {text:?}");
        list.verify_integrity().unwrap();
    }

    #[test]
    fn reflow_grow_unwraps() {
        let mut list = PageList::new(5, 4, 100);
        {
            let pin = list.active_pin(0, 0);
            let page = list.page_mut(pin.node);
            for (i, ch) in "abcde".chars().enumerate() {
                page.cell_mut(i as u16, pin.row).set_codepoint(ch);
            }
            page.row_meta_mut(pin.row).set_wrap(true);
        }
        {
            let pin = list.active_pin(0, 1);
            let page = list.page_mut(pin.node);
            for (i, ch) in "fgh".chars().enumerate() {
                page.cell_mut(i as u16, pin.row).set_codepoint(ch);
            }
            page.row_meta_mut(pin.row).set_wrap_continuation(true);
        }
        list.resize(10, 4).unwrap();
        let pin = list.active_pin(0, 0);
        let page = list.page(pin.node);
        let text: String = (0..8)
            .filter_map(|x| page.cell(x, pin.row).codepoint())
            .collect();
        assert_eq!(text, "abcdefgh");
        assert!(!page.row_meta(pin.row).wrap());
        list.verify_integrity().unwrap();
    }

    #[test]
    fn reflow_keeps_cursor_on_its_content() {
        let mut list = PageList::new(10, 4, 100);
        print_row(&mut list, 0, "abcdefghij");
        // Cursor on the 'h' (col 7).
        list.cursor = list.active_pin(7, 0);
        list.resize(5, 4).unwrap();
        let cur = list.cursor;
        let cell = list.page(cur.node).cell(cur.col, cur.row);
        assert_eq!(cell.codepoint(), Some('h'));
        list.verify_integrity().unwrap();
    }
}
