//! A page: one relocatable buffer owning a row-range of the screen.
//!
//! Layout of the backing buffer, in order: row metadata, the cell grid, the
//! interned style set, the interned hyperlink set, the cell-to-hyperlink
//! map, and the string region (bitmap sub-allocator) backing hyperlink URIs
//! and explicit ids. Every cross-reference inside the buffer is a byte
//! offset, so cloning the buffer clones the page and nothing needs fixing
//! up. The buffer is a `Box<[u64]>` so every region cast is 8-byte aligned.
//!
//! Core invariants (must hold after every public call; checked by
//! [`Page::verify_integrity`]):
//! * Every non-zero `style_id` in a cell names a live interned style whose
//!   ref-count equals the number of cells carrying it.
//! * Every non-zero `hyperlink_id` in a cell names a live hyperlink entry,
//!   and the cell-to-hyperlink map holds exactly the cells with a non-zero
//!   id.
//! * String chunks referenced by live hyperlink entries are marked in-use
//!   in the allocator bitmap.

use crate::cell::{Cell, CellFlags};
use crate::hyperlink::{Hyperlink, HyperlinkContext, HyperlinkEntry, HyperlinkId};
use crate::style::Style;
use crate::PageError;
use bytemuck::{Pod, Zeroable};
use core_mem::bitmap::{BitmapAlloc, BitmapLayout};
use core_mem::offmap::{OffsetMap, OffsetMapLayout, OffsetMapReader};
use core_mem::offset::Offset;
use core_mem::refset::{BytesContext, RefCountedSet, RefSetLayout, RefSetReader};

/// Shell-integration mark attached to a row (OSC 133).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum SemanticPrompt {
    #[default]
    Unmarked = 0,
    Prompt = 1,
    Input = 2,
    Output = 3,
}

/// Packed per-row metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
#[repr(C)]
pub struct RowMeta {
    bits: u32,
}

const ROW_WRAP: u32 = 1 << 0;
const ROW_WRAP_CONT: u32 = 1 << 1;
const ROW_PROMPT_SHIFT: u32 = 2;
const ROW_PROMPT_MASK: u32 = 0b11 << ROW_PROMPT_SHIFT;

impl RowMeta {
    /// The logical line continues on the next row.
    pub fn wrap(&self) -> bool {
        self.bits & ROW_WRAP != 0
    }

    pub fn set_wrap(&mut self, on: bool) {
        if on {
            self.bits |= ROW_WRAP;
        } else {
            self.bits &= !ROW_WRAP;
        }
    }

    /// This row continues the previous row's logical line.
    pub fn wrap_continuation(&self) -> bool {
        self.bits & ROW_WRAP_CONT != 0
    }

    pub fn set_wrap_continuation(&mut self, on: bool) {
        if on {
            self.bits |= ROW_WRAP_CONT;
        } else {
            self.bits &= !ROW_WRAP_CONT;
        }
    }

    pub fn semantic_prompt(&self) -> SemanticPrompt {
        match (self.bits & ROW_PROMPT_MASK) >> ROW_PROMPT_SHIFT {
            1 => SemanticPrompt::Prompt,
            2 => SemanticPrompt::Input,
            3 => SemanticPrompt::Output,
            _ => SemanticPrompt::Unmarked,
        }
    }

    pub fn set_semantic_prompt(&mut self, p: SemanticPrompt) {
        self.bits = (self.bits & !ROW_PROMPT_MASK) | ((p as u32) << ROW_PROMPT_SHIFT);
    }
}

/// Capacity descriptor a page is constructed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCapacity {
    pub cols: u16,
    pub rows: u16,
    pub styles: u16,
    pub hyperlinks: u16,
    pub string_bytes: usize,
}

impl PageCapacity {
    /// Default sub-structure sizing for a grid of the given shape.
    pub fn for_grid(cols: u16, rows: u16) -> Self {
        Self {
            cols,
            rows,
            styles: 256,
            hyperlinks: 64,
            string_bytes: 4096,
        }
    }

    /// Same grid with roomier interned storage, for capacity-exhaustion
    /// recovery.
    pub fn grown(self) -> Self {
        Self {
            styles: (self.styles.saturating_mul(2)).min(u16::MAX - 2),
            hyperlinks: (self.hyperlinks.saturating_mul(2)).min(u16::MAX - 2),
            string_bytes: self.string_bytes * 2,
            ..self
        }
    }
}

/// Byte offsets of every region within the page buffer.
#[derive(Debug, Clone, Copy)]
struct PageLayout {
    rows_start: usize,
    cells_start: usize,
    styles_start: usize,
    styles: RefSetLayout,
    links_start: usize,
    links: RefSetLayout,
    map_start: usize,
    map: OffsetMapLayout,
    strings_start: usize,
    strings: BitmapLayout,
    total_size: usize,
}

const STRING_CHUNK: usize = 16;

fn align8(n: usize) -> usize {
    (n + 7) & !7
}

impl PageLayout {
    fn new(caps: &PageCapacity) -> Self {
        let rows_start = 0;
        let rows_bytes = caps.rows as usize * size_of::<RowMeta>();
        let cells_start = align8(rows_start + rows_bytes);
        let cells_bytes = caps.rows as usize * caps.cols as usize * size_of::<Cell>();
        let styles = RefSetLayout::new::<Style>(caps.styles);
        let styles_start = align8(cells_start + cells_bytes);
        let links = RefSetLayout::new::<HyperlinkEntry>(caps.hyperlinks);
        let links_start = align8(styles_start + styles.total_size);
        let map_cap = (caps.cols as usize * caps.rows as usize / 8).max(64);
        let map = OffsetMapLayout::new::<u32, u16>(map_cap);
        let map_start = align8(links_start + links.total_size);
        let strings = BitmapLayout::new(STRING_CHUNK, caps.string_bytes);
        let strings_start = align8(map_start + map.total_size);
        Self {
            rows_start,
            cells_start,
            styles_start,
            styles,
            links_start,
            links,
            map_start,
            map,
            strings_start,
            strings,
            total_size: align8(strings_start + strings.total_size),
        }
    }
}

/// Snapshot of one cell with its interned references resolved to owned
/// values, usable across pages.
#[derive(Debug, Clone)]
pub struct CellSnapshot {
    pub content_bits: u32,
    pub style: Style,
    pub hyperlink: Option<Hyperlink>,
}

/// Options for [`Page::encode_utf8`].
#[derive(Debug, Clone, Copy)]
pub struct EncodeOpts {
    /// Suppress the newline after rows whose logical line wraps.
    pub join_wrapped: bool,
    /// Drop trailing blank cells from each row.
    pub trim_trailing: bool,
}

impl Default for EncodeOpts {
    fn default() -> Self {
        Self {
            join_wrapped: true,
            trim_trailing: true,
        }
    }
}

/// Maps a byte offset in encoded output back to a grid position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellMapEntry {
    pub byte: u32,
    pub x: u16,
    pub y: u16,
}

/// A fixed-capacity grid of cells plus its interned style/hyperlink sets
/// and string storage, all inside one relocatable buffer.
#[derive(Clone)]
pub struct Page {
    buf: Box<[u64]>,
    layout: PageLayout,
    caps: PageCapacity,
    /// Rows currently in use; the page list appends rows until this reaches
    /// the row capacity.
    pub(crate) live_rows: u16,
}

impl Page {
    pub fn new(caps: PageCapacity) -> Self {
        assert!(caps.cols > 0 && caps.rows > 0);
        let layout = PageLayout::new(&caps);
        let buf = vec![0u64; layout.total_size / 8].into_boxed_slice();
        let mut page = Self {
            buf,
            layout,
            caps,
            live_rows: 0,
        };
        {
            let (start, l) = (page.layout.styles_start, page.layout.styles);
            RefCountedSet::<Style>::init(&mut page.bytes_mut()[start..start + l.total_size], l);
        }
        {
            let (start, l) = (page.layout.links_start, page.layout.links);
            RefCountedSet::<HyperlinkEntry>::init(
                &mut page.bytes_mut()[start..start + l.total_size],
                l,
            );
        }
        {
            let (start, l) = (page.layout.map_start, page.layout.map);
            OffsetMap::<u32, u16>::init(&mut page.bytes_mut()[start..start + l.total_size], l);
        }
        {
            let (start, l) = (page.layout.strings_start, page.layout.strings);
            BitmapAlloc::init(&mut page.bytes_mut()[start..start + l.total_size], l);
        }
        page
    }

    pub fn capacity(&self) -> PageCapacity {
        self.caps
    }

    pub fn cols(&self) -> u16 {
        self.caps.cols
    }

    pub fn rows_used(&self) -> u16 {
        self.live_rows
    }

    pub fn rows_available(&self) -> u16 {
        self.caps.rows - self.live_rows
    }

    #[inline]
    fn bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.buf)
    }

    #[inline]
    fn bytes_mut(&mut self) -> &mut [u8] {
        bytemuck::cast_slice_mut(&mut self.buf)
    }

    #[inline]
    fn cell_index(&self, x: u16, y: u16) -> usize {
        debug_assert!(x < self.caps.cols, "col {x} out of range");
        debug_assert!(y < self.caps.rows, "row {y} out of range");
        y as usize * self.caps.cols as usize + x as usize
    }

    #[inline]
    fn cell_key(&self, x: u16, y: u16) -> u32 {
        self.cell_index(x, y) as u32
    }

    // ---- raw region access ------------------------------------------------

    fn cells(&self) -> &[Cell] {
        Offset::<Cell>::new(self.layout.cells_start).slice(
            self.bytes(),
            self.caps.rows as usize * self.caps.cols as usize,
        )
    }

    fn cells_mut(&mut self) -> &mut [Cell] {
        let start = self.layout.cells_start;
        let n = self.caps.rows as usize * self.caps.cols as usize;
        Offset::<Cell>::new(start).slice_mut(self.bytes_mut(), n)
    }

    fn rows(&self) -> &[RowMeta] {
        Offset::<RowMeta>::new(self.layout.rows_start).slice(self.bytes(), self.caps.rows as usize)
    }

    fn rows_mut(&mut self) -> &mut [RowMeta] {
        let start = self.layout.rows_start;
        let n = self.caps.rows as usize;
        Offset::<RowMeta>::new(start).slice_mut(self.bytes_mut(), n)
    }

    fn styles_reader(&self) -> RefSetReader<'_, Style> {
        let (start, l) = (self.layout.styles_start, self.layout.styles);
        RefSetReader::bind(&self.bytes()[start..start + l.total_size], l)
    }

    fn styles_set(&mut self) -> RefCountedSet<'_, Style> {
        let (start, l) = (self.layout.styles_start, self.layout.styles);
        RefCountedSet::bind(&mut self.bytes_mut()[start..start + l.total_size], l)
    }

    fn links_reader(&self) -> RefSetReader<'_, HyperlinkEntry> {
        let (start, l) = (self.layout.links_start, self.layout.links);
        RefSetReader::bind(&self.bytes()[start..start + l.total_size], l)
    }

    fn strings_bytes(&self) -> &[u8] {
        let (start, l) = (self.layout.strings_start, self.layout.strings);
        &self.bytes()[start..start + l.total_size]
    }

    fn map_reader(&self) -> OffsetMapReader<'_, u32, u16> {
        let (start, l) = (self.layout.map_start, self.layout.map);
        OffsetMapReader::bind(&self.bytes()[start..start + l.total_size], l)
    }

    fn map_mut(&mut self) -> OffsetMap<'_, u32, u16> {
        let (start, l) = (self.layout.map_start, self.layout.map);
        OffsetMap::bind(&mut self.bytes_mut()[start..start + l.total_size], l)
    }

    /// The hyperlink set and its string-region context, borrowed disjointly.
    fn links_and_strings(
        &mut self,
    ) -> (RefCountedSet<'_, HyperlinkEntry>, HyperlinkContext<'_>) {
        let links_start = self.layout.links_start;
        let links_layout = self.layout.links;
        let strings_start = self.layout.strings_start;
        let strings_layout = self.layout.strings;
        let (left, right) = self.bytes_mut().split_at_mut(strings_start);
        let links_region = &mut left[links_start..links_start + links_layout.total_size];
        let strings_region = &mut right[..strings_layout.total_size];
        (
            RefCountedSet::bind(links_region, links_layout),
            HyperlinkContext {
                strings: strings_region,
                layout: strings_layout,
            },
        )
    }

    // ---- cell access ------------------------------------------------------

    pub fn cell(&self, x: u16, y: u16) -> Cell {
        self.cells()[self.cell_index(x, y)]
    }

    pub fn cell_mut(&mut self, x: u16, y: u16) -> &mut Cell {
        let idx = self.cell_index(x, y);
        &mut self.cells_mut()[idx]
    }

    pub fn row_meta(&self, y: u16) -> RowMeta {
        self.rows()[y as usize]
    }

    pub fn row_meta_mut(&mut self, y: u16) -> &mut RowMeta {
        &mut self.rows_mut()[y as usize]
    }

    pub fn row_cells(&self, y: u16) -> &[Cell] {
        let start = self.cell_index(0, y);
        &self.cells()[start..start + self.caps.cols as usize]
    }

    /// Row metadata and the row's cells, mutable together.
    pub fn row_and_cells_mut(&mut self, y: u16) -> (&mut RowMeta, &mut [Cell]) {
        debug_assert!(y < self.caps.rows);
        let cols = self.caps.cols as usize;
        let rows_start = self.layout.rows_start;
        let rows_n = self.caps.rows as usize;
        let cells_start = self.layout.cells_start;
        let (left, right) = self.bytes_mut().split_at_mut(cells_start);
        let rows: &mut [RowMeta] =
            Offset::<RowMeta>::new(rows_start).slice_mut(left, rows_n);
        let cells: &mut [Cell] = Offset::<Cell>::new(0).slice_mut(right, rows_n * cols);
        let start = y as usize * cols;
        (&mut rows[y as usize], &mut cells[start..start + cols])
    }

    // ---- styles -----------------------------------------------------------

    /// The style behind an id; id 0 is the default style.
    pub fn style(&self, id: u16) -> Style {
        if id == 0 {
            return Style::DEFAULT;
        }
        *self.styles_reader().get(id)
    }

    pub fn style_ref_count(&self, id: u16) -> u32 {
        self.styles_reader().ref_count(id)
    }

    /// Set a cell's style, interning it in this page's style set and moving
    /// the ref-counts accordingly. Returns the cell's new style id.
    pub fn set_style(&mut self, x: u16, y: u16, style: &Style) -> Result<u16, PageError> {
        let old = self.cell(x, y).style_id;
        let new = if style.is_default() {
            0
        } else {
            self.styles_set().add(*style, &mut BytesContext)?
        };
        if old != 0 {
            self.styles_set().release(old, &mut BytesContext);
        }
        self.cell_mut(x, y).style_id = new;
        Ok(new)
    }

    // ---- hyperlinks -------------------------------------------------------

    /// Resolve a hyperlink id to an owned value.
    pub fn hyperlink(&self, id: u16) -> Option<Hyperlink> {
        let links = self.links_reader();
        if !links.is_live(id) {
            return None;
        }
        Some(links.get(id).resolve(self.strings_bytes()))
    }

    pub fn hyperlink_ref_count(&self, id: u16) -> u32 {
        self.links_reader().ref_count(id)
    }

    /// Attach a hyperlink to a cell: interns the link (copying its strings
    /// into the page's string region on first sight), maintains the
    /// cell-to-hyperlink map, and moves ref-counts.
    pub fn set_hyperlink(&mut self, x: u16, y: u16, link: &Hyperlink) -> Result<(), PageError> {
        let key = self.cell_key(x, y);
        let old = self.cell(x, y).hyperlink_id;

        let existing = {
            let strings = self.strings_bytes();
            let links = self.links_reader();
            links
                .live_ids()
                .into_iter()
                .find(|&id| links.get(id).matches(strings, link))
        };
        if existing == Some(old) && old != 0 {
            return Ok(());
        }

        let id = match existing {
            Some(id) => {
                let (mut links, _) = self.links_and_strings();
                links.acquire(id);
                id
            }
            None => self.intern_new_link(link)?,
        };

        if let Err(e) = self.map_mut().put(key, id) {
            let (mut links, mut ctx) = self.links_and_strings();
            links.release(id, &mut ctx);
            return Err(e.into());
        }
        if old != 0 {
            let (mut links, mut ctx) = self.links_and_strings();
            links.release(old, &mut ctx);
        }
        self.cell_mut(x, y).hyperlink_id = id;
        Ok(())
    }

    fn intern_new_link(&mut self, link: &Hyperlink) -> Result<u16, PageError> {
        let (mut links, mut ctx) = self.links_and_strings();
        let uri = {
            let mut alloc = BitmapAlloc::bind(&mut *ctx.strings, ctx.layout);
            alloc.alloc(link.uri.len())?
        };
        uri.get_mut(ctx.strings).copy_from_slice(link.uri.as_bytes());

        let entry = match &link.id {
            HyperlinkId::Explicit(s) => {
                let id_bytes = {
                    let mut alloc = BitmapAlloc::bind(&mut *ctx.strings, ctx.layout);
                    match alloc.alloc(s.len()) {
                        Ok(v) => v,
                        Err(e) => {
                            alloc.free(uri);
                            return Err(e.into());
                        }
                    }
                };
                id_bytes.get_mut(ctx.strings).copy_from_slice(s.as_bytes());
                HyperlinkEntry::explicit(uri, id_bytes)
            }
            HyperlinkId::Implicit(n) => HyperlinkEntry::implicit(uri, *n),
        };

        match links.add(entry, &mut ctx) {
            Ok(id) => Ok(id),
            Err(e) => {
                use core_mem::InternContext;
                ctx.deleted(&entry);
                Err(e.into())
            }
        }
    }

    /// Detach any hyperlink from a cell.
    pub fn clear_hyperlink(&mut self, x: u16, y: u16) {
        let id = self.cell(x, y).hyperlink_id;
        if id == 0 {
            return;
        }
        let key = self.cell_key(x, y);
        {
            let (mut links, mut ctx) = self.links_and_strings();
            links.release(id, &mut ctx);
        }
        self.map_mut().remove(&key);
        self.cell_mut(x, y).hyperlink_id = 0;
    }

    // ---- bulk row operations ---------------------------------------------

    /// Erase cells `[start, end)` of a row to blanks carrying `style`'s
    /// background. `respect_protected` skips cells with the protected flag
    /// (selective erase).
    pub fn erase_cells(
        &mut self,
        y: u16,
        start: u16,
        end: u16,
        style: &Style,
        respect_protected: bool,
    ) -> Result<(), PageError> {
        for x in start..end.min(self.caps.cols) {
            if respect_protected && self.cell(x, y).has_flag(CellFlags::PROTECTED) {
                continue;
            }
            self.clear_hyperlink(x, y);
            self.set_style(x, y, style)?;
            let cell = self.cell_mut(x, y);
            cell.set_flags(CellFlags::empty());
            cell.set_bg_content(style.bg());
        }
        Ok(())
    }

    /// Erase a whole row, including its metadata.
    pub fn erase_row(&mut self, y: u16, style: &Style) -> Result<(), PageError> {
        self.erase_cells(y, 0, self.caps.cols, style, false)?;
        *self.row_meta_mut(y) = RowMeta::default();
        Ok(())
    }

    /// Copy `src_y` over `dst_y` within this page, adjusting ref-counts and
    /// the cell-to-hyperlink map.
    pub fn clone_row_within(&mut self, dst_y: u16, src_y: u16) -> Result<(), PageError> {
        if dst_y == src_y {
            return Ok(());
        }
        self.erase_row(dst_y, &Style::DEFAULT)?;
        *self.row_meta_mut(dst_y) = self.row_meta(src_y);
        for x in 0..self.caps.cols {
            let src = self.cell(x, src_y);
            if src.style_id != 0 {
                self.styles_set().acquire(src.style_id);
            }
            if src.hyperlink_id != 0 {
                let (mut links, _) = self.links_and_strings();
                links.acquire(src.hyperlink_id);
                let key = self.cell_key(x, dst_y);
                if self.map_mut().put(key, src.hyperlink_id).is_err() {
                    let (mut links, mut ctx) = self.links_and_strings();
                    links.release(src.hyperlink_id, &mut ctx);
                    let dst = self.cell_mut(x, dst_y);
                    *dst = src;
                    dst.hyperlink_id = 0;
                    continue;
                }
            }
            *self.cell_mut(x, dst_y) = src;
        }
        Ok(())
    }

    /// Fully resolved copy of a cell, usable to rebuild it elsewhere.
    pub fn snapshot_cell(&self, x: u16, y: u16) -> CellSnapshot {
        let cell = self.cell(x, y);
        CellSnapshot {
            content_bits: cell.content_bits(),
            style: self.style(cell.style_id),
            hyperlink: (cell.hyperlink_id != 0)
                .then(|| self.hyperlink(cell.hyperlink_id))
                .flatten(),
        }
    }

    /// Write a resolved snapshot into a cell, re-interning its references in
    /// this page.
    pub fn apply_snapshot(
        &mut self,
        x: u16,
        y: u16,
        snap: &CellSnapshot,
    ) -> Result<(), PageError> {
        self.clear_hyperlink(x, y);
        self.set_style(x, y, &snap.style)?;
        self.cell_mut(x, y).set_content_bits(snap.content_bits);
        if let Some(link) = &snap.hyperlink {
            self.set_hyperlink(x, y, link)?;
        }
        Ok(())
    }

    /// Copy a row from another page, re-interning styles and hyperlinks.
    pub fn clone_row_from(&mut self, src: &Page, dst_y: u16, src_y: u16) -> Result<(), PageError> {
        self.erase_row(dst_y, &Style::DEFAULT)?;
        *self.row_meta_mut(dst_y) = src.row_meta(src_y);
        for x in 0..self.caps.cols.min(src.caps.cols) {
            let snap = src.snapshot_cell(x, src_y);
            self.apply_snapshot(x, dst_y, &snap)?;
        }
        Ok(())
    }

    /// Drop the oldest `n` rows, sliding the rest up. Used by scrollback
    /// trimming. Ref-counts of the dropped rows are released.
    pub fn discard_front_rows(&mut self, n: u16) -> Result<(), PageError> {
        let n = n.min(self.live_rows);
        if n == 0 {
            return Ok(());
        }
        let live = self.live_rows;
        for dst in 0..live - n {
            self.clone_row_within(dst, dst + n)?;
        }
        for y in live - n..live {
            self.erase_row(y, &Style::DEFAULT)?;
        }
        self.live_rows = live - n;
        Ok(())
    }

    // ---- encoding ---------------------------------------------------------

    /// Append the page's text content to `out` as UTF-8. When `cell_map` is
    /// given, records one entry per emitted cell mapping the byte offset (in
    /// `out`, at its length on entry plus prior content) back to `(x, y)`.
    pub fn encode_utf8(
        &self,
        out: &mut Vec<u8>,
        opts: &EncodeOpts,
        mut cell_map: Option<&mut Vec<CellMapEntry>>,
    ) {
        let mut scratch = [0u8; 4];
        for y in 0..self.live_rows {
            let cells = self.row_cells(y);
            let mut last = self.caps.cols;
            if opts.trim_trailing {
                while last > 0 {
                    let c = &cells[last as usize - 1];
                    if c.is_blank() && !c.has_flag(CellFlags::WIDE_SPACER) {
                        last -= 1;
                    } else {
                        break;
                    }
                }
            }
            for x in 0..last {
                let cell = &cells[x as usize];
                if cell.has_flag(CellFlags::WIDE_SPACER) {
                    continue;
                }
                if let Some(map) = cell_map.as_mut() {
                    map.push(CellMapEntry {
                        byte: out.len() as u32,
                        x,
                        y,
                    });
                }
                match cell.codepoint() {
                    Some(cp) => out.extend_from_slice(cp.encode_utf8(&mut scratch).as_bytes()),
                    None => out.push(b' '),
                }
            }
            let wrapped = opts.join_wrapped && self.row_meta(y).wrap();
            if !wrapped {
                if let Some(map) = cell_map.as_mut() {
                    map.push(CellMapEntry {
                        byte: out.len() as u32,
                        x: last.min(self.caps.cols - 1),
                        y,
                    });
                }
                out.push(b'\n');
            }
        }
    }

    // ---- integrity --------------------------------------------------------

    /// Check the page's internal invariants, returning a description of the
    /// first violation. Test and debug aid.
    pub fn verify_integrity(&self) -> Result<(), String> {
        use std::collections::HashMap;

        let mut style_refs: HashMap<u16, u32> = HashMap::new();
        let mut link_refs: HashMap<u16, u32> = HashMap::new();
        for y in 0..self.live_rows {
            for x in 0..self.caps.cols {
                let cell = self.cell(x, y);
                if cell.style_id != 0 {
                    *style_refs.entry(cell.style_id).or_default() += 1;
                }
                if cell.hyperlink_id != 0 {
                    *link_refs.entry(cell.hyperlink_id).or_default() += 1;
                    let key = self.cell_key(x, y);
                    if self.map_reader().get(&key) != Some(cell.hyperlink_id) {
                        return Err(format!("cell ({x},{y}) link missing from map"));
                    }
                }
            }
        }

        let styles = self.styles_reader();
        for (&id, &count) in &style_refs {
            let rc = styles.ref_count(id);
            if rc < count {
                return Err(format!("style {id} ref_count {rc} < {count} cell refs"));
            }
        }
        let links = self.links_reader();
        for (&id, &count) in &link_refs {
            if !links.is_live(id) {
                return Err(format!("link {id} referenced by cells but not live"));
            }
            let rc = links.ref_count(id);
            if rc < count {
                return Err(format!("link {id} ref_count {rc} < {count} cell refs"));
            }
        }

        // Map entries must correspond to linked cells (no strays).
        for (key, id) in self.map_reader().iter() {
            let x = (key % self.caps.cols as u32) as u16;
            let y = (key / self.caps.cols as u32) as u16;
            let cell = self.cell(x, y);
            if cell.hyperlink_id != id {
                return Err(format!("map entry ({x},{y})→{id} disagrees with cell"));
            }
        }

        // Strings referenced by live links must sit in allocated chunks.
        let strings = self.strings_bytes();
        for id in links.live_ids() {
            let entry = links.get(id);
            let mut check = |off: usize, len: usize| -> Result<(), String> {
                if len == 0 {
                    return Ok(());
                }
                let first = self.layout.strings.chunk_of(off);
                let last = self.layout.strings.chunk_of(off + len - 1);
                for chunk in first..=last {
                    if self.layout.strings.chunk_is_free(strings, chunk) {
                        return Err(format!("link {id} references freed string chunk {chunk}"));
                    }
                }
                Ok(())
            };
            let uri = entry.uri_slice();
            check(uri.offset().byte_offset(), uri.len())?;
            if let Some(idb) = entry.id_slice() {
                check(idb.offset().byte_offset(), idb.len())?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("cols", &self.caps.cols)
            .field("rows_cap", &self.caps.rows)
            .field("live_rows", &self.live_rows)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::{Color, Rgb};
    use crate::style::StyleFlags;

    fn page() -> Page {
        Page::new(PageCapacity {
            cols: 10,
            rows: 4,
            styles: 16,
            hyperlinks: 8,
            string_bytes: 512,
        })
    }

    fn bold() -> Style {
        let mut s = Style::default();
        s.set_flag(StyleFlags::BOLD, true);
        s
    }

    fn link(uri: &str) -> Hyperlink {
        Hyperlink {
            id: HyperlinkId::Implicit(1),
            uri: uri.into(),
        }
    }

    #[test]
    fn row_and_cells_borrow_together() {
        let mut p = page();
        p.live_rows = 2;
        let (meta, cells) = p.row_and_cells_mut(1);
        meta.set_wrap(true);
        cells[3].set_codepoint('w');
        assert!(p.row_meta(1).wrap());
        assert_eq!(p.cell(3, 1).codepoint(), Some('w'));
    }

    #[test]
    fn style_interning_shares_ids() {
        let mut p = page();
        p.live_rows = 4;
        let id1 = p.set_style(0, 0, &bold()).unwrap();
        let id2 = p.set_style(1, 0, &bold()).unwrap();
        assert_eq!(id1, id2);
        assert_eq!(p.style_ref_count(id1), 2);
        assert_eq!(p.style(id1), bold());
        p.verify_integrity().unwrap();

        // Restyling a cell to default releases its ref.
        p.set_style(0, 0, &Style::DEFAULT).unwrap();
        assert_eq!(p.style_ref_count(id1), 1);
        assert_eq!(p.cell(0, 0).style_id, 0);
        p.verify_integrity().unwrap();
    }

    #[test]
    fn restyle_same_style_keeps_count() {
        let mut p = page();
        p.live_rows = 1;
        let id = p.set_style(0, 0, &bold()).unwrap();
        let id2 = p.set_style(0, 0, &bold()).unwrap();
        assert_eq!(id, id2);
        assert_eq!(p.style_ref_count(id), 1);
        p.verify_integrity().unwrap();
    }

    #[test]
    fn hyperlink_set_and_clear() {
        let mut p = page();
        p.live_rows = 2;
        p.set_hyperlink(0, 0, &link("https://example.com")).unwrap();
        p.set_hyperlink(1, 0, &link("https://example.com")).unwrap();
        let id = p.cell(0, 0).hyperlink_id;
        assert_ne!(id, 0);
        assert_eq!(p.cell(1, 0).hyperlink_id, id);
        assert_eq!(p.hyperlink_ref_count(id), 2);
        assert_eq!(p.hyperlink(id).unwrap().uri, "https://example.com");
        p.verify_integrity().unwrap();

        p.clear_hyperlink(0, 0);
        assert_eq!(p.hyperlink_ref_count(id), 1);
        p.clear_hyperlink(1, 0);
        assert_eq!(p.hyperlink_ref_count(id), 0);
        assert!(p.hyperlink(id).is_none());
        p.verify_integrity().unwrap();
    }

    #[test]
    fn erase_releases_references() {
        let mut p = page();
        p.live_rows = 1;
        let sid = p.set_style(3, 0, &bold()).unwrap();
        p.set_hyperlink(3, 0, &link("https://x")).unwrap();
        let lid = p.cell(3, 0).hyperlink_id;

        p.erase_row(0, &Style::DEFAULT).unwrap();
        assert_eq!(p.style_ref_count(sid), 0);
        assert_eq!(p.hyperlink_ref_count(lid), 0);
        p.verify_integrity().unwrap();
    }

    #[test]
    fn erase_with_bg_writes_bg_cells() {
        let mut p = page();
        p.live_rows = 1;
        let mut style = Style::default();
        style.set_bg(Color::Rgb(Rgb::new(1, 2, 3)));
        p.erase_cells(0, 0, 10, &style, false).unwrap();
        let c = p.cell(5, 0);
        assert_eq!(c.bg_content(), Some(Color::Rgb(Rgb::new(1, 2, 3))));
        assert_ne!(c.style_id, 0);
        p.verify_integrity().unwrap();
    }

    #[test]
    fn protected_cells_survive_selective_erase() {
        let mut p = page();
        p.live_rows = 1;
        p.cell_mut(2, 0).set_codepoint('a');
        p.cell_mut(2, 0).set_flag(CellFlags::PROTECTED, true);
        p.cell_mut(3, 0).set_codepoint('b');
        p.erase_cells(0, 0, 10, &Style::DEFAULT, true).unwrap();
        assert_eq!(p.cell(2, 0).codepoint(), Some('a'));
        assert_eq!(p.cell(3, 0).codepoint(), None);
    }

    #[test]
    fn clone_row_within_tracks_refcounts() {
        let mut p = page();
        p.live_rows = 2;
        let sid = p.set_style(0, 0, &bold()).unwrap();
        p.cell_mut(0, 0).set_codepoint('q');
        p.set_hyperlink(0, 0, &link("https://y")).unwrap();
        let lid = p.cell(0, 0).hyperlink_id;

        p.clone_row_within(1, 0).unwrap();
        assert_eq!(p.cell(0, 1).codepoint(), Some('q'));
        assert_eq!(p.style_ref_count(sid), 2);
        assert_eq!(p.hyperlink_ref_count(lid), 2);
        p.verify_integrity().unwrap();
    }

    #[test]
    fn page_relocates_by_clone() {
        let mut p = page();
        p.live_rows = 1;
        p.set_style(0, 0, &bold()).unwrap();
        p.cell_mut(0, 0).set_codepoint('Z');
        p.set_hyperlink(0, 0, &link("https://move")).unwrap();

        let copy = p.clone();
        assert_eq!(copy.cell(0, 0).codepoint(), Some('Z'));
        assert_eq!(copy.style(copy.cell(0, 0).style_id), bold());
        assert_eq!(
            copy.hyperlink(copy.cell(0, 0).hyperlink_id).unwrap().uri,
            "https://move"
        );
        copy.verify_integrity().unwrap();
    }

    #[test]
    fn encode_utf8_with_cell_map() {
        let mut p = page();
        p.live_rows = 2;
        for (i, ch) in "hey".chars().enumerate() {
            p.cell_mut(i as u16, 0).set_codepoint(ch);
        }
        p.cell_mut(0, 1).set_codepoint('B');

        let mut out = Vec::new();
        let mut map = Vec::new();
        p.encode_utf8(&mut out, &EncodeOpts::default(), Some(&mut map));
        assert_eq!(out, b"hey\nB\n");
        // Byte 1 ('e') maps to (1, 0); byte 4 ('B') maps to (0, 1).
        assert!(map.contains(&CellMapEntry { byte: 1, x: 1, y: 0 }));
        assert!(map.contains(&CellMapEntry { byte: 4, x: 0, y: 1 }));
    }

    #[test]
    fn encode_joins_wrapped_rows() {
        let mut p = page();
        p.live_rows = 2;
        p.cell_mut(9, 0).set_codepoint('a');
        p.row_meta_mut(0).set_wrap(true);
        p.row_meta_mut(1).set_wrap_continuation(true);
        p.cell_mut(0, 1).set_codepoint('b');
        let mut out = Vec::new();
        p.encode_utf8(&mut out, &EncodeOpts::default(), None);
        assert_eq!(out, b"         ab\n");
    }

    #[test]
    fn discard_front_rows_slides_content() {
        let mut p = page();
        p.live_rows = 3;
        p.cell_mut(0, 0).set_codepoint('0');
        p.cell_mut(0, 1).set_codepoint('1');
        p.cell_mut(0, 2).set_codepoint('2');
        let sid = p.set_style(0, 2, &bold()).unwrap();

        p.discard_front_rows(2).unwrap();
        assert_eq!(p.rows_used(), 1);
        assert_eq!(p.cell(0, 0).codepoint(), Some('2'));
        assert_eq!(p.style_ref_count(sid), 1);
        p.verify_integrity().unwrap();
    }
}
