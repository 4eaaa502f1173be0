//! Scrollback search: a sliding byte window over encoded page content.
//!
//! Pages are encoded to UTF-8 one at a time and appended to a circular
//! byte buffer together with metadata mapping byte ranges back to grid
//! positions. Needle search runs over three regions per iteration — the
//! first contiguous slice, an overlap buffer covering the seam between the
//! two slices, and the second slice — so matches are found regardless of
//! where the circular buffer wraps. Matches that span page boundaries fall
//! out naturally because consecutive pages' bytes are adjacent in the
//! window.
//!
//! After every probe the window prunes page segments it no longer needs,
//! always preserving `needle.len() - 1` trailing bytes so a match
//! straddling the next append cannot be lost. Window memory is therefore
//! bounded by roughly two pages plus the needle length, regardless of
//! scrollback size.

use crate::page::{CellMapEntry, EncodeOpts, Page};
use crate::pagelist::{NodeId, PageList, Pin, Selection};

/// One appended page's byte range and its back-mapping to cells.
#[derive(Debug)]
struct Segment {
    node: NodeId,
    /// Absolute stream offset of this segment's first byte.
    base: usize,
    len: usize,
    /// Byte-offset (relative to `base`) to cell mapping, ascending.
    map: Vec<CellMapEntry>,
}

/// Circular byte window with page-segment metadata.
#[derive(Debug, Default)]
pub struct SlidingWindow {
    data: std::collections::VecDeque<u8>,
    segments: std::collections::VecDeque<Segment>,
    /// Absolute stream offset of `data[0]`.
    start_offset: usize,
}

fn find_sub(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|w| w == needle)
}

impl SlidingWindow {
    pub fn new() -> Self {
        Self::default()
    }

    fn end_offset(&self) -> usize {
        self.start_offset + self.data.len()
    }

    /// Encode one page and append its bytes and cell map.
    pub fn append_page(&mut self, node: NodeId, page: &Page) {
        let mut bytes = Vec::new();
        let mut map = Vec::new();
        page.encode_utf8(&mut bytes, &EncodeOpts::default(), Some(&mut map));
        let base = self.end_offset();
        let len = bytes.len();
        self.data.extend(bytes);
        self.segments.push_back(Segment {
            node,
            base,
            len,
            map,
        });
    }

    /// Search for `needle` at absolute offsets `>= from`. Returns the
    /// absolute `[start, end)` range of the first match.
    pub fn find(&self, needle: &[u8], from: usize) -> Option<(usize, usize)> {
        if needle.is_empty() {
            return None;
        }
        let rel_from = from.saturating_sub(self.start_offset);
        if rel_from >= self.data.len() {
            return None;
        }
        let (s0, s1) = self.data.as_slices();

        // Region 1: the first contiguous slice.
        if rel_from < s0.len() {
            if let Some(i) = find_sub(&s0[rel_from..], needle) {
                let start = self.start_offset + rel_from + i;
                return Some((start, start + needle.len()));
            }
        }

        // Region 2: the seam. Up to needle.len()-1 bytes from the end of
        // slice 0 joined with the same from the start of slice 1; only
        // matches *starting* in the slice-0 part are new.
        if !s0.is_empty() && !s1.is_empty() && needle.len() > 1 {
            let tail = (needle.len() - 1).min(s0.len());
            let head = (needle.len() - 1).min(s1.len());
            let mut seam = Vec::with_capacity(tail + head);
            seam.extend_from_slice(&s0[s0.len() - tail..]);
            seam.extend_from_slice(&s1[..head]);
            let mut search_at = 0usize;
            while let Some(i) = find_sub(&seam[search_at..], needle) {
                let idx = search_at + i;
                if idx < tail {
                    let start = self.start_offset + (s0.len() - tail) + idx;
                    if start >= from {
                        return Some((start, start + needle.len()));
                    }
                    search_at = idx + 1;
                } else {
                    break;
                }
            }
        }

        // Region 3: the second contiguous slice.
        let s1_from = rel_from.saturating_sub(s0.len());
        if s1_from < s1.len() {
            if let Some(i) = find_sub(&s1[s1_from..], needle) {
                let start = self.start_offset + s0.len() + s1_from + i;
                return Some((start, start + needle.len()));
            }
        }
        None
    }

    /// Drop whole segments that end at or before `boundary`.
    fn prune_to(&mut self, boundary: usize) {
        while let Some(seg) = self.segments.front() {
            let seg_end = seg.base + seg.len;
            if seg_end > boundary {
                break;
            }
            let seg_len = seg.len;
            self.segments.pop_front();
            self.data.drain(..seg_len);
            self.start_offset += seg_len;
        }
    }

    /// Prune after a match starting at `match_start`.
    pub fn prune_matched(&mut self, match_start: usize, needle_len: usize) {
        let keep_from = (match_start + 1).saturating_sub(needle_len.saturating_sub(1));
        self.prune_to(keep_from.min(match_start));
    }

    /// Prune after a miss: keep only the trailing overlap reserve.
    pub fn prune_missed(&mut self, needle_len: usize) {
        let keep = needle_len.saturating_sub(1);
        self.prune_to(self.end_offset().saturating_sub(keep));
    }

    /// Map an absolute byte offset back to a grid pin.
    pub fn pin_at(&self, offset: usize) -> Option<Pin> {
        let seg = self
            .segments
            .iter()
            .find(|s| offset >= s.base && offset < s.base + s.len)?;
        let rel = (offset - seg.base) as u32;
        let idx = seg.map.partition_point(|e| e.byte <= rel);
        let entry = seg.map.get(idx.checked_sub(1)?)?;
        Some(Pin {
            node: seg.node,
            row: entry.y,
            col: entry.x,
        })
    }
}

/// Iterator-style search over a whole page list. Appends one page at a time
/// to the sliding window until it yields a match.
pub struct PageListSearch<'a> {
    list: &'a PageList,
    needle: Vec<u8>,
    window: SlidingWindow,
    next_node: Option<NodeId>,
    /// Absolute offset the next probe starts at (first unsearched position).
    search_from: usize,
}

impl<'a> PageListSearch<'a> {
    pub fn new(list: &'a PageList, needle: &str) -> Self {
        Self {
            list,
            needle: needle.as_bytes().to_vec(),
            window: SlidingWindow::new(),
            next_node: Some(list.head_node()),
            search_from: 0,
        }
    }

    /// Next match, in stream order, as a selection of pins.
    pub fn next_match(&mut self) -> Option<Selection> {
        if self.needle.is_empty() {
            return None;
        }
        loop {
            if let Some((start, end)) = self.window.find(&self.needle, self.search_from) {
                let sel = Selection {
                    start: self.window.pin_at(start)?,
                    end: self.window.pin_at(end - 1)?,
                    rectangle: false,
                };
                self.search_from = start + 1;
                self.window.prune_matched(start, self.needle.len());
                return Some(sel);
            }
            self.window.prune_missed(self.needle.len());
            let node = self.next_node?;
            self.window.append_page(node, self.list.page(node));
            self.next_node = self.list.next_node(node);
        }
    }

    /// Collect every match.
    pub fn all(mut self) -> Vec<Selection> {
        let mut out = Vec::new();
        while let Some(sel) = self.next_match() {
            out.push(sel);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pagelist::PageList;

    fn write_text(list: &mut PageList, y: u16, text: &str) {
        let pin = list.active_pin(0, y);
        let page = list.page_mut(pin.node);
        for (i, ch) in text.chars().enumerate() {
            page.cell_mut(i as u16, pin.row).set_codepoint(ch);
        }
    }

    #[test]
    fn finds_single_row_match() {
        let mut list = PageList::new(20, 4, 100);
        write_text(&mut list, 1, "say hello here");
        let matches = PageListSearch::new(&list, "hello").all();
        assert_eq!(matches.len(), 1);
        let sel = &matches[0];
        let page = list.page(sel.start.node);
        assert_eq!(page.cell(sel.start.col, sel.start.row).codepoint(), Some('h'));
        assert_eq!(page.cell(sel.end.col, sel.end.row).codepoint(), Some('o'));
        assert_eq!(sel.start.col, 4);
        assert_eq!(sel.end.col, 8);
    }

    #[test]
    fn finds_multiple_matches_in_order() {
        let mut list = PageList::new(20, 4, 100);
        write_text(&mut list, 0, "abc abc");
        write_text(&mut list, 2, "abc");
        let matches = PageListSearch::new(&list, "abc").all();
        assert_eq!(matches.len(), 3);
        assert_eq!(matches[0].start.col, 0);
        assert_eq!(matches[1].start.col, 4);
        assert_eq!(matches[2].start.col, 0);
    }

    #[test]
    fn no_match_returns_empty() {
        let mut list = PageList::new(20, 4, 100);
        write_text(&mut list, 0, "nothing here");
        assert!(PageListSearch::new(&list, "absent").all().is_empty());
    }

    #[test]
    fn match_across_wrapped_row_boundary() {
        let mut list = PageList::new(5, 4, 100);
        // "hel" ends row 0 which wraps into row 1 "lo".
        write_text(&mut list, 0, "xxhel");
        write_text(&mut list, 1, "lo");
        {
            let pin = list.active_pin(0, 0);
            list.page_mut(pin.node).row_meta_mut(pin.row).set_wrap(true);
        }
        {
            let pin = list.active_pin(0, 1);
            list.page_mut(pin.node)
                .row_meta_mut(pin.row)
                .set_wrap_continuation(true);
        }
        let matches = PageListSearch::new(&list, "hello").all();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].start.col, 2);
        assert_eq!(matches[0].end.col, 1);
    }

    #[test]
    fn match_across_page_boundary() {
        // Page capacity of 4 rows with 8 total rows: two pages. A wrapped
        // line straddles the boundary between them.
        let mut list = PageList::with_page_rows(10, 4, 100, 4);
        for _ in 0..4 {
            list.scroll_active().unwrap();
        }
        assert!(list.next_node(list.head_node()).is_some());

        // Absolute row 3 is the last row of page 0; row 4 the first of
        // page 1.
        let top = list.pin_at_abs_row(3).unwrap();
        let bottom = list.pin_at_abs_row(4).unwrap();
        assert_ne!(top.node, bottom.node);
        {
            let page = list.page_mut(top.node);
            for (i, ch) in "abcdeworld".chars().take(10).enumerate() {
                page.cell_mut(i as u16, top.row).set_codepoint(ch);
            }
            page.row_meta_mut(top.row).set_wrap(true);
        }
        {
            let page = list.page_mut(bottom.node);
            for (i, ch) in "!more".chars().enumerate() {
                page.cell_mut(i as u16, bottom.row).set_codepoint(ch);
            }
            page.row_meta_mut(bottom.row).set_wrap_continuation(true);
        }

        let matches = PageListSearch::new(&list, "world!").all();
        assert_eq!(matches.len(), 1);
        let sel = &matches[0];
        assert_eq!(sel.start.node, top.node);
        assert_eq!(sel.end.node, bottom.node);
        assert_eq!(sel.start.col, 5);
        assert_eq!(sel.end.col, 0);
    }

    #[test]
    fn window_prunes_whole_segments_on_miss() {
        let mut w = SlidingWindow::new();
        let mut list = PageList::with_page_rows(10, 4, 100, 4);
        for _ in 0..8 {
            list.scroll_active().unwrap();
        }
        let head = list.head_node();
        let second = list.next_node(head).unwrap();
        w.append_page(head, list.page(head));
        w.append_page(second, list.page(second));
        assert_eq!(w.segments.len(), 2);
        assert!(w.find(b"zzz", 0).is_none());
        // A 3-byte needle needs a 2-byte reserve: the first segment is no
        // longer required, the second still is.
        w.prune_missed(3);
        assert_eq!(w.segments.len(), 1);
        assert!(w.start_offset > 0);
    }
}
