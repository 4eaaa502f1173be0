//! Hyperlinks (OSC 8): owned values at the API surface, offset-based
//! entries inside pages.
//!
//! A page stores each distinct hyperlink once. The stored form
//! ([`HyperlinkEntry`]) holds the URI and any explicit id as offset slices
//! into the page's string region; equality and hashing therefore need that
//! region, which is what [`HyperlinkContext`] carries into the intern set.
//! When the last referencing cell goes away the context frees the string
//! chunks.

use bytemuck::{Pod, Zeroable};
use core_mem::bitmap::{BitmapAlloc, BitmapLayout};
use core_mem::offset::{Offset, OffsetSlice};
use core_mem::{InternContext, stable_hash};

/// How a hyperlink is identified for de-duplication across cells.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HyperlinkId {
    /// No explicit id was supplied; the terminal assigned a counter value.
    Implicit(u32),
    /// The application supplied `id=` in the OSC 8 parameters.
    Explicit(String),
}

/// An owned hyperlink as seen by callers of the page API.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Hyperlink {
    pub id: HyperlinkId,
    pub uri: String,
}

const KIND_IMPLICIT: u32 = 0;
const KIND_EXPLICIT: u32 = 1;

/// In-page hyperlink record. All slices are relative to the page's string
/// region so the page stays relocatable.
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct HyperlinkEntry {
    uri_off: u32,
    uri_len: u32,
    id_off: u32,
    id_len: u32,
    implicit_id: u32,
    kind: u32,
}

impl HyperlinkEntry {
    pub fn implicit(uri: OffsetSlice<u8>, counter: u32) -> Self {
        Self {
            uri_off: uri.offset().byte_offset() as u32,
            uri_len: uri.len() as u32,
            id_off: 0,
            id_len: 0,
            implicit_id: counter,
            kind: KIND_IMPLICIT,
        }
    }

    pub fn explicit(uri: OffsetSlice<u8>, id: OffsetSlice<u8>) -> Self {
        Self {
            uri_off: uri.offset().byte_offset() as u32,
            uri_len: uri.len() as u32,
            id_off: id.offset().byte_offset() as u32,
            id_len: id.len() as u32,
            implicit_id: 0,
            kind: KIND_EXPLICIT,
        }
    }

    pub fn uri_slice(&self) -> OffsetSlice<u8> {
        OffsetSlice::new(Offset::new(self.uri_off as usize), self.uri_len as usize)
    }

    pub fn id_slice(&self) -> Option<OffsetSlice<u8>> {
        (self.kind == KIND_EXPLICIT)
            .then(|| OffsetSlice::new(Offset::new(self.id_off as usize), self.id_len as usize))
    }

    pub fn uri_bytes<'a>(&self, strings: &'a [u8]) -> &'a [u8] {
        self.uri_slice().get(strings)
    }

    /// Resolve to an owned [`Hyperlink`].
    pub fn resolve(&self, strings: &[u8]) -> Hyperlink {
        let uri = String::from_utf8_lossy(self.uri_bytes(strings)).into_owned();
        let id = match self.id_slice() {
            Some(s) => {
                HyperlinkId::Explicit(String::from_utf8_lossy(s.get(strings)).into_owned())
            }
            None => HyperlinkId::Implicit(self.implicit_id),
        };
        Hyperlink { id, uri }
    }

    /// Whether this entry denotes the same link as an owned value.
    ///
    /// Explicit links match on id and URI; implicit links match on the
    /// assigned counter and URI.
    pub fn matches(&self, strings: &[u8], link: &Hyperlink) -> bool {
        if self.uri_bytes(strings) != link.uri.as_bytes() {
            return false;
        }
        match (&link.id, self.id_slice()) {
            (HyperlinkId::Explicit(id), Some(s)) => s.get(strings) == id.as_bytes(),
            (HyperlinkId::Implicit(n), None) => *n == self.implicit_id,
            _ => false,
        }
    }
}

/// Intern context binding hyperlink entries to their page's string region.
pub struct HyperlinkContext<'a> {
    pub strings: &'a mut [u8],
    pub layout: BitmapLayout,
}

impl InternContext<HyperlinkEntry> for HyperlinkContext<'_> {
    fn hash(&self, item: &HyperlinkEntry) -> u64 {
        let uri = stable_hash(item.uri_bytes(self.strings));
        let id = match item.id_slice() {
            Some(s) => stable_hash(s.get(self.strings)),
            None => stable_hash(&item.implicit_id.to_le_bytes()),
        };
        uri ^ id.rotate_left(17) ^ item.kind as u64
    }

    fn eql(&self, a: &HyperlinkEntry, b: &HyperlinkEntry) -> bool {
        if a.kind != b.kind || a.uri_bytes(self.strings) != b.uri_bytes(self.strings) {
            return false;
        }
        match (a.id_slice(), b.id_slice()) {
            (Some(x), Some(y)) => x.get(self.strings) == y.get(self.strings),
            (None, None) => a.implicit_id == b.implicit_id,
            _ => false,
        }
    }

    fn deleted(&mut self, item: &HyperlinkEntry) {
        let mut alloc = BitmapAlloc::bind(self.strings, self.layout);
        alloc.free(item.uri_slice());
        if let Some(id) = item.id_slice() {
            alloc.free(id);
        }
    }
}
