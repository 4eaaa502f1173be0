//! Relocatable-buffer memory primitives for the terminal page model.
//!
//! A page is a single contiguous buffer that owns every variable-size
//! structure attached to a region of the screen: the cell grid, the interned
//! style and hyperlink sets, the cell-to-hyperlink map, and the string
//! storage backing hyperlink URIs. Pages move (realloc on grow, clone on
//! screen copy), so nothing inside a page may hold a machine address into
//! the page. This crate supplies the building blocks that make that work:
//!
//! * [`Offset`] / [`OffsetSlice`] — typed byte offsets that resolve against
//!   a buffer passed in by the caller. Copying the buffer copies the whole
//!   structure; no fixups.
//! * [`BitmapAlloc`] — a fixed-chunk sub-allocator over a buffer region,
//!   used for variable-length strings.
//! * [`RefCountedSet`] — a hashed intern set yielding dense small-integer
//!   ids with explicit ref-count lifetime.
//! * [`OffsetMap`] — an open-addressed hash map whose entire storage lives
//!   inside a buffer region.
//!
//! Core invariants (must hold after every public call):
//! * No type in this crate stores a pointer; all cross-references are byte
//!   offsets relative to a caller-supplied base slice.
//! * Every region cast goes through `bytemuck`, so layout mistakes surface
//!   as panics in tests instead of undefined behavior.
//! * All fallible insertion paths return [`MemError`]; nothing aborts.

pub mod bitmap;
pub mod offmap;
pub mod offset;
pub mod refset;

pub use bitmap::{BitmapAlloc, BitmapLayout};
pub use offmap::{OffsetMap, OffsetMapLayout, OffsetMapReader};
pub use offset::{Offset, OffsetSlice};
pub use refset::{BytesContext, InternContext, RefCountedSet, RefSetLayout, RefSetReader};

use thiserror::Error;

/// Errors surfaced by the fallible insertion paths in this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MemError {
    /// A buffer region (string allocator, set storage, map storage) is full.
    #[error("backing buffer region exhausted")]
    OutOfMemory,
    /// The small-integer id space of an intern set is exhausted.
    #[error("intern id space exhausted")]
    IdOverflow,
}

/// Round `n` up to the next multiple of `align` (`align` must be a power of
/// two).
#[inline]
pub(crate) const fn align_up(n: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (n + align - 1) & !(align - 1)
}

/// Deterministic 64-bit hash of a byte slice.
///
/// Uses fixed `ahash` seeds so the same bytes hash identically on every run;
/// interned-set probe order and the packed style hash both rely on this.
#[inline]
pub fn stable_hash(bytes: &[u8]) -> u64 {
    use std::hash::{BuildHasher, Hasher};
    let build = ahash::RandomState::with_seeds(
        0x243f_6a88_85a3_08d3,
        0x1319_8a2e_0370_7344,
        0xa409_3822_299f_31d0,
        0x082e_fa98_ec4e_6c89,
    );
    let mut h = build.build_hasher();
    h.write(bytes);
    h.finish()
}
