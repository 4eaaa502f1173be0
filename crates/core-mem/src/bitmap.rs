//! Fixed-chunk bitmap sub-allocator over a buffer region.
//!
//! Pages need somewhere to put variable-length byte strings (hyperlink URIs,
//! explicit hyperlink ids) without a heap allocation per string. This
//! allocator carves a caller-provided region into power-of-two chunks and
//! tracks them with one bit per chunk (1 = free). An allocation is a run of
//! consecutive free chunks found *within a single 64-bit bitmap word* by
//! repeated shift-and-AND, which caps any one allocation at 63 chunks —
//! callers choose `chunk_size` so their strings fit well under that.
//!
//! Fragmentation is accepted; the chunk granularity bounds it.
//!
//! The allocator itself holds no state outside the region: the bitmap lives
//! at the front of the region, so relocating the region relocates the
//! allocator. [`BitmapAlloc`] is a transient view bound to the region slice
//! for the duration of one operation.

use crate::offset::{Offset, OffsetSlice};
use crate::{MemError, align_up};
use bytemuck::Pod;

/// Region layout computed from a chunk size and a requested capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitmapLayout {
    /// Chunk size in bytes. Power of two.
    pub chunk_size: usize,
    /// Number of allocatable chunks.
    pub chunk_count: usize,
    /// Byte offset of the bitmap within the region (always 0).
    pub bitmap_start: usize,
    /// Number of 64-bit bitmap words.
    pub bitmap_words: usize,
    /// Byte offset of the first chunk within the region.
    pub chunks_start: usize,
    /// Total region size in bytes.
    pub total_size: usize,
}

impl BitmapLayout {
    /// Chunk index containing a region-relative byte offset.
    pub fn chunk_of(&self, byte_off: usize) -> usize {
        debug_assert!(byte_off >= self.chunks_start);
        (byte_off - self.chunks_start) / self.chunk_size
    }

    /// Read a chunk's free bit without binding a mutable view.
    pub fn chunk_is_free(&self, region: &[u8], chunk: usize) -> bool {
        debug_assert!(chunk < self.chunk_count);
        let words: &[u64] =
            Offset::<u64>::new(self.bitmap_start).slice(region, self.bitmap_words);
        words[chunk / 64] & (1u64 << (chunk % 64)) != 0
    }

    /// Layout for at least `capacity` bytes of allocatable storage split into
    /// `chunk_size`-byte chunks.
    pub fn new(chunk_size: usize, capacity: usize) -> Self {
        assert!(chunk_size.is_power_of_two(), "chunk size must be a power of two");
        let chunk_count = capacity.div_ceil(chunk_size);
        let bitmap_words = chunk_count.div_ceil(64);
        let chunks_start = align_up(bitmap_words * 8, chunk_size.max(8));
        Self {
            chunk_size,
            chunk_count,
            bitmap_start: 0,
            bitmap_words,
            chunks_start,
            total_size: chunks_start + chunk_count * chunk_size,
        }
    }
}

/// Transient allocator view over a region slice.
pub struct BitmapAlloc<'a> {
    region: &'a mut [u8],
    layout: BitmapLayout,
}

impl<'a> BitmapAlloc<'a> {
    /// Bind to an already-initialized region.
    #[inline]
    pub fn bind(region: &'a mut [u8], layout: BitmapLayout) -> Self {
        debug_assert!(region.len() >= layout.total_size);
        Self { region, layout }
    }

    /// Initialize the region: every chunk free, tail bits of the last bitmap
    /// word held permanently allocated so runs never extend past capacity.
    pub fn init(region: &'a mut [u8], layout: BitmapLayout) -> Self {
        let mut this = Self::bind(region, layout);
        {
            let words = this.words_mut();
            for w in words.iter_mut() {
                *w = u64::MAX;
            }
            let tail = layout.chunk_count % 64;
            if tail != 0 {
                let last = words.len() - 1;
                words[last] = (1u64 << tail) - 1;
            }
        }
        this
    }

    #[inline]
    fn words(&self) -> &[u64] {
        let off: Offset<u64> = Offset::new(self.layout.bitmap_start);
        off.slice(self.region, self.layout.bitmap_words)
    }

    #[inline]
    fn words_mut(&mut self) -> &mut [u64] {
        let off: Offset<u64> = Offset::new(self.layout.bitmap_start);
        off.slice_mut(self.region, self.layout.bitmap_words)
    }

    /// Allocate `len` bytes, rounded up to whole chunks. The returned slice
    /// offset is relative to the region start.
    pub fn alloc(&mut self, len: usize) -> Result<OffsetSlice<u8>, MemError> {
        if len == 0 {
            return Ok(OffsetSlice::empty());
        }
        let k = len.div_ceil(self.layout.chunk_size);
        // Single-word search: runs of 64+ chunks are not supported.
        if k >= 64 {
            return Err(MemError::OutOfMemory);
        }
        let chunk = self.find_run(k as u32).ok_or(MemError::OutOfMemory)?;
        self.set_run(chunk, k, false);
        let byte_off = self.layout.chunks_start + chunk * self.layout.chunk_size;
        Ok(OffsetSlice::new(Offset::new(byte_off), len))
    }

    /// Allocate a typed slice of `n` items. `chunk_size` must be a multiple
    /// of `align_of::<T>()` so every chunk boundary is aligned for `T`.
    pub fn alloc_items<T: Pod>(&mut self, n: usize) -> Result<OffsetSlice<T>, MemError> {
        assert!(self.layout.chunk_size % align_of::<T>() == 0);
        let raw = self.alloc(n * size_of::<T>())?;
        Ok(OffsetSlice::new(raw.offset().cast(), n))
    }

    /// Return a previously allocated slice to the free pool.
    pub fn free(&mut self, slice: OffsetSlice<u8>) {
        if slice.is_empty() {
            return;
        }
        let byte_off = slice.offset().byte_offset();
        debug_assert!(byte_off >= self.layout.chunks_start);
        debug_assert!((byte_off - self.layout.chunks_start) % self.layout.chunk_size == 0);
        let chunk = (byte_off - self.layout.chunks_start) / self.layout.chunk_size;
        let k = slice.len().div_ceil(self.layout.chunk_size);
        self.set_run(chunk, k, true);
    }

    /// Free a typed slice allocated with [`Self::alloc_items`].
    pub fn free_items<T: Pod>(&mut self, slice: OffsetSlice<T>) {
        self.free(OffsetSlice::new(
            slice.offset().cast(),
            slice.len() * size_of::<T>(),
        ));
    }

    /// Number of currently free chunks.
    pub fn free_chunks(&self) -> usize {
        self.words().iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Whether a specific chunk is free. Test/diagnostic helper.
    pub fn is_free(&self, chunk: usize) -> bool {
        debug_assert!(chunk < self.layout.chunk_count);
        self.words()[chunk / 64] & (1u64 << (chunk % 64)) != 0
    }

    /// First chunk index of a run of `k` free chunks, searching one bitmap
    /// word at a time: AND-ing a word with itself shifted right `k-1` times
    /// leaves a set bit exactly where `k` consecutive free bits begin.
    fn find_run(&self, k: u32) -> Option<usize> {
        for (wi, &w) in self.words().iter().enumerate() {
            if w == 0 {
                continue;
            }
            let mut m = w;
            for _ in 1..k {
                m &= m >> 1;
            }
            if m != 0 {
                return Some(wi * 64 + m.trailing_zeros() as usize);
            }
        }
        None
    }

    fn set_run(&mut self, chunk: usize, k: usize, free: bool) {
        debug_assert!(chunk / 64 == (chunk + k - 1) / 64, "run crosses a word");
        let mask = if k == 64 {
            u64::MAX
        } else {
            ((1u64 << k) - 1) << (chunk % 64)
        };
        let word = &mut self.words_mut()[chunk / 64];
        if free {
            debug_assert!(*word & mask == 0, "double free");
            *word |= mask;
        } else {
            debug_assert!(*word & mask == mask, "allocating used chunks");
            *word &= !mask;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(layout: BitmapLayout) -> Vec<u8> {
        vec![0u8; layout.total_size]
    }

    #[test]
    fn layout_shapes() {
        let l = BitmapLayout::new(16, 1024);
        assert_eq!(l.chunk_count, 64);
        assert_eq!(l.bitmap_words, 1);
        assert_eq!(l.chunks_start % 16, 0);
        assert_eq!(l.total_size, l.chunks_start + 1024);
    }

    #[test]
    fn alloc_free_roundtrip() {
        let l = BitmapLayout::new(16, 1024);
        let mut buf = region(l);
        let mut a = BitmapAlloc::init(&mut buf, l);
        assert_eq!(a.free_chunks(), 64);

        let s = a.alloc(40).unwrap(); // 3 chunks
        assert_eq!(s.len(), 40);
        assert_eq!(a.free_chunks(), 61);
        assert!(s.offset().byte_offset() >= l.chunks_start);

        a.free(s);
        assert_eq!(a.free_chunks(), 64);
    }

    #[test]
    fn distinct_allocations_do_not_overlap() {
        let l = BitmapLayout::new(8, 512);
        let mut buf = region(l);
        let mut a = BitmapAlloc::init(&mut buf, l);
        let s1 = a.alloc(24).unwrap();
        let s2 = a.alloc(24).unwrap();
        let (o1, o2) = (s1.offset().byte_offset(), s2.offset().byte_offset());
        assert!(o1 + 24 <= o2 || o2 + 24 <= o1);
    }

    #[test]
    fn exhaustion_reports_oom() {
        let l = BitmapLayout::new(16, 64); // 4 chunks
        let mut buf = region(l);
        let mut a = BitmapAlloc::init(&mut buf, l);
        a.alloc(64).unwrap();
        assert_eq!(a.alloc(1), Err(MemError::OutOfMemory));
    }

    #[test]
    fn freed_space_is_reused() {
        let l = BitmapLayout::new(16, 64);
        let mut buf = region(l);
        let mut a = BitmapAlloc::init(&mut buf, l);
        let s1 = a.alloc(64).unwrap();
        a.free(s1);
        let s2 = a.alloc(16).unwrap();
        assert_eq!(s2.offset(), s1.offset());
    }

    #[test]
    fn oversized_run_rejected() {
        let l = BitmapLayout::new(8, 4096);
        let mut buf = region(l);
        let mut a = BitmapAlloc::init(&mut buf, l);
        // 64 chunks would need a cross-word run.
        assert_eq!(a.alloc(8 * 64), Err(MemError::OutOfMemory));
        // 63 chunks is the documented ceiling.
        assert!(a.alloc(8 * 63).is_ok());
    }

    #[test]
    fn allocator_state_survives_region_copy() {
        let l = BitmapLayout::new(16, 256);
        let mut buf = region(l);
        let s = {
            let mut a = BitmapAlloc::init(&mut buf, l);
            a.alloc(30).unwrap()
        };
        s.get_mut(&mut buf)[..5].copy_from_slice(b"hello");
        let mut moved = buf.clone();
        assert_eq!(&s.get(&moved)[..5], b"hello");
        let mut a = BitmapAlloc::bind(&mut moved, l);
        let before = a.free_chunks();
        a.free(s);
        assert_eq!(a.free_chunks(), before + 2);
    }
}
