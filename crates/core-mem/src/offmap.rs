//! Open-addressed hash map stored entirely inside a buffer region.
//!
//! Pages map cell offsets to hyperlink ids with one of these. Buckets,
//! occupancy metadata, keys, and values all live in the caller's region at
//! fixed offsets, so the map relocates with its page. Linear probing with
//! tombstones; capacity is fixed at layout time (a power of two) and
//! insertion fails with [`MemError::OutOfMemory`] when full.

use crate::offset::Offset;
use crate::{MemError, align_up, stable_hash};
use bytemuck::{Pod, Zeroable};
use std::marker::PhantomData;

#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
struct MapHeader {
    len: u32,
    _pad: u32,
}

/// Region layout for a map with `cap` buckets (rounded up to a power of two).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetMapLayout {
    pub cap: usize,
    bitmap_words: usize,
    used_start: usize,
    tomb_start: usize,
    keys_start: usize,
    values_start: usize,
    pub total_size: usize,
}

impl OffsetMapLayout {
    pub fn new<K: Pod, V: Pod>(cap: usize) -> Self {
        let cap = cap.max(2).next_power_of_two();
        let bitmap_words = cap.div_ceil(64);
        let used_start = align_up(size_of::<MapHeader>(), 8);
        let tomb_start = used_start + bitmap_words * 8;
        let keys_start = align_up(tomb_start + bitmap_words * 8, align_of::<K>().max(8));
        let values_start = align_up(keys_start + cap * size_of::<K>(), align_of::<V>().max(8));
        let total_size = align_up(values_start + cap * size_of::<V>(), 8);
        Self {
            cap,
            bitmap_words,
            used_start,
            tomb_start,
            keys_start,
            values_start,
            total_size,
        }
    }
}

/// Transient view of a map stored inside `region`.
pub struct OffsetMap<'a, K: Pod + PartialEq, V: Pod> {
    region: &'a mut [u8],
    layout: OffsetMapLayout,
    _marker: PhantomData<(K, V)>,
}

impl<'a, K: Pod + PartialEq, V: Pod> OffsetMap<'a, K, V> {
    #[inline]
    pub fn bind(region: &'a mut [u8], layout: OffsetMapLayout) -> Self {
        debug_assert!(region.len() >= layout.total_size);
        Self {
            region,
            layout,
            _marker: PhantomData,
        }
    }

    pub fn init(region: &'a mut [u8], layout: OffsetMapLayout) -> Self {
        let mut this = Self::bind(region, layout);
        this.region[..layout.total_size].fill(0);
        this
    }

    pub fn len(&self) -> usize {
        Offset::<MapHeader>::new(0).deref(self.region).len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let mut idx = self.start_index(key);
        for _ in 0..self.layout.cap {
            if self.used(idx) {
                if self.keys()[idx] == *key {
                    return Some(self.values()[idx]);
                }
            } else if !self.tomb(idx) {
                return None;
            }
            idx = (idx + 1) & (self.layout.cap - 1);
        }
        None
    }

    /// Insert or replace. Returns the previous value for the key, if any.
    pub fn put(&mut self, key: K, value: V) -> Result<Option<V>, MemError> {
        let mut idx = self.start_index(&key);
        let mut first_free: Option<usize> = None;
        for _ in 0..self.layout.cap {
            if self.used(idx) {
                if self.keys()[idx] == key {
                    let old = self.values()[idx];
                    self.values_mut()[idx] = value;
                    return Ok(Some(old));
                }
            } else {
                if first_free.is_none() {
                    first_free = Some(idx);
                }
                if !self.tomb(idx) {
                    break;
                }
            }
            idx = (idx + 1) & (self.layout.cap - 1);
        }
        let slot = first_free.ok_or(MemError::OutOfMemory)?;
        if self.len() >= self.layout.cap {
            return Err(MemError::OutOfMemory);
        }
        self.keys_mut()[slot] = key;
        self.values_mut()[slot] = value;
        self.set_used(slot, true);
        self.set_tomb(slot, false);
        let h = Offset::<MapHeader>::new(0).deref_mut(self.region);
        h.len += 1;
        Ok(None)
    }

    /// Remove a key, returning its value if present.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let mut idx = self.start_index(key);
        for _ in 0..self.layout.cap {
            if self.used(idx) {
                if self.keys()[idx] == *key {
                    let old = self.values()[idx];
                    self.set_used(idx, false);
                    self.set_tomb(idx, true);
                    let h = Offset::<MapHeader>::new(0).deref_mut(self.region);
                    h.len -= 1;
                    return Some(old);
                }
            } else if !self.tomb(idx) {
                return None;
            }
            idx = (idx + 1) & (self.layout.cap - 1);
        }
        None
    }

    /// Iterate live entries in bucket order.
    pub fn iter(&self) -> impl Iterator<Item = (K, V)> + '_ {
        (0..self.layout.cap)
            .filter(|&i| self.used(i))
            .map(move |i| (self.keys()[i], self.values()[i]))
    }

    #[inline]
    fn start_index(&self, key: &K) -> usize {
        stable_hash(bytemuck::bytes_of(key)) as usize & (self.layout.cap - 1)
    }

    #[inline]
    fn used(&self, idx: usize) -> bool {
        self.bitmap(self.layout.used_start)[idx / 64] & (1u64 << (idx % 64)) != 0
    }

    #[inline]
    fn tomb(&self, idx: usize) -> bool {
        self.bitmap(self.layout.tomb_start)[idx / 64] & (1u64 << (idx % 64)) != 0
    }

    #[inline]
    fn set_used(&mut self, idx: usize, on: bool) {
        let w = &mut self.bitmap_mut(self.layout.used_start)[idx / 64];
        if on {
            *w |= 1u64 << (idx % 64);
        } else {
            *w &= !(1u64 << (idx % 64));
        }
    }

    #[inline]
    fn set_tomb(&mut self, idx: usize, on: bool) {
        let w = &mut self.bitmap_mut(self.layout.tomb_start)[idx / 64];
        if on {
            *w |= 1u64 << (idx % 64);
        } else {
            *w &= !(1u64 << (idx % 64));
        }
    }

    #[inline]
    fn bitmap(&self, start: usize) -> &[u64] {
        Offset::<u64>::new(start).slice(self.region, self.layout.bitmap_words)
    }

    #[inline]
    fn bitmap_mut(&mut self, start: usize) -> &mut [u64] {
        Offset::<u64>::new(start).slice_mut(self.region, self.layout.bitmap_words)
    }

    #[inline]
    fn keys(&self) -> &[K] {
        Offset::<K>::new(self.layout.keys_start).slice(self.region, self.layout.cap)
    }

    #[inline]
    fn keys_mut(&mut self) -> &mut [K] {
        Offset::<K>::new(self.layout.keys_start).slice_mut(self.region, self.layout.cap)
    }

    #[inline]
    fn values(&self) -> &[V] {
        Offset::<V>::new(self.layout.values_start).slice(self.region, self.layout.cap)
    }

    #[inline]
    fn values_mut(&mut self) -> &mut [V] {
        Offset::<V>::new(self.layout.values_start).slice_mut(self.region, self.layout.cap)
    }
}

/// Read-only view of a map stored inside `region`.
pub struct OffsetMapReader<'a, K: Pod + PartialEq, V: Pod> {
    region: &'a [u8],
    layout: OffsetMapLayout,
    _marker: PhantomData<(K, V)>,
}

impl<'a, K: Pod + PartialEq, V: Pod> OffsetMapReader<'a, K, V> {
    #[inline]
    pub fn bind(region: &'a [u8], layout: OffsetMapLayout) -> Self {
        debug_assert!(region.len() >= layout.total_size);
        Self {
            region,
            layout,
            _marker: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        Offset::<MapHeader>::new(0).deref(self.region).len as usize
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let mut idx = stable_hash(bytemuck::bytes_of(key)) as usize & (self.layout.cap - 1);
        for _ in 0..self.layout.cap {
            if self.used(idx) {
                if self.keys()[idx] == *key {
                    return Some(self.values()[idx]);
                }
            } else if !self.tomb(idx) {
                return None;
            }
            idx = (idx + 1) & (self.layout.cap - 1);
        }
        None
    }

    pub fn iter(&self) -> impl Iterator<Item = (K, V)> + '_ {
        (0..self.layout.cap)
            .filter(|&i| self.used(i))
            .map(move |i| (self.keys()[i], self.values()[i]))
    }

    #[inline]
    fn used(&self, idx: usize) -> bool {
        self.bitmap(self.layout.used_start)[idx / 64] & (1u64 << (idx % 64)) != 0
    }

    #[inline]
    fn tomb(&self, idx: usize) -> bool {
        self.bitmap(self.layout.tomb_start)[idx / 64] & (1u64 << (idx % 64)) != 0
    }

    #[inline]
    fn bitmap(&self, start: usize) -> &[u64] {
        Offset::<u64>::new(start).slice(self.region, self.layout.bitmap_words)
    }

    #[inline]
    fn keys(&self) -> &[K] {
        Offset::<K>::new(self.layout.keys_start).slice(self.region, self.layout.cap)
    }

    #[inline]
    fn values(&self) -> &[V] {
        Offset::<V>::new(self.layout.values_start).slice(self.region, self.layout.cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_region(layout: OffsetMapLayout) -> Vec<u8> {
        vec![0u8; layout.total_size]
    }

    #[test]
    fn put_get_remove() {
        let layout = OffsetMapLayout::new::<u32, u16>(16);
        let mut buf = map_region(layout);
        let mut map = OffsetMap::<u32, u16>::init(&mut buf, layout);

        assert_eq!(map.put(10, 1).unwrap(), None);
        assert_eq!(map.put(20, 2).unwrap(), None);
        assert_eq!(map.get(&10), Some(1));
        assert_eq!(map.get(&20), Some(2));
        assert_eq!(map.get(&30), None);
        assert_eq!(map.len(), 2);

        assert_eq!(map.put(10, 9).unwrap(), Some(1));
        assert_eq!(map.get(&10), Some(9));
        assert_eq!(map.len(), 2);

        assert_eq!(map.remove(&10), Some(9));
        assert_eq!(map.get(&10), None);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn tombstones_keep_chains_reachable() {
        let layout = OffsetMapLayout::new::<u32, u16>(8);
        let mut buf = map_region(layout);
        let mut map = OffsetMap::<u32, u16>::init(&mut buf, layout);
        for k in 0..6u32 {
            map.put(k, k as u16).unwrap();
        }
        map.remove(&3);
        for k in 0..6u32 {
            let want = if k == 3 { None } else { Some(k as u16) };
            assert_eq!(map.get(&k), want, "key {k}");
        }
    }

    #[test]
    fn full_map_reports_oom() {
        let layout = OffsetMapLayout::new::<u32, u16>(4);
        let mut buf = map_region(layout);
        let mut map = OffsetMap::<u32, u16>::init(&mut buf, layout);
        for k in 0..4u32 {
            map.put(k, 0).unwrap();
        }
        assert_eq!(map.put(99, 0), Err(MemError::OutOfMemory));
        // Replacing an existing key still works at capacity.
        assert!(map.put(2, 7).is_ok());
    }

    #[test]
    fn iteration_sees_every_live_entry() {
        let layout = OffsetMapLayout::new::<u32, u16>(16);
        let mut buf = map_region(layout);
        let mut map = OffsetMap::<u32, u16>::init(&mut buf, layout);
        for k in 0..10u32 {
            map.put(k, (k * 2) as u16).unwrap();
        }
        map.remove(&4);
        let mut got: Vec<(u32, u16)> = map.iter().collect();
        got.sort_unstable();
        let want: Vec<(u32, u16)> = (0..10u32).filter(|&k| k != 4).map(|k| (k, (k * 2) as u16)).collect();
        assert_eq!(got, want);
    }

    #[test]
    fn survives_region_relocation() {
        let layout = OffsetMapLayout::new::<u32, u16>(8);
        let mut buf = map_region(layout);
        {
            let mut map = OffsetMap::<u32, u16>::init(&mut buf, layout);
            map.put(5, 55).unwrap();
        }
        let mut moved = buf.clone();
        let map = OffsetMap::<u32, u16>::bind(&mut moved, layout);
        assert_eq!(map.get(&5), Some(55));
    }
}
