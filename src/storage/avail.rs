//! Avail List
//!
//! Free-space table kept in the header block. Entries are sorted by size so
//! allocation is a best-fit scan; neighbouring regions coalesce on release.

use serde::{Deserialize, Serialize};

/// Remainders smaller than this stay attached to the allocation
pub const MIN_SPLIT: u64 = 16;

/// Encoded size of one entry in the header block
pub const AVAIL_ELEM_SIZE: usize = 16;

/// A free region of the file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailElem {
    pub offset: u64,
    pub size: u64,
}

/// Bounded, size-ordered list of free regions
#[derive(Debug, Clone, Default)]
pub struct AvailList {
    elems: Vec<AvailElem>,
    capacity: usize,
}

impl AvailList {
    pub fn new(capacity: usize) -> Self {
        Self {
            elems: Vec::new(),
            capacity,
        }
    }

    /// Rebuild from decoded entries, dropping the smallest beyond capacity
    pub fn from_elems(mut elems: Vec<AvailElem>, capacity: usize) -> Self {
        elems.sort_by_key(|e| (e.size, e.offset));
        let excess = elems.len().saturating_sub(capacity);
        elems.drain(..excess);
        Self { elems, capacity }
    }

    /// Take `size` bytes from the smallest region that fits.
    ///
    /// Returns the offset of the allocation.
    pub fn take(&mut self, size: u64) -> Option<u64> {
        let pos = self.elems.iter().position(|e| e.size >= size)?;
        let elem = self.elems.remove(pos);

        let rest = elem.size - size;
        if rest >= MIN_SPLIT {
            self.insert(AvailElem {
                offset: elem.offset + size,
                size: rest,
            });
        }
        Some(elem.offset)
    }

    /// Return a region to the list.
    ///
    /// Adjacent regions are merged. If the list overflows, the smallest
    /// entry is dropped and returned so the caller can report the leak.
    pub fn release(&mut self, offset: u64, size: u64) -> Option<AvailElem> {
        let mut merged = AvailElem { offset, size };

        while let Some(pos) = self.elems.iter().position(|e| {
            e.offset + e.size == merged.offset || merged.offset + merged.size == e.offset
        }) {
            let neighbour = self.elems.remove(pos);
            merged = AvailElem {
                offset: neighbour.offset.min(merged.offset),
                size: neighbour.size + merged.size,
            };
        }

        self.insert(merged);

        if self.elems.len() > self.capacity {
            Some(self.elems.remove(0))
        } else {
            None
        }
    }

    /// Remove and return the region ending exactly at `end`, if any
    pub fn take_ending_at(&mut self, end: u64) -> Option<AvailElem> {
        let pos = self.elems.iter().position(|e| e.offset + e.size == end)?;
        Some(self.elems.remove(pos))
    }

    fn insert(&mut self, elem: AvailElem) {
        let pos = self
            .elems
            .binary_search_by_key(&(elem.size, elem.offset), |e| (e.size, e.offset))
            .unwrap_or_else(|p| p);
        self.elems.insert(pos, elem);
    }

    pub fn elems(&self) -> &[AvailElem] {
        &self.elems
    }

    pub fn len(&self) -> usize {
        self.elems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total bytes currently reusable
    pub fn free_bytes(&self) -> u64 {
        self.elems.iter().map(|e| e.size).sum()
    }
}
