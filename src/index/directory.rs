//! Bucket Directory
//!
//! `1 << bits` bucket offsets indexed by the top `bits` of a key hash. A
//! bucket of local depth `d` owns a contiguous run of `1 << (bits - d)`
//! entries, which is what lets traversal visit each bucket exactly once.

use std::ops::Range;

/// In-memory directory
#[derive(Debug, Clone)]
pub struct Directory {
    /// Global depth
    pub bits: u32,
    /// Bucket offset per entry
    pub entries: Vec<u64>,
    /// Where the directory is stored in the file
    pub offset: u64,
    dirty: bool,
}

impl Directory {
    /// A directory whose entries all point at one bucket
    pub fn new(bits: u32, bucket_offset: u64, offset: u64) -> Self {
        Self {
            bits,
            entries: vec![bucket_offset; 1usize << bits],
            offset,
            dirty: true,
        }
    }

    /// Bytes needed on disk for a directory of depth `bits`
    pub fn byte_size(bits: u32) -> u64 {
        8u64 << bits
    }

    pub fn decode(bytes: &[u8], bits: u32, offset: u64) -> Self {
        let entries = bytes
            .chunks_exact(8)
            .take(1usize << bits)
            .map(|chunk| {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(chunk);
                u64::from_le_bytes(raw)
            })
            .collect();
        Self {
            bits,
            entries,
            offset,
            dirty: false,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        self.entries.iter().flat_map(|e| e.to_le_bytes()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, index: usize) -> Option<u64> {
        self.entries.get(index).copied()
    }

    /// Double the directory; every entry is duplicated in place
    pub fn double(&mut self) {
        self.entries = self.entries.iter().flat_map(|&e| [e, e]).collect();
        self.bits += 1;
        self.dirty = true;
    }

    /// Entries owned by the bucket of depth `local_bits` that `index` maps to
    pub fn range_of(&self, index: usize, local_bits: u32) -> Range<usize> {
        let span_bits = self.bits - local_bits;
        let start = (index >> span_bits) << span_bits;
        start..start + (1usize << span_bits)
    }

    pub fn set_range(&mut self, range: Range<usize>, bucket_offset: u64) {
        for entry in &mut self.entries[range] {
            *entry = bucket_offset;
        }
        self.dirty = true;
    }

    /// First entry after `index` that points at a different bucket
    pub fn next_distinct(&self, index: usize) -> usize {
        let Some(current) = self.get(index) else {
            return self.len();
        };
        let mut next = index;
        while next < self.len() && self.entries[next] == current {
            next += 1;
        }
        next
    }

    /// Number of distinct buckets referenced
    pub fn bucket_count(&self) -> usize {
        let mut count = 0;
        let mut index = 0;
        while index < self.len() {
            count += 1;
            index = self.next_distinct(index);
        }
        count
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }
}
