//! Bucket Cache
//!
//! Bounded set of decoded buckets keyed by file offset. Eviction is FIFO;
//! evicted dirty buckets are handed back so the index can write them.

use std::collections::{HashMap, VecDeque};

use super::bucket::Bucket;

struct CachedBucket {
    bucket: Bucket,
    dirty: bool,
}

pub struct BucketCache {
    entries: HashMap<u64, CachedBucket>,
    /// Insertion order, oldest first
    order: VecDeque<u64>,
    capacity: usize,
}

impl BucketCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn contains(&self, offset: u64) -> bool {
        self.entries.contains_key(&offset)
    }

    pub fn get(&self, offset: u64) -> Option<&Bucket> {
        self.entries.get(&offset).map(|c| &c.bucket)
    }

    /// Mutable access; marks the bucket dirty
    pub fn get_mut(&mut self, offset: u64) -> Option<&mut Bucket> {
        self.entries.get_mut(&offset).map(|c| {
            c.dirty = true;
            &mut c.bucket
        })
    }

    /// Add a bucket, returning dirty buckets pushed out to make room
    pub fn insert(&mut self, offset: u64, bucket: Bucket, dirty: bool) -> Vec<(u64, Bucket)> {
        if self.entries.insert(offset, CachedBucket { bucket, dirty }).is_none() {
            self.order.push_back(offset);
        }
        self.evict_to(self.capacity, Some(offset))
    }

    pub fn remove(&mut self, offset: u64) -> Option<Bucket> {
        self.order.retain(|&o| o != offset);
        self.entries.remove(&offset).map(|c| c.bucket)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Change the capacity, returning dirty buckets that no longer fit
    pub fn set_capacity(&mut self, capacity: usize) -> Vec<(u64, Bucket)> {
        self.capacity = capacity.max(1);
        self.evict_to(self.capacity, None)
    }

    /// Dirty buckets in insertion order
    pub fn dirty(&self) -> Vec<(u64, &Bucket)> {
        self.order
            .iter()
            .filter_map(|o| self.entries.get(o).filter(|c| c.dirty).map(|c| (*o, &c.bucket)))
            .collect()
    }

    pub fn mark_clean(&mut self, offset: u64) {
        if let Some(c) = self.entries.get_mut(&offset) {
            c.dirty = false;
        }
    }

    fn evict_to(&mut self, capacity: usize, keep: Option<u64>) -> Vec<(u64, Bucket)> {
        let mut written_back = Vec::new();
        let mut skipped = Vec::new();

        while self.entries.len() > capacity {
            let Some(offset) = self.order.pop_front() else {
                break;
            };
            if Some(offset) == keep {
                skipped.push(offset);
                continue;
            }
            if let Some(cached) = self.entries.remove(&offset) {
                if cached.dirty {
                    written_back.push((offset, cached.bucket));
                }
            }
        }

        for offset in skipped.into_iter().rev() {
            self.order.push_front(offset);
        }
        written_back
    }
}
