//! Hash Index
//!
//! Maps keys to records through the directory and its buckets. Buckets are
//! read through a small write-back cache; the directory lives in memory and
//! is written on flush.

use crate::config::{Config, OpenFlags, OpenMode};
use crate::error::{DbmError, Result};
use crate::storage::StorageFile;

use super::bucket::{self, Bucket, BucketElement};
use super::cache::BucketCache;
use super::directory::Directory;
use super::hash::{self, HASH_BITS};

/// Where a key sits: directory entry it was reached through, the bucket,
/// the slot inside it, and the slot the bucket's walk began at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub dir_index: usize,
    pub bucket_offset: u64,
    pub slot: usize,
    pub start: usize,
}

/// Size and shape of the index, for diagnostics and tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexStats {
    pub block_size: u32,
    pub dir_bits: u32,
    pub buckets: usize,
    pub bucket_elems: u32,
    pub free_regions: usize,
    pub free_bytes: u64,
    pub next_block: u64,
}

/// Result of probing for a key
struct Located {
    hash: u32,
    dir_index: usize,
    bucket_offset: u64,
    slot: Option<usize>,
}

/// The on-disk hash table
pub struct HashIndex {
    pub(crate) storage: StorageFile,
    pub(crate) dir: Directory,
    pub(crate) cache: BucketCache,
    pub(crate) flags: OpenFlags,
    pub(crate) sync_mode: bool,
}

impl HashIndex {
    /// Open the file and either load or lay out the index
    pub fn open(config: &Config, mode: OpenMode) -> Result<Self> {
        let (storage, fresh) = StorageFile::open(config, mode)?;
        let mut index = if fresh {
            Self::bootstrap(storage, config)?
        } else {
            Self::load(storage, config)?
        };
        index.sync_mode = config.flags.contains(OpenFlags::SYNC);
        Ok(index)
    }

    /// Lay out a new file: one block of directory, every entry pointing at
    /// a single empty bucket
    fn bootstrap(mut storage: StorageFile, config: &Config) -> Result<Self> {
        let block_size = storage.block_size();
        let dir_bits = (block_size / 8).trailing_zeros();
        let elems = bucket::elems_for_block(block_size);

        let dir_offset = storage.allocate(Directory::byte_size(dir_bits));
        let bucket_offset = storage.allocate(block_size as u64);
        {
            let header = storage.header_mut();
            header.dir_offset = dir_offset;
            header.dir_bits = dir_bits;
            header.bucket_elems = elems;
        }

        let mut index = Self {
            storage,
            dir: Directory::new(dir_bits, bucket_offset, dir_offset),
            cache: BucketCache::new(config.cache_size),
            flags: config.flags,
            sync_mode: false,
        };
        index.cache_insert(bucket_offset, Bucket::new(0, elems), true)?;
        index.flush()?;
        index.storage.sync()?;
        Ok(index)
    }

    /// Read the directory of an existing file and check it points inside
    /// the allocated area
    fn load(mut storage: StorageFile, config: &Config) -> Result<Self> {
        let (block_size, dir_offset, dir_bits, elems, next_block) = {
            let h = storage.header();
            (h.block_size, h.dir_offset, h.dir_bits, h.bucket_elems, h.next_block)
        };

        if elems != bucket::elems_for_block(block_size) {
            return Err(DbmError::Corrupt(format!(
                "header claims {} slots per bucket, block size {} holds {}",
                elems,
                block_size,
                bucket::elems_for_block(block_size)
            )));
        }
        if dir_bits > HASH_BITS {
            return Err(DbmError::Corrupt(format!(
                "directory depth {} exceeds hash width",
                dir_bits
            )));
        }

        let bytes = storage.read_at(dir_offset, Directory::byte_size(dir_bits) as usize)?;
        let dir = Directory::decode(&bytes, dir_bits, dir_offset);

        let lowest = block_size as u64;
        if let Some(bad) = dir
            .entries
            .iter()
            .find(|&&e| e < lowest || e.saturating_add(block_size as u64) > next_block)
        {
            return Err(storage.fatal(format!(
                "directory entry {} outside allocated area [{}, {})",
                bad, lowest, next_block
            )));
        }

        Ok(Self {
            storage,
            dir,
            cache: BucketCache::new(config.cache_size),
            flags: config.flags,
            sync_mode: false,
        })
    }

    // =========================================================================
    // Bucket Access
    // =========================================================================

    fn read_bucket(&mut self, offset: u64) -> Result<Bucket> {
        let block_size = self.storage.block_size();
        let elems = self.storage.header().bucket_elems;
        let bytes = self.storage.read_at(offset, block_size as usize)?;
        let bucket = Bucket::decode(&bytes, elems)
            .map_err(|msg| self.storage.fatal(format!("bucket at {}: {}", offset, msg)))?;
        if bucket.bits > self.dir.bits {
            return Err(self.storage.fatal(format!(
                "bucket at {} has depth {} above directory depth {}",
                offset, bucket.bits, self.dir.bits
            )));
        }
        Ok(bucket)
    }

    fn write_bucket(&mut self, offset: u64, bucket: &Bucket) -> Result<()> {
        let block = bucket.encode(self.storage.block_size());
        self.storage.write_at(offset, &block)
    }

    fn cache_insert(&mut self, offset: u64, bucket: Bucket, dirty: bool) -> Result<()> {
        let evicted = self.cache.insert(offset, bucket, dirty);
        self.write_back(evicted)
    }

    pub(crate) fn write_back(&mut self, evicted: Vec<(u64, Bucket)>) -> Result<()> {
        for (offset, bucket) in evicted {
            self.write_bucket(offset, &bucket)?;
        }
        Ok(())
    }

    fn ensure_cached(&mut self, offset: u64) -> Result<()> {
        if !self.cache.contains(offset) {
            let bucket = self.read_bucket(offset)?;
            self.cache_insert(offset, bucket, false)?;
        }
        Ok(())
    }

    fn load_bucket(&mut self, offset: u64) -> Result<&Bucket> {
        self.ensure_cached(offset)?;
        match self.cache.get(offset) {
            Some(bucket) => Ok(bucket),
            None => Err(self.storage.fatal(format!("bucket at {} vanished from cache", offset))),
        }
    }

    fn bucket_for_update(&mut self, offset: u64) -> Result<&mut Bucket> {
        self.ensure_cached(offset)?;
        match self.cache.get_mut(offset) {
            Some(bucket) => Ok(bucket),
            None => Err(self.storage.fatal(format!("bucket at {} vanished from cache", offset))),
        }
    }

    fn dir_entry(&self, index: usize) -> Result<u64> {
        self.dir
            .get(index)
            .ok_or_else(|| self.storage.fatal(format!("directory index {} out of range", index)))
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    fn locate(&mut self, key: &[u8]) -> Result<Located> {
        let hash = hash::key_hash(key);
        let dir_index = hash::dir_index(hash, self.dir.bits);
        let bucket_offset = self.dir_entry(dir_index)?;
        let start = hash::key_start(key);

        let candidates: Vec<(usize, BucketElement)> = {
            let bucket = self.load_bucket(bucket_offset)?;
            bucket
                .probe(hash)
                .map(|slot| (slot, bucket.slots[slot]))
                .filter(|(_, e)| {
                    e.hash == hash && e.key_size as usize == key.len() && e.key_start == start
                })
                .collect()
        };

        for (slot, elem) in candidates {
            let stored = self.storage.read_at(elem.data_offset, elem.key_size as usize)?;
            if stored == key {
                return Ok(Located {
                    hash,
                    dir_index,
                    bucket_offset,
                    slot: Some(slot),
                });
            }
        }

        Ok(Located {
            hash,
            dir_index,
            bucket_offset,
            slot: None,
        })
    }

    fn element_at(&mut self, bucket_offset: u64, slot: usize) -> Result<BucketElement> {
        let bucket = self.load_bucket(bucket_offset)?;
        Ok(bucket.slots.get(slot).copied().unwrap_or(BucketElement::EMPTY))
    }

    fn read_value(&mut self, elem: &BucketElement) -> Result<Vec<u8>> {
        self.storage
            .read_at(elem.data_offset + elem.key_size as u64, elem.data_size as usize)
    }

    /// Value stored under `key`
    pub fn fetch(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let located = self.locate(key)?;
        let Some(slot) = located.slot else {
            return Ok(None);
        };
        let elem = self.element_at(located.bucket_offset, slot)?;
        self.read_value(&elem).map(Some)
    }

    pub fn exists(&mut self, key: &[u8]) -> Result<bool> {
        Ok(self.locate(key)?.slot.is_some())
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    fn check_writable(&self) -> Result<()> {
        if self.storage.is_writable() {
            Ok(())
        } else {
            Err(DbmError::ReadOnly)
        }
    }

    /// Insert or overwrite
    pub fn store(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_writable()?;
        let key_size = u32::try_from(key.len())
            .map_err(|_| DbmError::InvalidArgument(format!("key of {} bytes is too large", key.len())))?;
        let data_size = u32::try_from(value.len()).map_err(|_| {
            DbmError::InvalidArgument(format!("value of {} bytes is too large", value.len()))
        })?;
        let record_size = key_size as u64 + data_size as u64;

        let located = self.locate(key)?;
        let (bucket_offset, slot, data_offset) = match located.slot {
            Some(slot) => {
                let old = self.element_at(located.bucket_offset, slot)?;
                let data_offset = if old.record_size() == record_size {
                    old.data_offset
                } else {
                    let offset = self.storage.allocate(record_size);
                    self.storage.free(old.data_offset, old.record_size());
                    offset
                };
                (located.bucket_offset, Some(slot), data_offset)
            }
            None => {
                let bucket_offset = self.make_room(located.hash)?;
                (bucket_offset, None, self.storage.allocate(record_size))
            }
        };

        let mut record = Vec::with_capacity(record_size as usize);
        record.extend_from_slice(key);
        record.extend_from_slice(value);
        self.storage.write_at(data_offset, &record)?;

        let elem = BucketElement {
            hash: located.hash,
            key_start: hash::key_start(key),
            data_offset,
            key_size,
            data_size,
        };
        let bucket = self.bucket_for_update(bucket_offset)?;
        let placed = match slot {
            Some(slot) => {
                bucket.slots[slot] = elem;
                true
            }
            None => bucket.insert(elem).is_some(),
        };
        if !placed {
            return Err(self
                .storage
                .fatal(format!("bucket at {} full after split", bucket_offset)));
        }

        self.after_mutation()
    }

    /// Remove `key`; returns whether it was present
    pub fn delete(&mut self, key: &[u8]) -> Result<bool> {
        self.check_writable()?;
        let located = self.locate(key)?;
        let Some(slot) = located.slot else {
            return Ok(false);
        };

        let removed = self.bucket_for_update(located.bucket_offset)?.remove(slot);
        self.storage.free(removed.data_offset, removed.record_size());
        self.after_mutation()?;
        Ok(true)
    }

    fn after_mutation(&mut self) -> Result<()> {
        if self.sync_mode {
            self.sync()
        } else {
            Ok(())
        }
    }

    /// Split buckets until the one `hash` maps to has a free slot
    fn make_room(&mut self, hash: u32) -> Result<u64> {
        loop {
            let offset = self.dir_entry(hash::dir_index(hash, self.dir.bits))?;
            let (full, bits) = {
                let bucket = self.load_bucket(offset)?;
                (bucket.is_full(), bucket.bits)
            };
            if !full {
                return Ok(offset);
            }
            self.split(hash, offset, bits)?;
        }
    }

    fn split(&mut self, hash: u32, offset: u64, bits: u32) -> Result<()> {
        if bits >= self.dir.bits {
            if self.dir.bits >= HASH_BITS {
                return Err(self
                    .storage
                    .fatal("bucket split would exceed the hash width"));
            }
            self.double_directory();
        }

        let old = match self.cache.remove(offset) {
            Some(bucket) => bucket,
            None => self.read_bucket(offset)?,
        };

        let new_bits = bits + 1;
        let elems = self.storage.header().bucket_elems;
        let mut low = Bucket::new(new_bits, elems);
        let mut high = Bucket::new(new_bits, elems);
        for (_, elem) in old.occupied() {
            let half = if hash::split_bit(elem.hash, new_bits) == 0 {
                &mut low
            } else {
                &mut high
            };
            half.insert(*elem);
        }

        let block_size = self.storage.block_size() as u64;
        let low_offset = self.storage.allocate(block_size);
        let high_offset = self.storage.allocate(block_size);

        let range = self
            .dir
            .range_of(hash::dir_index(hash, self.dir.bits), bits);
        let mid = range.start + range.len() / 2;
        self.dir.set_range(range.start..mid, low_offset);
        self.dir.set_range(mid..range.end, high_offset);
        self.storage.free(offset, block_size);

        tracing::trace!(
            "Split bucket at {} (depth {}): {} low at {}, {} high at {}",
            offset,
            bits,
            low.count,
            low_offset,
            high.count,
            high_offset
        );

        self.cache_insert(low_offset, low, true)?;
        self.cache_insert(high_offset, high, true)
    }

    fn double_directory(&mut self) {
        let old_offset = self.dir.offset;
        let old_size = Directory::byte_size(self.dir.bits);

        self.dir.double();
        let new_offset = self.storage.allocate(Directory::byte_size(self.dir.bits));
        self.storage.free(old_offset, old_size);
        self.dir.offset = new_offset;

        let header = self.storage.header_mut();
        header.dir_offset = new_offset;
        header.dir_bits = self.dir.bits;

        tracing::debug!(
            "Directory doubled to {} bits ({} entries) at {}",
            self.dir.bits,
            self.dir.len(),
            new_offset
        );
    }

    // =========================================================================
    // Traversal Primitives
    // =========================================================================

    /// First entry of a full traversal
    pub fn first_entry(&mut self) -> Result<Option<(Position, Vec<u8>)>> {
        self.walk(0, None)
    }

    /// Entry following `position` in traversal order
    pub fn entry_after(&mut self, position: &Position) -> Result<Option<(Position, Vec<u8>)>> {
        self.walk(position.dir_index, Some((position.start, position.slot, 1)))
    }

    /// Entry at `position`, or the next one when its slot is now empty
    pub fn entry_at(&mut self, position: &Position) -> Result<Option<(Position, Vec<u8>)>> {
        self.walk(position.dir_index, Some((position.start, position.slot, 0)))
    }

    /// Walk buckets in directory order, each once. Within a bucket slots
    /// are visited cyclically from its walk start. `resume` continues a
    /// bucket walk already under way: its start, a slot, and how far past
    /// that slot to begin.
    fn walk(
        &mut self,
        mut dir_index: usize,
        mut resume: Option<(usize, usize, usize)>,
    ) -> Result<Option<(Position, Vec<u8>)>> {
        while dir_index < self.dir.len() {
            let bucket_offset = self.dir_entry(dir_index)?;
            let found = {
                let bucket = self.load_bucket(bucket_offset)?;
                let (start, step) = match resume.take() {
                    Some((start, slot, skip)) => (start, bucket.walk_step(start, slot) + skip),
                    None => (bucket.walk_start(), 0),
                };
                bucket
                    .occupied_from(start, step)
                    .map(|(slot, elem)| (start, slot, elem))
            };
            if let Some((start, slot, elem)) = found {
                let key = self.storage.read_at(elem.data_offset, elem.key_size as usize)?;
                return Ok(Some((
                    Position {
                        dir_index,
                        bucket_offset,
                        slot,
                        start,
                    },
                    key,
                )));
            }
            dir_index = self.dir.next_distinct(dir_index);
        }
        Ok(None)
    }

    /// Whether `position` still names the same bucket
    pub fn is_current(&self, position: &Position) -> bool {
        self.dir.get(position.dir_index) == Some(position.bucket_offset)
    }

    /// Key stored at `position`, if the position is still valid and occupied
    pub fn key_at(&mut self, position: &Position) -> Result<Option<Vec<u8>>> {
        if !self.is_current(position) {
            return Ok(None);
        }
        let elem = self.element_at(position.bucket_offset, position.slot)?;
        if elem.is_empty() {
            return Ok(None);
        }
        self.storage
            .read_at(elem.data_offset, elem.key_size as usize)
            .map(Some)
    }

    /// Value stored at `position`
    pub fn value_at(&mut self, position: &Position) -> Result<Option<Vec<u8>>> {
        if !self.is_current(position) {
            return Ok(None);
        }
        let elem = self.element_at(position.bucket_offset, position.slot)?;
        if elem.is_empty() {
            return Ok(None);
        }
        self.read_value(&elem).map(Some)
    }

    pub fn position_of(&mut self, key: &[u8]) -> Result<Option<Position>> {
        let located = self.locate(key)?;
        let Some(slot) = located.slot else {
            return Ok(None);
        };
        let start = self.load_bucket(located.bucket_offset)?.walk_start();
        Ok(Some(Position {
            dir_index: located.dir_index,
            bucket_offset: located.bucket_offset,
            slot,
            start,
        }))
    }

    pub fn first_key(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.first_entry()?.map(|(_, key)| key))
    }

    /// Key after `key` in traversal order; `None` at the end or when `key`
    /// is not stored
    pub fn next_key(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.position_of(key)? {
            Some(pos) => Ok(self.entry_after(&pos)?.map(|(_, k)| k)),
            None => Ok(None),
        }
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Write dirty buckets, the directory and the header
    pub fn flush(&mut self) -> Result<()> {
        if !self.storage.is_writable() {
            return Ok(());
        }

        let dirty: Vec<(u64, Vec<u8>)> = {
            let block_size = self.storage.block_size();
            self.cache
                .dirty()
                .into_iter()
                .map(|(offset, bucket)| (offset, bucket.encode(block_size)))
                .collect()
        };
        for (offset, block) in dirty {
            self.storage.write_at(offset, &block)?;
            self.cache.mark_clean(offset);
        }

        if self.dir.is_dirty() {
            let bytes = self.dir.encode();
            self.storage.write_at(self.dir.offset, &bytes)?;
            self.dir.mark_clean();
        }

        self.storage.write_header()
    }

    /// Flush and force the file to disk
    pub fn sync(&mut self) -> Result<()> {
        self.flush()?;
        if self.storage.is_writable() {
            self.storage.sync()?;
        }
        Ok(())
    }

    /// Final flush; dropping the index releases the lock
    pub fn close(mut self) -> Result<()> {
        if self.storage.is_writable() {
            self.sync()?;
            self.storage.truncate_to_frontier()?;
        }
        tracing::debug!("Closed {:?}", self.storage.path());
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn is_writable(&self) -> bool {
        self.storage.is_writable()
    }

    pub fn sync_mode(&self) -> bool {
        self.sync_mode
    }

    pub fn set_sync_mode(&mut self, on: bool) {
        self.sync_mode = on;
    }

    pub fn cache_size(&self) -> usize {
        self.cache.capacity()
    }

    pub fn storage(&self) -> &StorageFile {
        &self.storage
    }

    pub fn stats(&self) -> IndexStats {
        let header = self.storage.header();
        IndexStats {
            block_size: header.block_size,
            dir_bits: self.dir.bits,
            buckets: self.dir.bucket_count(),
            bucket_elems: header.bucket_elems,
            free_regions: header.avail.len(),
            free_bytes: header.avail.free_bytes(),
            next_block: header.next_block,
        }
    }
}
