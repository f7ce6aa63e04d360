//! Hash Bucket
//!
//! A fixed-size block of slots addressed by linear probing.
//!
//! ```text
//! ┌──────────┬───────────┬─────────────────────────────────────────────┐
//! │ Bits (4) │ Count (4) │ Slot × bucket_elems                         │
//! └──────────┴───────────┴─────────────────────────────────────────────┘
//! Slot (24 bytes):
//! ┌──────────┬──────────────┬──────────────┬─────────────┬─────────────┐
//! │ Hash (4) │ KeyStart (4) │ DataOfs (8)  │ KeySize (4) │ DataSize(4) │
//! └──────────┴──────────────┴──────────────┴─────────────┴─────────────┘
//! ```

use super::hash::KEY_START_LEN;

/// Bits (4) + Count (4)
pub const BUCKET_HEADER_SIZE: usize = 8;

/// Encoded size of one slot
pub const ELEM_SIZE: usize = 24;

/// Hash value marking an unused slot (real hashes use 31 bits)
pub const EMPTY_SLOT: u32 = u32::MAX;

/// Number of slots that fit in a block
pub fn elems_for_block(block_size: u32) -> u32 {
    ((block_size as usize - BUCKET_HEADER_SIZE) / ELEM_SIZE) as u32
}

/// One slot: where a record lives and enough of its key to skip most
/// mismatches without touching the record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketElement {
    pub hash: u32,
    pub key_start: [u8; KEY_START_LEN],
    pub data_offset: u64,
    pub key_size: u32,
    pub data_size: u32,
}

impl BucketElement {
    pub const EMPTY: Self = Self {
        hash: EMPTY_SLOT,
        key_start: [0; KEY_START_LEN],
        data_offset: 0,
        key_size: 0,
        data_size: 0,
    };

    pub fn is_empty(&self) -> bool {
        self.hash == EMPTY_SLOT
    }

    /// Bytes the record (key followed by value) occupies on disk
    pub fn record_size(&self) -> u64 {
        self.key_size as u64 + self.data_size as u64
    }
}

/// A decoded bucket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    /// Local depth: leading hash bits shared by every key in this bucket
    pub bits: u32,
    /// Occupied slots
    pub count: u32,
    pub slots: Vec<BucketElement>,
}

impl Bucket {
    pub fn new(bits: u32, elems: u32) -> Self {
        Self {
            bits,
            count: 0,
            slots: vec![BucketElement::EMPTY; elems as usize],
        }
    }

    pub fn is_full(&self) -> bool {
        self.count as usize >= self.slots.len()
    }

    /// Slot where probing for `hash` starts
    pub fn home_slot(&self, hash: u32) -> usize {
        hash as usize % self.slots.len()
    }

    /// Occupied slots on the probe path for `hash`, in probe order
    pub fn probe(&self, hash: u32) -> impl Iterator<Item = usize> + '_ {
        let len = self.slots.len();
        let home = self.home_slot(hash);
        (0..len)
            .map(move |i| (home + i) % len)
            .take_while(move |&slot| !self.slots[slot].is_empty())
    }

    /// Place an element in the first free slot of its probe path.
    ///
    /// Returns `None` when the bucket is full.
    pub fn insert(&mut self, elem: BucketElement) -> Option<usize> {
        if self.is_full() {
            return None;
        }
        let len = self.slots.len();
        let home = self.home_slot(elem.hash);
        let slot = (0..len)
            .map(|i| (home + i) % len)
            .find(|&slot| self.slots[slot].is_empty())?;
        self.slots[slot] = elem;
        self.count += 1;
        Some(slot)
    }

    /// Empty a slot and pull later members of the probe chain back so no
    /// lookup stops early at the hole.
    pub fn remove(&mut self, slot: usize) -> BucketElement {
        let len = self.slots.len();
        let removed = self.slots[slot];
        if removed.is_empty() {
            return removed;
        }
        self.slots[slot] = BucketElement::EMPTY;
        self.count -= 1;

        let mut hole = slot;
        let mut pos = (slot + 1) % len;
        while pos != hole && !self.slots[pos].is_empty() {
            let home = self.home_slot(self.slots[pos].hash);
            // Movable iff the hole lies cyclically within [home, pos)
            let movable = if hole < pos {
                home <= hole || home > pos
            } else {
                home <= hole && home > pos
            };
            if movable {
                self.slots[hole] = self.slots[pos];
                self.slots[pos] = BucketElement::EMPTY;
                hole = pos;
            }
            pos = (pos + 1) % len;
        }

        removed
    }

    /// Occupied slots in slot order
    pub fn occupied(&self) -> impl Iterator<Item = (usize, &BucketElement)> {
        self.slots.iter().enumerate().filter(|(_, e)| !e.is_empty())
    }

    /// Slot a traversal of this bucket begins at.
    ///
    /// No probe chain runs from the slot before it into it, and removal
    /// only ever shortens chains, so `remove` never moves an entry from
    /// the end of such a walk back to its beginning.
    pub fn walk_start(&self) -> usize {
        (0..self.slots.len())
            .find(|&slot| !self.chain_enters(slot))
            .unwrap_or(0)
    }

    /// Whether some entry was probed from the previous slot into `slot`
    fn chain_enters(&self, slot: usize) -> bool {
        let len = self.slots.len();
        if self.slots[(slot + len - 1) % len].is_empty() {
            return false;
        }
        self.occupied().any(|(pos, elem)| {
            let displacement = (pos + len - self.home_slot(elem.hash)) % len;
            (pos + len - slot) % len < displacement
        })
    }

    /// First occupied slot at least `step` places into a walk that begins
    /// at `start`
    pub fn occupied_from(&self, start: usize, step: usize) -> Option<(usize, BucketElement)> {
        let len = self.slots.len();
        (step..len)
            .map(|i| (start + i) % len)
            .find(|&slot| !self.slots[slot].is_empty())
            .map(|slot| (slot, self.slots[slot]))
    }

    /// How many places into a walk from `start` the slot lies
    pub fn walk_step(&self, start: usize, slot: usize) -> usize {
        let len = self.slots.len();
        (slot % len + len - start % len) % len
    }

    /// Encode into a block of `block_size` bytes
    pub fn encode(&self, block_size: u32) -> Vec<u8> {
        let mut buf = Vec::with_capacity(block_size as usize);
        buf.extend_from_slice(&self.bits.to_le_bytes());
        buf.extend_from_slice(&self.count.to_le_bytes());
        for elem in &self.slots {
            buf.extend_from_slice(&elem.hash.to_le_bytes());
            buf.extend_from_slice(&elem.key_start);
            buf.extend_from_slice(&elem.data_offset.to_le_bytes());
            buf.extend_from_slice(&elem.key_size.to_le_bytes());
            buf.extend_from_slice(&elem.data_size.to_le_bytes());
        }
        buf.resize(block_size as usize, 0);
        buf
    }

    /// Decode a bucket block.
    ///
    /// The error string describes the inconsistency; the caller routes it
    /// through the fatal hook.
    pub fn decode(bytes: &[u8], elems: u32) -> std::result::Result<Self, String> {
        let needed = BUCKET_HEADER_SIZE + elems as usize * ELEM_SIZE;
        if bytes.len() < needed {
            return Err(format!(
                "bucket block is {} bytes, need {}",
                bytes.len(),
                needed
            ));
        }

        let read_u32 = |pos: usize| u32::from_le_bytes([bytes[pos], bytes[pos + 1], bytes[pos + 2], bytes[pos + 3]]);

        let bits = read_u32(0);
        let count = read_u32(4);
        if count > elems {
            return Err(format!("bucket count {} exceeds {} slots", count, elems));
        }

        let mut slots = Vec::with_capacity(elems as usize);
        for i in 0..elems as usize {
            let pos = BUCKET_HEADER_SIZE + i * ELEM_SIZE;
            let mut key_start = [0u8; KEY_START_LEN];
            key_start.copy_from_slice(&bytes[pos + 4..pos + 8]);
            let mut offset = [0u8; 8];
            offset.copy_from_slice(&bytes[pos + 8..pos + 16]);
            slots.push(BucketElement {
                hash: read_u32(pos),
                key_start,
                data_offset: u64::from_le_bytes(offset),
                key_size: read_u32(pos + 16),
                data_size: read_u32(pos + 20),
            });
        }

        let occupied = slots.iter().filter(|e| !e.is_empty()).count() as u32;
        if occupied != count {
            return Err(format!(
                "bucket count {} but {} occupied slots",
                count, occupied
            ));
        }

        Ok(Self { bits, count, slots })
    }
}
