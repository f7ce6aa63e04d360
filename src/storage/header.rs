//! Header Block
//!
//! Block 0 of every database file.
//!
//! ```text
//! ┌──────────────┬─────────────┬──────────────────────────────┬─────────┐
//! │ PayloadLen(4)│  CRC32 (4)  │  bincode(HeaderRecord)       │ padding │
//! └──────────────┴─────────────┴──────────────────────────────┴─────────┘
//!  <─────────────────────────── block_size ──────────────────────────────>
//! ```

use std::io::Read;

use serde::{Deserialize, Serialize};

use crate::config::{MAX_BLOCK_SIZE, MIN_BLOCK_SIZE};
use crate::error::{DbmError, Result};

use super::avail::{AvailElem, AvailList, AVAIL_ELEM_SIZE};

/// Magic number identifying an AtlasDBM file ("ATDB")
pub const MAGIC: u32 = 0x4154_4442;

/// Current on-disk format version
pub const FORMAT_VERSION: u16 = 1;

/// PayloadLen (4) + CRC32 (4)
pub const HEADER_PREFIX_SIZE: usize = 8;

/// Encoded size of the fixed part of `HeaderRecord` (including the avail
/// vector length prefix)
pub const HEADER_FIXED_SIZE: usize = 4 + 2 + 4 + 8 + 4 + 4 + 8 + 8;

#[derive(Debug, Serialize, Deserialize)]
struct HeaderRecord {
    magic: u32,
    version: u16,
    block_size: u32,
    dir_offset: u64,
    dir_bits: u32,
    bucket_elems: u32,
    next_block: u64,
    avail: Vec<AvailElem>,
}

/// Decoded file header
#[derive(Debug, Clone)]
pub struct Header {
    /// Size of the header block and of every bucket
    pub block_size: u32,
    /// Offset of the bucket directory (0 until the index is bootstrapped)
    pub dir_offset: u64,
    /// Global depth: the directory holds `1 << dir_bits` entries
    pub dir_bits: u32,
    /// Slots per bucket
    pub bucket_elems: u32,
    /// First unallocated byte of the file
    pub next_block: u64,
    /// Free-space table
    pub avail: AvailList,
}

impl Header {
    /// Header for a freshly created file
    pub fn new(block_size: u32) -> Self {
        Self {
            block_size,
            dir_offset: 0,
            dir_bits: 0,
            bucket_elems: 0,
            next_block: block_size as u64,
            avail: AvailList::new(Self::avail_capacity(block_size)),
        }
    }

    /// How many avail entries fit in a header block of this size
    pub fn avail_capacity(block_size: u32) -> usize {
        (block_size as usize - HEADER_PREFIX_SIZE - HEADER_FIXED_SIZE) / AVAIL_ELEM_SIZE
    }

    /// Encode into a full, padded header block
    pub fn encode(&self) -> Result<Vec<u8>> {
        let record = HeaderRecord {
            magic: MAGIC,
            version: FORMAT_VERSION,
            block_size: self.block_size,
            dir_offset: self.dir_offset,
            dir_bits: self.dir_bits,
            bucket_elems: self.bucket_elems,
            next_block: self.next_block,
            avail: self.avail.elems().to_vec(),
        };
        let payload = bincode::serialize(&record)?;

        let block_size = self.block_size as usize;
        if HEADER_PREFIX_SIZE + payload.len() > block_size {
            return Err(DbmError::Serialization(format!(
                "header payload of {} bytes does not fit a {} byte block",
                payload.len(),
                block_size
            )));
        }

        let mut block = Vec::with_capacity(block_size);
        block.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        block.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        block.extend_from_slice(&payload);
        block.resize(block_size, 0);
        Ok(block)
    }

    /// Read and validate the header from the start of a file
    pub fn decode<R: Read>(reader: &mut R, file_len: u64) -> Result<Self> {
        let mut prefix = [0u8; HEADER_PREFIX_SIZE];
        reader
            .read_exact(&mut prefix)
            .map_err(|_| DbmError::Corrupt("truncated header block".to_string()))?;

        let payload_len = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
        let stored_crc = u32::from_le_bytes([prefix[4], prefix[5], prefix[6], prefix[7]]);

        if payload_len < HEADER_FIXED_SIZE || (HEADER_PREFIX_SIZE + payload_len) as u64 > file_len {
            return Err(DbmError::Corrupt(format!(
                "implausible header length {}",
                payload_len
            )));
        }

        let mut payload = vec![0u8; payload_len];
        reader
            .read_exact(&mut payload)
            .map_err(|_| DbmError::Corrupt("truncated header block".to_string()))?;

        if crc32fast::hash(&payload) != stored_crc {
            return Err(DbmError::Corrupt("header checksum mismatch".to_string()));
        }

        let record: HeaderRecord = bincode::deserialize(&payload)
            .map_err(|e| DbmError::Corrupt(format!("undecodable header: {}", e)))?;

        if record.magic != MAGIC {
            return Err(DbmError::Corrupt(format!(
                "bad magic number {:#010x}",
                record.magic
            )));
        }
        if record.version != FORMAT_VERSION {
            return Err(DbmError::Corrupt(format!(
                "unsupported format version {}",
                record.version
            )));
        }
        if !record.block_size.is_power_of_two()
            || !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&record.block_size)
        {
            return Err(DbmError::Corrupt(format!(
                "bad block size {}",
                record.block_size
            )));
        }

        let capacity = Self::avail_capacity(record.block_size);
        Ok(Self {
            block_size: record.block_size,
            dir_offset: record.dir_offset,
            dir_bits: record.dir_bits,
            bucket_elems: record.bucket_elems,
            next_block: record.next_block,
            avail: AvailList::from_elems(record.avail, capacity),
        })
    }
}
