//! Key hashing
//!
//! CRC-32 of the key, masked to 31 bits. The hash is persisted in bucket
//! slots, so it must never depend on per-process state.

/// Significant bits of a key hash
pub const HASH_BITS: u32 = 31;

const HASH_MASK: u32 = (1 << HASH_BITS) - 1;

/// Leading key bytes cached in each bucket slot
pub const KEY_START_LEN: usize = 4;

/// Hash a key
pub fn key_hash(key: &[u8]) -> u32 {
    crc32fast::hash(key) & HASH_MASK
}

/// Directory slot for a hash: its top `dir_bits` bits
pub fn dir_index(hash: u32, dir_bits: u32) -> usize {
    if dir_bits == 0 {
        0
    } else {
        (hash >> (HASH_BITS - dir_bits)) as usize
    }
}

/// Bit that decides which half a hash lands in when a bucket splits to
/// depth `new_bits`
pub fn split_bit(hash: u32, new_bits: u32) -> u32 {
    (hash >> (HASH_BITS - new_bits)) & 1
}

/// First bytes of the key, zero padded
pub fn key_start(key: &[u8]) -> [u8; KEY_START_LEN] {
    let mut start = [0u8; KEY_START_LEN];
    let n = key.len().min(KEY_START_LEN);
    start[..n].copy_from_slice(&key[..n]);
    start
}
