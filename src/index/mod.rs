//! Record Index
//!
//! Extendible hashing over the storage file.
//!
//! ## Responsibilities
//! - Key → record lookup through directory and buckets
//! - Bucket splits and directory doubling as the table grows
//! - Write-back bucket cache
//! - Position-based traversal primitives for cursors
//!
//! ## Layout
//! ```text
//!   key ──crc32──▶ hash (31 bits)
//!                    │ top dir_bits
//!                    ▼
//!   Directory  [ b0 | b0 | b1 | b2 | b2 | b2 | b2 | ... ]
//!                 │          │    │
//!                 ▼          ▼    ▼
//!   Buckets    ┌──────┐  ┌──────┐ ┌──────┐
//!              │depth1│  │depth2│ │depth0│  linear probing from hash % elems
//!              └──┬───┘  └──────┘ └──────┘
//!                 ▼
//!   Record     [key bytes][value bytes]
//! ```

mod bucket;
mod cache;
mod directory;
mod hash;
mod table;

pub use bucket::{elems_for_block, Bucket, BucketElement, BUCKET_HEADER_SIZE, ELEM_SIZE};
pub use hash::{dir_index, key_hash, HASH_BITS};
pub use table::{HashIndex, IndexStats, Position};
