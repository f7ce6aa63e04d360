//! Storage Module
//!
//! The single on-disk container every session works against.
//!
//! ## Responsibilities
//! - Open/create/truncate the file under an advisory lock
//! - Header block with checksum and free-space (avail) table
//! - Space allocation (best-fit reuse, else grow the file)
//! - Durable sync
//! - Routing internal consistency failures through the fatal hook
//!
//! ## File Format
//! ```text
//! ┌────────────────────────────────────────┐
//! │ Header Block (block_size)              │
//! │ ┌──────────┬──────────┬──────────────┐ │
//! │ │ Len (4)  │ CRC (4)  │ HeaderRecord │ │
//! │ └──────────┴──────────┴──────────────┘ │
//! ├────────────────────────────────────────┤
//! │ Directory (8 << dir_bits)              │
//! │   bucket offset (u64) per entry        │
//! ├────────────────────────────────────────┤
//! │ Buckets (block_size each)              │
//! │ Records [Key][Value]                   │
//! │ ... interleaved, reused via avail ...  │
//! └────────────────────────────────────────┘
//! ```

mod avail;
mod durability;
mod file;
mod header;
mod lock;

pub use avail::{AvailElem, AvailList, AVAIL_ELEM_SIZE, MIN_SPLIT};
pub use durability::durable_sync;
pub use file::StorageFile;
pub use header::{Header, FORMAT_VERSION, HEADER_FIXED_SIZE, HEADER_PREFIX_SIZE, MAGIC};
pub use lock::{try_lock, LockKind};
