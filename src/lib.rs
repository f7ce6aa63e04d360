//! # AtlasDBM
//!
//! An embedded, single-file key-value store with:
//! - Extendible hashing for constant-time lookups
//! - Advisory file locking (one writer or many readers)
//! - Free-space reuse and offline-style reorganize
//! - A session API with bulk operations built on a deletion-tolerant cursor
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Dbm / SharedDbm (session)                   │
//! │        open cascade · guards · point & bulk operations       │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │   Cursor    │─────────▶│  HashIndex  │◀── maintenance
//!   │ (position)  │          │ dir+buckets │    (reorganize,
//!   └─────────────┘          └──────┬──────┘     tuning)
//!                                   │
//!                                   ▼
//!                           ┌─────────────┐
//!                           │ StorageFile │
//!                           │ header+avail│
//!                           └─────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use atlasdbm::{Dbm, WRCREAT};
//!
//! # fn main() -> atlasdbm::Result<()> {
//! let mut db = Dbm::open("fruit.db", 0o644, WRCREAT)?;
//! db.put("apple", "red")?;
//! assert_eq!(db.get("apple")?, Some(b"red".to_vec()));
//! db.close()?;
//! # Ok(())
//! # }
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod storage;
pub mod index;
pub mod cursor;
pub mod session;
pub mod maintenance;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{DbmError, Result};
pub use config::{
    Config, ConfigBuilder, FallbackPolicy, FatalHook, OpenFlags, OpenMode, DEFAULT_BLOCK_SIZE,
    DEFAULT_CACHE_SIZE, DEFAULT_PERMISSIONS, FAST, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE, MODE_EXPLICIT,
    NEWDB, NOLOCK, READER, SYNC, WRCREAT, WRITER,
};
pub use cursor::{Cursor, Keys, Pairs};
pub use maintenance::ReorganizeStats;
pub use session::{Dbm, SharedDbm};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of AtlasDBM
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library version and on-disk format version, e.g. `"AtlasDBM 0.1.0 (format 1)"`
pub fn engine_version() -> String {
    format!("AtlasDBM {} (format {})", VERSION, storage::FORMAT_VERSION)
}
