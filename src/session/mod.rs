//! Access Session
//!
//! `Dbm` is the handle callers work with: it owns the open index, the
//! session cursor and the cached record count.
//!
//! ## Responsibilities
//! - Open policy (explicit mode or the WriteCreate → Writer → Reader cascade)
//! - Closed-handle and read-only guards on every operation
//! - Point lookups and mutations
//! - Record count caching
//! - Close on drop

mod bulk;
mod shared;

pub use shared::SharedDbm;

use std::path::{Path, PathBuf};

use crate::config::{Config, FallbackPolicy, OpenMode};
use crate::cursor::Cursor;
use crate::error::{DbmError, Result};
use crate::index::{HashIndex, IndexStats};
use crate::maintenance::ReorganizeStats;

/// An open database session
///
/// ## Concurrency Model
///
/// - Every method takes `&mut self`; one thread drives a session at a time
/// - Share across threads with [`SharedDbm`]
/// - Other processes are kept out by the file lock (exclusive for
///   writers, shared for readers) unless opened with `NOLOCK`
pub struct Dbm {
    /// `None` once closed
    index: Option<HashIndex>,

    /// Mode the file was actually opened in
    mode: OpenMode,

    /// Path the session was opened with
    path: PathBuf,

    /// Record count, when known without scanning
    len_cache: Option<usize>,

    /// Drives `first_key` / `next_key`
    cursor: Cursor,
}

impl Dbm {
    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Open a database file.
    ///
    /// `permissions` applies only when the file is created. `flags` is a
    /// mode constant ([`crate::READER`], [`crate::WRITER`],
    /// [`crate::WRCREAT`], [`crate::NEWDB`]) OR-ed with option bits, or 0
    /// for the default cascade.
    pub fn open(path: impl AsRef<Path>, permissions: u32, flags: u32) -> Result<Self> {
        let config = Config::builder()
            .path(path.as_ref())
            .permissions(permissions)
            .raw_flags(flags)?
            .build();
        Self::open_with(config)
    }

    /// Like [`Dbm::open`], but never creates the file: `Ok(None)` when
    /// nothing exists at `path`.
    pub fn open_existing(path: impl AsRef<Path>, permissions: u32, flags: u32) -> Result<Option<Self>> {
        let path = path.as_ref();
        if !path.try_exists()? {
            return Ok(None);
        }
        Self::open(path, permissions, flags).map(Some)
    }

    /// Open from a typed [`Config`]
    pub fn open_with(config: Config) -> Result<Self> {
        config.validate()?;
        match config.mode {
            Some(mode) => Self::open_mode(&config, mode),
            None => Self::open_cascade(&config),
        }
    }

    /// Open, run `body`, and close on every exit path.
    ///
    /// An error from `body` wins over an error from closing.
    pub fn with_open<T, F>(path: impl AsRef<Path>, permissions: u32, flags: u32, body: F) -> Result<T>
    where
        F: FnOnce(&mut Dbm) -> Result<T>,
    {
        let mut db = Self::open(path, permissions, flags)?;
        let outcome = body(&mut db);
        let closed = if db.is_closed() { Ok(()) } else { db.close() };
        let value = outcome?;
        closed?;
        Ok(value)
    }

    fn open_mode(config: &Config, mode: OpenMode) -> Result<Self> {
        let index = HashIndex::open(config, mode)?;
        Ok(Self {
            index: Some(index),
            mode,
            path: config.path.clone(),
            len_cache: None,
            cursor: Cursor::new(),
        })
    }

    /// Try WriteCreate, then Writer, then Reader. Only lock contention and
    /// open failures move on to the next mode.
    fn open_cascade(config: &Config) -> Result<Self> {
        let mut last_err = None;

        for mode in [OpenMode::WriteCreate, OpenMode::Writer, OpenMode::Reader] {
            if mode == OpenMode::Reader && config.fallback == FallbackPolicy::NeverReader {
                break;
            }

            match Self::open_mode(config, mode) {
                Ok(db) => {
                    if mode == OpenMode::Reader && config.fallback == FallbackPolicy::Warn {
                        tracing::warn!(
                            "Opened {:?} read-only: write access unavailable ({})",
                            config.path,
                            last_err
                                .as_ref()
                                .map(|e: &DbmError| e.to_string())
                                .unwrap_or_default()
                        );
                    }
                    return Ok(db);
                }
                Err(e) if e.is_lock_contention() || matches!(e, DbmError::FileOpen { .. }) => {
                    tracing::debug!("Open of {:?} as {:?} failed: {}", config.path, mode, e);
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or_else(|| DbmError::CannotBeWriter(config.path.clone())))
    }

    /// Flush and release the file. A second close returns `ClosedHandle`.
    pub fn close(&mut self) -> Result<()> {
        let index = self.index.take().ok_or(DbmError::ClosedHandle)?;
        self.len_cache = None;
        self.cursor.reset();
        index.close()
    }

    pub fn is_closed(&self) -> bool {
        self.index.is_none()
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn is_writer(&self) -> bool {
        self.mode.is_writer()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // =========================================================================
    // Guards
    // =========================================================================

    fn index(&mut self) -> Result<&mut HashIndex> {
        self.index.as_mut().ok_or(DbmError::ClosedHandle)
    }

    fn writer(&mut self) -> Result<&mut HashIndex> {
        let index = self.index.as_mut().ok_or(DbmError::ClosedHandle)?;
        if !index.is_writable() {
            return Err(DbmError::ReadOnly);
        }
        Ok(index)
    }

    // =========================================================================
    // Point Operations
    // =========================================================================

    /// Value for `key`, if stored
    pub fn get(&mut self, key: impl AsRef<[u8]>) -> Result<Option<Vec<u8>>> {
        self.index()?.fetch(key.as_ref())
    }

    /// Value for `key`; `KeyNotFound` if absent
    pub fn fetch(&mut self, key: impl AsRef<[u8]>) -> Result<Vec<u8>> {
        self.get(key)?.ok_or(DbmError::KeyNotFound)
    }

    pub fn fetch_or(&mut self, key: impl AsRef<[u8]>, default: impl Into<Vec<u8>>) -> Result<Vec<u8>> {
        Ok(self.get(key)?.unwrap_or_else(|| default.into()))
    }

    /// Value for `key`, or whatever `fallback` computes from the key
    pub fn fetch_or_else<F>(&mut self, key: impl AsRef<[u8]>, fallback: F) -> Result<Vec<u8>>
    where
        F: FnOnce(&[u8]) -> Vec<u8>,
    {
        let key = key.as_ref();
        Ok(match self.get(key)? {
            Some(value) => value,
            None => fallback(key),
        })
    }

    /// Store `value` under `key`, replacing any previous value
    pub fn put(&mut self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<()> {
        let index = self.writer()?;
        let stored = index.store(key.as_ref(), value.as_ref());
        // Insert or replace is unknown without a lookup
        self.len_cache = None;
        stored
    }

    /// Same as [`Dbm::put`]
    pub fn store(&mut self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<()> {
        self.put(key, value)
    }

    /// Remove `key`, returning its value
    pub fn delete(&mut self, key: impl AsRef<[u8]>) -> Result<Option<Vec<u8>>> {
        let key = key.as_ref();
        let index = self.writer()?;
        let Some(value) = index.fetch(key)? else {
            return Ok(None);
        };
        if index.delete(key)? {
            self.note_deleted(1);
        }
        Ok(Some(value))
    }

    pub fn contains(&mut self, key: impl AsRef<[u8]>) -> Result<bool> {
        self.index()?.exists(key.as_ref())
    }

    /// Values for several keys, `None` where a key is absent
    pub fn values_at<I, K>(&mut self, keys: I) -> Result<Vec<Option<Vec<u8>>>>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<[u8]>,
    {
        let index = self.index()?;
        keys.into_iter().map(|key| index.fetch(key.as_ref())).collect()
    }

    // =========================================================================
    // Count
    // =========================================================================

    /// Number of records; scans once when the count is unknown
    pub fn len(&mut self) -> Result<usize> {
        if let Some(n) = self.len_cache {
            self.index()?;
            return Ok(n);
        }
        let n = self.keys_iter()?.try_fold(0usize, |n, key| key.map(|_| n + 1))?;
        self.len_cache = Some(n);
        Ok(n)
    }

    pub fn is_empty(&mut self) -> Result<bool> {
        if let Some(n) = self.len_cache {
            self.index()?;
            return Ok(n == 0);
        }
        Ok(self.first_key()?.is_none())
    }

    fn note_deleted(&mut self, n: usize) {
        if let Some(len) = self.len_cache.as_mut() {
            *len = len.saturating_sub(n);
        }
    }

    // =========================================================================
    // Traversal Primitives
    // =========================================================================

    /// First key in storage order
    pub fn first_key(&mut self) -> Result<Option<Vec<u8>>> {
        let index = self.index.as_mut().ok_or(DbmError::ClosedHandle)?;
        self.cursor.first(index)
    }

    /// Key after `key` in storage order.
    ///
    /// Continues the session cursor when `key` is the last key it returned,
    /// so deleting `key` first does not end the walk. Returns `None` for a
    /// key that is not stored.
    pub fn next_key(&mut self, key: impl AsRef<[u8]>) -> Result<Option<Vec<u8>>> {
        let key = key.as_ref();
        let index = self.index.as_mut().ok_or(DbmError::ClosedHandle)?;
        if self.cursor.current() != Some(key) && !self.cursor.seek(index, key)? {
            return Ok(None);
        }
        self.cursor.next(index)
    }

    // =========================================================================
    // Maintenance & Tuning
    // =========================================================================

    /// Flush everything and force it to disk
    pub fn sync(&mut self) -> Result<()> {
        self.writer()?.sync()
    }

    /// Rewrite the file without dead space
    pub fn reorganize(&mut self) -> Result<ReorganizeStats> {
        let stats = self.writer()?.reorganize()?;
        self.cursor.reset();
        self.len_cache = Some(stats.records as usize);
        Ok(stats)
    }

    /// Number of buckets kept in memory
    pub fn set_cache_size(&mut self, buckets: usize) -> Result<()> {
        self.index()?.set_cache_size(buckets)
    }

    pub fn cache_size(&mut self) -> Result<usize> {
        Ok(self.index()?.cache_size())
    }

    /// Sync to disk after every mutation
    pub fn set_sync_mode(&mut self, on: bool) -> Result<()> {
        self.index()?.set_sync_mode(on);
        Ok(())
    }

    /// Inverse of [`Dbm::set_sync_mode`]
    pub fn set_fast_mode(&mut self, on: bool) -> Result<()> {
        self.set_sync_mode(!on)
    }

    pub fn sync_mode(&mut self) -> Result<bool> {
        Ok(self.index()?.sync_mode())
    }

    /// Shape of the underlying index
    pub fn stats(&mut self) -> Result<IndexStats> {
        Ok(self.index()?.stats())
    }
}

impl Drop for Dbm {
    fn drop(&mut self) {
        if let Some(index) = self.index.take() {
            if let Err(e) = index.close() {
                tracing::error!("Failed to close {:?}: {}", self.path, e);
            }
        }
    }
}

impl std::fmt::Debug for Dbm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dbm")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("closed", &self.is_closed())
            .field("len_cache", &self.len_cache)
            .finish()
    }
}
