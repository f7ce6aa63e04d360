//! Maintenance Operations
//!
//! Reorganize and runtime tuning of an open index.
//!
//! ## Reorganize
//! ```text
//!   data.db ──copy live records──▶ data.db.reorg ──sync──▶ rename over data.db
//! ```
//! The rewritten file has no free regions and its directory is only as deep
//! as the surviving keys need. The session carries on with the new file.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{Config, FallbackPolicy, OpenFlags, OpenMode};
use crate::error::{DbmError, Result};
use crate::index::HashIndex;

/// What a reorganize did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReorganizeStats {
    /// Records copied
    pub records: u64,
    /// File length before
    pub bytes_before: u64,
    /// File length after
    pub bytes_after: u64,
}

impl ReorganizeStats {
    /// Bytes given back to the filesystem
    pub fn reclaimed(&self) -> u64 {
        self.bytes_before.saturating_sub(self.bytes_after)
    }
}

/// `<path>.reorg` next to the database
fn reorg_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".reorg");
    PathBuf::from(name)
}

impl HashIndex {
    /// Rewrite the file compactly and continue on the rewritten copy
    pub fn reorganize(&mut self) -> Result<ReorganizeStats> {
        if !self.is_writable() {
            return Err(DbmError::ReadOnly);
        }
        self.flush()?;

        let original = self.storage.path().to_path_buf();
        let temp = reorg_path(&original);
        let bytes_before = self.storage.file_len()?;

        let config = Config {
            path: temp.clone(),
            block_size: self.storage.block_size(),
            mode: Some(OpenMode::NewDb),
            flags: self.flags - OpenFlags::SYNC,
            fallback: FallbackPolicy::NeverReader,
            cache_size: self.cache.capacity(),
            fatal_hook: self.storage.fatal_hook().clone(),
            ..Config::default()
        };

        let (mut fresh, records) = match self.copy_into(&config) {
            Ok(copied) => copied,
            Err(e) => {
                let _ = fs::remove_file(&temp);
                return Err(e);
            }
        };

        let install = || -> std::io::Result<()> {
            let permissions = fs::metadata(&original)?.permissions();
            fs::set_permissions(&temp, permissions)?;
            fs::rename(&temp, &original)
        };
        if let Err(e) = install() {
            let _ = fs::remove_file(&temp);
            return Err(e.into());
        }

        fresh.storage.set_path(original);
        fresh.sync_mode = self.sync_mode;
        fresh.flags = self.flags;
        let bytes_after = fresh.storage.file_len()?;

        // Dropping the old index closes the replaced file and its lock
        *self = fresh;

        let stats = ReorganizeStats {
            records,
            bytes_before,
            bytes_after,
        };
        tracing::info!(
            "Reorganized {:?}: {} records, {} -> {} bytes",
            self.storage.path(),
            stats.records,
            stats.bytes_before,
            stats.bytes_after
        );
        Ok(stats)
    }

    fn copy_into(&mut self, config: &Config) -> Result<(HashIndex, u64)> {
        let mut fresh = HashIndex::open(config, OpenMode::NewDb)?;
        let mut records = 0u64;

        let mut next = self.first_entry()?;
        while let Some((position, key)) = next {
            let value = match self.value_at(&position)? {
                Some(value) => value,
                None => {
                    return Err(self
                        .storage
                        .fatal(format!("record at slot {} vanished during copy", position.slot)))
                }
            };
            fresh.store(&key, &value)?;
            records += 1;
            next = self.entry_after(&position)?;
        }

        fresh.sync()?;
        fresh.storage.truncate_to_frontier()?;
        Ok((fresh, records))
    }

    /// Resize the bucket cache, writing back whatever no longer fits
    pub fn set_cache_size(&mut self, buckets: usize) -> Result<()> {
        if buckets == 0 {
            return Err(DbmError::InvalidArgument(
                "cache size must be at least 1".to_string(),
            ));
        }
        let evicted = self.cache.set_capacity(buckets);
        self.write_back(evicted)
    }
}
