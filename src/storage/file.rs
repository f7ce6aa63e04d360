//! Storage File
//!
//! Owns the open file handle, its advisory lock, the header block and the
//! free-space table. Everything above this layer addresses the file by
//! `(offset, len)`.

use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::config::{Config, FatalHook, OpenFlags, OpenMode};
use crate::error::{DbmError, Result};

use super::durability::durable_sync;
use super::header::Header;
use super::lock::{self, LockKind};

/// An open database file
pub struct StorageFile {
    /// Path the file was opened from
    path: PathBuf,

    /// Underlying handle (holds the advisory lock, if any)
    file: File,

    /// In-memory copy of block 0
    header: Header,

    /// Header changed since it was last written
    header_dirty: bool,

    /// Opened in a writer mode
    writable: bool,

    /// Called on internal consistency failures
    fatal_hook: FatalHook,
}

impl StorageFile {
    /// Open (or create) the file in the given mode.
    ///
    /// Returns the file and whether it was freshly initialized, in which
    /// case the caller must lay out the index before anything else.
    pub fn open(config: &Config, mode: OpenMode) -> Result<(Self, bool)> {
        let path = config.path.clone();

        let mut options = fs::OpenOptions::new();
        options.read(true);
        match mode {
            OpenMode::Reader => {}
            OpenMode::Writer => {
                options.write(true);
            }
            OpenMode::WriteCreate | OpenMode::NewDb => {
                options.write(true).create(true);
            }
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(config.permissions);
        }

        let file = options.open(&path).map_err(|source| DbmError::FileOpen {
            path: path.clone(),
            source,
        })?;

        // Lock before looking at (or truncating) the contents
        if !config.flags.contains(OpenFlags::NOLOCK) {
            let kind = if mode.is_writer() {
                LockKind::Exclusive
            } else {
                LockKind::Shared
            };
            if !lock::try_lock(&file, kind)? {
                return Err(if mode.is_writer() {
                    DbmError::CannotBeWriter(path)
                } else {
                    DbmError::CannotBeReader(path)
                });
            }
        }

        if mode == OpenMode::NewDb {
            file.set_len(0)?;
        }

        let file_len = file.metadata()?.len();
        let mut storage = Self {
            path,
            file,
            header: Header::new(config.block_size),
            header_dirty: false,
            writable: mode.is_writer(),
            fatal_hook: config.fatal_hook.clone(),
        };

        if file_len == 0 {
            if !storage.writable {
                return Err(DbmError::Corrupt("empty database file".to_string()));
            }
            tracing::debug!(
                "Initializing new database {:?} (block size {})",
                storage.path,
                config.block_size
            );
            storage.header_dirty = true;
            return Ok((storage, true));
        }

        storage.file.seek(SeekFrom::Start(0))?;
        storage.header = Header::decode(&mut storage.file, file_len)?;
        if storage.header.dir_offset == 0 {
            return Err(DbmError::Corrupt(
                "database directory was never written".to_string(),
            ));
        }

        tracing::debug!(
            "Opened {:?} as {:?}: block size {}, dir bits {}, {} free regions",
            storage.path,
            mode,
            storage.header.block_size,
            storage.header.dir_bits,
            storage.header.avail.len()
        );
        Ok((storage, false))
    }

    // =========================================================================
    // Block I/O
    // =========================================================================

    /// Read `len` bytes at `offset`.
    ///
    /// A read past the end of the file means a pointer in the index is
    /// wrong, so it goes through the fatal hook.
    pub fn read_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.file.seek(SeekFrom::Start(offset))?;
        match self.file.read_exact(&mut buf) {
            Ok(()) => Ok(buf),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(self.fatal(format!(
                "read of {} bytes at offset {} runs past end of file",
                len, offset
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// Write `data` at `offset`
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        if !self.writable {
            return Err(DbmError::ReadOnly);
        }
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        Ok(())
    }

    // =========================================================================
    // Space Management
    // =========================================================================

    /// Reserve `size` bytes, reusing free space when possible
    pub fn allocate(&mut self, size: u64) -> u64 {
        if size == 0 {
            return self.header.next_block;
        }
        self.header_dirty = true;
        if let Some(offset) = self.header.avail.take(size) {
            return offset;
        }
        let offset = self.header.next_block;
        self.header.next_block += size;
        offset
    }

    /// Give `size` bytes at `offset` back to the free list
    pub fn free(&mut self, offset: u64, size: u64) {
        if size == 0 {
            return;
        }
        self.header_dirty = true;

        // Space at the tail simply shrinks the allocation frontier
        if offset + size == self.header.next_block {
            self.header.next_block = offset;
            while let Some(elem) = self.header.avail.take_ending_at(self.header.next_block) {
                self.header.next_block = elem.offset;
            }
            return;
        }

        if let Some(dropped) = self.header.avail.release(offset, size) {
            tracing::warn!(
                "Avail table full, leaking {} bytes at offset {} until reorganize",
                dropped.size,
                dropped.offset
            );
        }
    }

    // =========================================================================
    // Header & Durability
    // =========================================================================

    /// Write the header block if it changed
    pub fn write_header(&mut self) -> Result<()> {
        if !self.header_dirty || !self.writable {
            return Ok(());
        }
        let block = self.header.encode()?;
        self.write_at(0, &block)?;
        self.header_dirty = false;
        Ok(())
    }

    /// Force everything written so far onto disk
    pub fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        durable_sync(&self.file)?;
        Ok(())
    }

    /// Run the fatal hook and build the error the current call returns
    pub fn fatal(&self, message: impl Into<String>) -> DbmError {
        let message = message.into();
        self.fatal_hook.call(&message);
        DbmError::Fatal(message)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Mutable header access; marks the header dirty
    pub fn header_mut(&mut self) -> &mut Header {
        self.header_dirty = true;
        &mut self.header
    }

    pub fn block_size(&self) -> u32 {
        self.header.block_size
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn fatal_hook(&self) -> &FatalHook {
        &self.fatal_hook
    }

    /// Current physical length of the file
    pub fn file_len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Cut the file back to the allocation frontier
    pub fn truncate_to_frontier(&mut self) -> Result<()> {
        if self.writable && self.file_len()? > self.header.next_block {
            self.file.set_len(self.header.next_block)?;
        }
        Ok(())
    }

    /// Point at a new path after the file was renamed
    pub(crate) fn set_path(&mut self, path: PathBuf) {
        self.path = path;
    }
}
