//! Configuration for AtlasDBM
//!
//! Centralized configuration with sensible defaults, plus the stable integer
//! flag constants accepted by [`crate::Dbm::open`].

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use bitflags::bitflags;

use crate::error::{DbmError, Result};

// =============================================================================
// Stable Flag Constants
// =============================================================================

/// Marks an explicitly requested open mode in the integer flags
pub const MODE_EXPLICIT: u32 = 0x2000_0000;

/// Low bits of the integer flags that carry the mode
const MODE_MASK: u32 = 0x3;

/// Open as a reader (shared lock, read-only)
pub const READER: u32 = MODE_EXPLICIT;

/// Open as a writer; the file must exist
pub const WRITER: u32 = MODE_EXPLICIT | 0x1;

/// Open as a writer; create the file if it does not exist
pub const WRCREAT: u32 = MODE_EXPLICIT | 0x2;

/// Open as a writer; truncate any existing database
pub const NEWDB: u32 = MODE_EXPLICIT | 0x3;

/// Accepted for compatibility: sync mode off (the default)
pub const FAST: u32 = 0x10;

/// Sync every mutation to disk before returning
pub const SYNC: u32 = 0x20;

/// Skip advisory file locking
pub const NOLOCK: u32 = 0x40;

/// Default permission bits for newly created files
pub const DEFAULT_PERMISSIONS: u32 = 0o666;

/// Default block size (bucket and header block)
pub const DEFAULT_BLOCK_SIZE: u32 = 2048;

/// Accepted block sizes (powers of two in between)
pub const MIN_BLOCK_SIZE: u32 = 512;
pub const MAX_BLOCK_SIZE: u32 = 65536;

/// Default number of buckets kept in the bucket cache
pub const DEFAULT_CACHE_SIZE: usize = 64;

bitflags! {
    /// Option bits combinable with any open mode
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpenFlags: u32 {
        const FAST = FAST;
        const SYNC = SYNC;
        const NOLOCK = NOLOCK;
    }
}

/// How a session opens its file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Read-only, shared with other readers
    Reader,
    /// Read-write, exclusive; the file must exist
    Writer,
    /// Read-write, exclusive; create if absent
    WriteCreate,
    /// Read-write, exclusive; truncate and re-initialize
    NewDb,
}

impl OpenMode {
    /// Decode the two mode bits of the integer flags
    fn from_bits(bits: u32) -> Self {
        match bits & MODE_MASK {
            0 => OpenMode::Reader,
            1 => OpenMode::Writer,
            2 => OpenMode::WriteCreate,
            _ => OpenMode::NewDb,
        }
    }

    /// Integer constant for this mode
    pub fn as_flags(self) -> u32 {
        match self {
            OpenMode::Reader => READER,
            OpenMode::Writer => WRITER,
            OpenMode::WriteCreate => WRCREAT,
            OpenMode::NewDb => NEWDB,
        }
    }

    /// Whether this mode takes the exclusive writer lock
    pub fn is_writer(self) -> bool {
        !matches!(self, OpenMode::Reader)
    }
}

/// What the default open cascade does when it cannot get write access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FallbackPolicy {
    /// Downgrade to a reader without notice
    Silent,
    /// Downgrade to a reader and log a warning
    #[default]
    Warn,
    /// Fail instead of handing back a read-only session
    NeverReader,
}

/// Handler invoked synchronously on internal consistency failures.
///
/// The failing call still returns [`DbmError::Fatal`] after the hook runs.
#[derive(Clone)]
pub struct FatalHook(Arc<dyn Fn(&str) + Send + Sync>);

impl FatalHook {
    pub fn new(hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        Self(Arc::new(hook))
    }

    pub(crate) fn call(&self, message: &str) {
        (self.0)(message)
    }
}

impl Default for FatalHook {
    fn default() -> Self {
        Self::new(|message| tracing::error!("fatal database error: {}", message))
    }
}

impl fmt::Debug for FatalHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FatalHook")
    }
}

/// Main configuration for a database session
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // File Configuration
    // -------------------------------------------------------------------------
    /// Path of the database file
    pub path: PathBuf,

    /// Block size for new files (power of two, 512..=65536).
    /// Existing files keep the block size they were created with.
    pub block_size: u32,

    /// Permission bits applied when the file is created
    pub permissions: u32,

    // -------------------------------------------------------------------------
    // Open Policy
    // -------------------------------------------------------------------------
    /// Explicit mode, or `None` for the WriteCreate → Writer → Reader cascade
    pub mode: Option<OpenMode>,

    /// Option bits (SYNC, NOLOCK, FAST)
    pub flags: OpenFlags,

    /// Behaviour of the cascade when it falls back to a reader
    pub fallback: FallbackPolicy,

    // -------------------------------------------------------------------------
    // Runtime Tuning
    // -------------------------------------------------------------------------
    /// Number of buckets held in memory
    pub cache_size: usize,

    /// Invoked on internal consistency failures
    pub fatal_hook: FatalHook,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./atlasdbm.db"),
            block_size: DEFAULT_BLOCK_SIZE,
            permissions: DEFAULT_PERMISSIONS,
            mode: None,
            flags: OpenFlags::empty(),
            fallback: FallbackPolicy::default(),
            cache_size: DEFAULT_CACHE_SIZE,
            fatal_hook: FatalHook::default(),
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Split integer flags into an explicit mode and option bits.
    ///
    /// Without [`MODE_EXPLICIT`] the mode bits must be zero and the default
    /// cascade is used.
    pub fn parse_flags(raw: u32) -> Result<(Option<OpenMode>, OpenFlags)> {
        let (mode, rest) = if raw & MODE_EXPLICIT != 0 {
            let rest = raw & !(MODE_EXPLICIT | MODE_MASK);
            (Some(OpenMode::from_bits(raw)), rest)
        } else {
            (None, raw)
        };

        let flags = OpenFlags::from_bits(rest)
            .ok_or_else(|| DbmError::InvalidArgument(format!("unknown open flags: {:#x}", raw)))?;
        Ok((mode, flags))
    }

    /// Check the values that cannot be fixed up later
    pub fn validate(&self) -> Result<()> {
        if !self.block_size.is_power_of_two()
            || !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&self.block_size)
        {
            return Err(DbmError::InvalidArgument(format!(
                "block size must be a power of two in {}..={}, got {}",
                MIN_BLOCK_SIZE, MAX_BLOCK_SIZE, self.block_size
            )));
        }
        if self.cache_size == 0 {
            return Err(DbmError::InvalidArgument(
                "cache size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the database file path
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.path = path.into();
        self
    }

    /// Set the block size used when creating a file
    pub fn block_size(mut self, size: u32) -> Self {
        self.config.block_size = size;
        self
    }

    /// Set the permission bits for file creation
    pub fn permissions(mut self, mode: u32) -> Self {
        self.config.permissions = mode;
        self
    }

    /// Request an explicit open mode
    pub fn mode(mut self, mode: OpenMode) -> Self {
        self.config.mode = Some(mode);
        self
    }

    /// Set option bits
    pub fn flags(mut self, flags: OpenFlags) -> Self {
        self.config.flags = flags;
        self
    }

    /// Apply integer flags (mode constant OR-ed with option bits)
    pub fn raw_flags(mut self, raw: u32) -> Result<Self> {
        let (mode, flags) = Config::parse_flags(raw)?;
        self.config.mode = mode;
        self.config.flags = flags;
        Ok(self)
    }

    /// Set the fallback policy for the default open cascade
    pub fn fallback(mut self, policy: FallbackPolicy) -> Self {
        self.config.fallback = policy;
        self
    }

    /// Set the bucket cache size
    pub fn cache_size(mut self, buckets: usize) -> Self {
        self.config.cache_size = buckets;
        self
    }

    /// Install a fatal-error hook
    pub fn fatal_hook(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.config.fatal_hook = FatalHook::new(hook);
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
