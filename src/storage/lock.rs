//! Advisory file locks
//!
//! Readers take a shared `flock`, writers an exclusive one. Locks are
//! non-blocking and belong to the open file description, so two sessions in
//! the same process contend exactly like two processes do. The lock is
//! released when the `File` is closed.

use std::fs::File;
use std::io;

/// Kind of advisory lock to take
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    Shared,
    Exclusive,
}

/// Try to lock without blocking.
///
/// Returns `Ok(false)` when another holder is in the way.
#[cfg(unix)]
pub fn try_lock(file: &File, kind: LockKind) -> io::Result<bool> {
    use std::os::unix::io::AsRawFd;

    let operation = match kind {
        LockKind::Shared => libc::LOCK_SH,
        LockKind::Exclusive => libc::LOCK_EX,
    } | libc::LOCK_NB;

    // SAFETY: the fd comes from a live `File`; flock does not touch memory.
    let result = unsafe { libc::flock(file.as_raw_fd(), operation) };
    if result == 0 {
        return Ok(true);
    }

    let err = io::Error::last_os_error();
    if err.kind() == io::ErrorKind::WouldBlock {
        Ok(false)
    } else {
        Err(err)
    }
}

/// Locking is not available on this platform; every request succeeds.
#[cfg(not(unix))]
pub fn try_lock(_file: &File, _kind: LockKind) -> io::Result<bool> {
    Ok(true)
}
