//! Durable sync
//!
//! Maps `sync()` onto the strongest flush each platform offers.

use std::fs::File;
use std::io;

/// Block until file data has reached persistent storage.
///
/// - Linux: `fdatasync()`
/// - macOS/iOS: `fcntl(F_FULLFSYNC)`, plain fsync stops at the drive cache
/// - Other: `File::sync_data()`
pub fn durable_sync(file: &File) -> io::Result<()> {
    #[cfg(target_os = "linux")]
    {
        use std::os::unix::io::AsRawFd;
        // SAFETY: the fd comes from a live `File`, so it is open for the
        // duration of the call.
        let result = unsafe { libc::fdatasync(file.as_raw_fd()) };
        if result == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    #[cfg(any(target_os = "macos", target_os = "ios"))]
    {
        use std::os::unix::io::AsRawFd;
        // SAFETY: the fd comes from a live `File`, so it is open for the
        // duration of the call.
        let result = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_FULLFSYNC) };
        if result != -1 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "ios")))]
    {
        file.sync_data()
    }
}
