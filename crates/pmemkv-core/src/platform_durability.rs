//! Flush primitives that make pool files survive power loss.
//!
//! `durable_sync` picks the strongest data flush each platform offers;
//! `sync_directory` persists renames and file creations inside a directory.

use std::fs::File;
use std::io;
use std::path::Path;

/// Flush file data to stable media before returning.
///
/// - Linux: `fdatasync`
/// - macOS/iOS: `fcntl(F_FULLFSYNC)`; plain fsync stops at the drive cache
/// - Windows: `FlushFileBuffers`
/// - elsewhere: `File::sync_data`
///
/// May block for a long time under heavy I/O; do not call it while holding a
/// lock that readers need.
pub fn durable_sync(file: &File) -> io::Result<()> {
    sync_impl(file)
}

/// Persist directory entries (new files, renames) under `dir`.
pub fn sync_directory(dir: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        let handle = File::open(dir)?;
        durable_sync(&handle)
    }

    #[cfg(not(unix))]
    {
        // Directory handles cannot be flushed here; NTFS journals metadata.
        let _ = dir;
        Ok(())
    }
}

#[cfg(target_os = "linux")]
fn sync_impl(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;
    // SAFETY: the descriptor comes from a live `File`, so it is open for the
    // duration of the call.
    let rc = unsafe { libc::fdatasync(file.as_raw_fd()) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(any(target_os = "macos", target_os = "ios"))]
fn sync_impl(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;
    // SAFETY: the descriptor comes from a live `File`.
    let rc = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_FULLFSYNC) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(target_os = "windows")]
fn sync_impl(file: &File) -> io::Result<()> {
    use std::os::windows::io::AsRawHandle;
    use winapi::um::fileapi::FlushFileBuffers;
    // SAFETY: the handle comes from a live `File`.
    let rc = unsafe { FlushFileBuffers(file.as_raw_handle() as *mut _) };
    if rc != 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "ios", target_os = "windows")))]
fn sync_impl(file: &File) -> io::Result<()> {
    file.sync_data()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_durable_sync_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"pool bytes").unwrap();
        durable_sync(file.as_file()).unwrap();
    }

    #[test]
    fn test_sync_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("f"), b"x").unwrap();
        sync_directory(dir.path()).unwrap();
    }
}
