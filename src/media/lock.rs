//! Advisory ownership lock for a store's run directory.
//!
//! A [`RunLock`] holds an exclusive `flock(2)` (Unix) or `LockFileEx`
//! (Windows) on `<dir>.lock`. The lock disappears with the process that
//! holds it, so a run directory whose lock can be taken has no live owner.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

/// Exclusive advisory lock; released on drop.
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    /// Take the lock for `dir` without blocking.
    ///
    /// `Ok(None)` means another process (or another store in this process)
    /// holds it.
    pub fn try_acquire(dir: &Path) -> Result<Option<Self>, io::Error> {
        let path = lock_path_for(dir);
        let file = File::options()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;
        if try_lock_exclusive(&file)? {
            Ok(Some(Self { file, path }))
        } else {
            Ok(None)
        }
    }

    /// Path of the `.lock` sentinel
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        unlock(&self.file);
    }
}

/// `<dir>.lock`, next to the directory it guards
pub fn lock_path_for(dir: &Path) -> PathBuf {
    let mut lock = dir.as_os_str().to_os_string();
    lock.push(".lock");
    lock.into()
}

#[cfg(unix)]
fn try_lock_exclusive(file: &File) -> Result<bool, io::Error> {
    use std::os::unix::io::AsRawFd;
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        return Ok(true);
    }
    let err = io::Error::last_os_error();
    if err.kind() == io::ErrorKind::WouldBlock {
        Ok(false)
    } else {
        Err(err)
    }
}

#[cfg(unix)]
fn unlock(file: &File) {
    use std::os::unix::io::AsRawFd;
    unsafe {
        libc::flock(file.as_raw_fd(), libc::LOCK_UN);
    }
}

#[cfg(windows)]
fn whole_file_overlapped() -> windows_sys::Win32::System::IO::OVERLAPPED {
    use windows_sys::Win32::System::IO::{OVERLAPPED, OVERLAPPED_0, OVERLAPPED_0_0};
    OVERLAPPED {
        Anonymous: OVERLAPPED_0 {
            Anonymous: OVERLAPPED_0_0 {
                Offset: 0,
                OffsetHigh: 0,
            },
        },
        ..Default::default()
    }
}

#[cfg(windows)]
fn try_lock_exclusive(file: &File) -> Result<bool, io::Error> {
    use std::os::windows::io::AsRawHandle;
    use windows_sys::Win32::Foundation::{ERROR_LOCK_VIOLATION, ERROR_SHARING_VIOLATION};
    use windows_sys::Win32::Storage::FileSystem::{
        LockFileEx, LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY,
    };

    let handle = file.as_raw_handle() as windows_sys::Win32::Foundation::HANDLE;
    let mut overlapped = whole_file_overlapped();
    let rc = unsafe {
        LockFileEx(
            handle,
            LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY,
            0,
            u32::MAX,
            u32::MAX,
            &mut overlapped,
        )
    };
    if rc != 0 {
        return Ok(true);
    }
    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(code)
            if code == ERROR_LOCK_VIOLATION as i32 || code == ERROR_SHARING_VIOLATION as i32 =>
        {
            Ok(false)
        }
        _ => Err(err),
    }
}

#[cfg(windows)]
fn unlock(file: &File) {
    use std::os::windows::io::AsRawHandle;
    use windows_sys::Win32::Storage::FileSystem::UnlockFileEx;

    let handle = file.as_raw_handle() as windows_sys::Win32::Foundation::HANDLE;
    let mut overlapped = whole_file_overlapped();
    unsafe {
        let _ = UnlockFileEx(handle, 0, u32::MAX, u32::MAX, &mut overlapped);
    }
}

// No advisory locking elsewhere: every run directory counts as owned, so
// nothing is purged.
#[cfg(all(not(unix), not(windows)))]
fn try_lock_exclusive(_file: &File) -> Result<bool, io::Error> {
    Ok(true)
}

#[cfg(all(not(unix), not(windows)))]
fn unlock(_file: &File) {}
