//! Platform-specific shared memory primitives

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
pub use linux::{futex_wait, futex_wake};

#[cfg(not(target_os = "linux"))]
mod fallback;
#[cfg(not(target_os = "linux"))]
pub use fallback::{futex_wait, futex_wake};

use crate::error::{ShmError, ShmResult};
use memmap2::{MmapMut, MmapOptions};
use nix::unistd::{getpid, getppid};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

/// Open (creating if absent) a segment file with owner-only permissions
pub fn open_segment_file(path: &Path, create: bool) -> ShmResult<File> {
    OpenOptions::new()
        .create(create)
        .read(true)
        .write(true)
        .mode(0o600)
        .open(path)
        .map_err(|e| ShmError::from_open(path, e))
}

/// Map `len` bytes of `file` shared between processes
pub fn map_shared(file: &File, len: usize) -> ShmResult<MmapMut> {
    // SAFETY: the segment file is only ever resized under the init lock,
    // before any mapping of it exists.
    let mmap = unsafe { MmapOptions::new().len(len).map_mut(file)? };
    Ok(mmap)
}

/// Check if process is alive using kill(pid, 0)
pub fn is_process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid as i32), None) {
        Ok(_) => true,
        Err(nix::Error::ESRCH) => false,
        Err(nix::Error::EPERM) => true,
        Err(_) => false,
    }
}

/// Get current process ID
pub fn get_current_pid() -> u32 {
    getpid().as_raw() as u32
}

/// Get parent process ID
pub fn get_parent_pid() -> u32 {
    getppid().as_raw() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_process_is_alive() {
        assert!(is_process_alive(get_current_pid()));
        assert_eq!(get_current_pid(), std::process::id());
    }

    #[test]
    fn test_open_missing_segment_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = open_segment_file(&dir.path().join("missing.shm"), false).unwrap_err();
        assert!(matches!(err, ShmError::NotFound { .. }));
    }
}
