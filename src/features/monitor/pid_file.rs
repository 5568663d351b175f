use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{Result, SyncError};
use crate::features::monitor::process;

/// Single-instance guard. Holding a `PidFile` means this process owns the
/// file; dropping it removes the file if it still names this process.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
    pid: u32,
}

impl PidFile {
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(pid) = read_pid(path) {
            if process::is_alive(pid) {
                return Err(SyncError::AlreadyRunning {
                    pid,
                    path: path.to_path_buf(),
                });
            }
            log::warn!("Removing stale pid file {} (PID {})", path.display(), pid);
        }

        let pid = std::process::id();
        write_pid(path, pid)?;
        log::debug!("Wrote PID {} to {}", pid, path.display());
        Ok(Self {
            path: path.to_path_buf(),
            pid,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if read_pid(&self.path) == i32::try_from(self.pid).ok() {
            remove_pid_file(&self.path);
        }
    }
}

/// PID recorded in `path`, if the file exists and holds a plausible PID.
pub fn read_pid(path: &Path) -> Option<i32> {
    let content = fs::read_to_string(path).ok()?;
    content.trim().parse::<i32>().ok().filter(|pid| *pid > 1)
}

pub fn write_pid(path: &Path, pid: u32) -> Result<()> {
    fs::write(path, format!("{}\n", pid)).map_err(|e| SyncError::io(path, e))
}

pub fn remove_pid_file(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => log::debug!("Removed {}", path.display()),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => log::warn!("Cannot remove {}: {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_acquire_rejects_live_pid() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("monitor.pid");
        write_pid(&path, std::process::id()).unwrap();

        let err = PidFile::acquire(&path).unwrap_err();
        assert!(matches!(err, SyncError::AlreadyRunning { .. }));
        // The guard must not clobber the live owner's file.
        assert_eq!(read_pid(&path), i32::try_from(std::process::id()).ok());
    }

    #[test]
    fn test_acquire_replaces_stale_pid() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("monitor.pid");
        // Above the default pid_max, so never a live process.
        fs::write(&path, "2147483000\n").unwrap();

        let guard = PidFile::acquire(&path).unwrap();
        assert_eq!(read_pid(guard.path()), i32::try_from(std::process::id()).ok());
    }

    #[test]
    fn test_drop_releases_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("monitor.pid");
        {
            let _guard = PidFile::acquire(&path).unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_drop_leaves_foreign_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("monitor.pid");
        let guard = PidFile::acquire(&path).unwrap();
        fs::write(&path, "2147483000\n").unwrap();
        drop(guard);
        assert!(path.exists());
    }

    #[test]
    fn test_read_pid_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("x.pid");
        assert_eq!(read_pid(&path), None);
        fs::write(&path, "abc").unwrap();
        assert_eq!(read_pid(&path), None);
        fs::write(&path, "1").unwrap();
        assert_eq!(read_pid(&path), None);
        fs::write(&path, " 4242 \n").unwrap();
        assert_eq!(read_pid(&path), Some(4242));
    }
}
