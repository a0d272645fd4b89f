//! Advisory file locking for shared resources.
//!
//! Used by the JSON-PRD tracker and the merge queue so that a session
//! worktree and its worker worktrees never race on the same underlying
//! file. Shared locks allow concurrent reads; exclusive locks serialize
//! writes. Locks are released automatically when the guard drops.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct FileLock {
    lock_path: PathBuf,
}

impl FileLock {
    /// Locks at `{path}.lock`, never the target file itself, so truncation
    /// or atomic replacement of `path` never disturbs lock state.
    pub fn new(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let mut lock_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        lock_name.push_str(".lock");
        let lock_path = path.with_file_name(lock_name);

        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        Ok(Self { lock_path })
    }

    pub fn shared(&self) -> io::Result<LockGuard> {
        self.acquire(LockType::Shared)
    }

    pub fn exclusive(&self) -> io::Result<LockGuard> {
        self.acquire(LockType::Exclusive, false)
    }

    /// Like `exclusive`, but returns `ErrorKind::WouldBlock` immediately
    /// instead of waiting, so the session manager can report the holding
    /// PID rather than hang behind it.
    pub fn try_exclusive(&self) -> io::Result<LockGuard> {
        self.acquire(LockType::Exclusive, true)
    }

    fn acquire(&self, lock_type: LockType, nonblocking: bool) -> io::Result<LockGuard> {
        let file = self.open_lock_file()?;

        #[cfg(unix)]
        {
            use nix::fcntl::{Flock, FlockArg};

            let arg = match (lock_type, nonblocking) {
                (LockType::Shared, false) => FlockArg::LockShared,
                (LockType::Shared, true) => FlockArg::LockSharedNonblock,
                (LockType::Exclusive, false) => FlockArg::LockExclusive,
                (LockType::Exclusive, true) => FlockArg::LockExclusiveNonblock,
            };

            match Flock::lock(file, arg) {
                Ok(flock) => Ok(LockGuard { _flock: flock }),
                Err((_, errno)) if nonblocking && errno == nix::errno::Errno::EWOULDBLOCK => {
                    Err(io::Error::from(io::ErrorKind::WouldBlock))
                }
                Err((_, errno)) => Err(io::Error::other(format!("flock failed: {errno}"))),
            }
        }

        #[cfg(not(unix))]
        {
            let _ = (file, lock_type, nonblocking);
            Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "file locking requires unix",
            ))
        }
    }

    fn open_lock_file(&self) -> io::Result<File> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)
    }
}

#[derive(Debug, Clone, Copy)]
enum LockType {
    Shared,
    Exclusive,
}

#[derive(Debug)]
pub struct LockGuard {
    #[cfg(unix)]
    _flock: nix::fcntl::Flock<File>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn shared_locks_can_coexist() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tasks.json");
        let lock1 = FileLock::new(&path).unwrap();
        let lock2 = FileLock::new(&path).unwrap();
        let _g1 = lock1.shared().unwrap();
        assert!(lock2.shared().is_ok());
    }

    #[test]
    fn exclusive_lock_is_exclusive_within_process() {
        // Within one process flock is per-fd; this test only checks the
        // guard round-trips without error.
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tasks.json");
        let lock = FileLock::new(&path).unwrap();
        let guard = lock.exclusive();
        assert!(guard.is_ok());
    }

    #[test]
    fn lock_file_lives_alongside_target() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tasks.json");
        let lock = FileLock::new(&path).unwrap();
        assert_eq!(lock.lock_path, dir.path().join("tasks.json.lock"));
    }

    #[test]
    fn try_exclusive_round_trips_without_a_competing_holder() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.lock");
        let lock = FileLock::new(&path).unwrap();
        assert!(lock.try_exclusive().is_ok());
    }
}
