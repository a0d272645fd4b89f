//! Session persistence, cross-directory discovery, and resume.
//!
//! A session's own state lives at `<cwd>/.ralph-tui/session.json`, guarded
//! by an exclusive lock on `<cwd>/.ralph-tui/ralph.lock`, which also carries
//! `{sessionId, pid, startedAt}` as its content so a competing process (or a
//! human) can inspect who holds it without needing a separate pid file. A
//! lightweight entry for each session is also appended to a user-scoped
//! registry so `resume --list` can discover sessions across every directory
//! the user has run one in, without having to remember the path.

use crate::file_lock::FileLock;
use chrono::{DateTime, Utc};
use ralph_proto::{Session, SessionRegistryEntry, SessionStatus};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum SessionManagerError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("session state file is corrupted: {0}; run --cleanup")]
    Corrupted(String),
    #[error("another session is already running in this directory (pid {pid}); use --force to override")]
    LockConflict { pid: u32 },
    #[error("no session found with id {0}")]
    NotFound(String),
}

fn session_dir(cwd: &Path) -> PathBuf {
    cwd.join(".ralph-tui")
}

fn session_file(cwd: &Path) -> PathBuf {
    session_dir(cwd).join("session.json")
}

/// The same path `FileLock::new(session_dir(cwd).join("ralph"))` locks at;
/// written to directly while the lock is held.
fn lock_content_path(cwd: &Path) -> PathBuf {
    session_dir(cwd).join("ralph.lock")
}

fn registry_path() -> PathBuf {
    dirs_home().join(".ralph-tui").join("sessions.json")
}

fn dirs_home() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LockFileContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    session_id: Option<uuid::Uuid>,
    pid: u32,
    started_at: DateTime<Utc>,
}

fn write_lock_content(cwd: &Path, content: &LockFileContent) -> io::Result<()> {
    let json = serde_json::to_string(content).map_err(io::Error::other)?;
    std::fs::write(lock_content_path(cwd), json)
}

fn read_lock_content(cwd: &Path) -> Option<LockFileContent> {
    let raw = std::fs::read_to_string(lock_content_path(cwd)).ok()?;
    serde_json::from_str(&raw).ok()
}

/// Holds the directory-scoped lock for the session's lifetime; dropping it
/// releases the lock.
pub struct SessionGuard {
    cwd: PathBuf,
    _lock: crate::file_lock::LockGuard,
}

impl SessionGuard {
    /// Fills in `sessionId` on the lock file once the session record has
    /// been created; pid/startedAt were already written at `acquire` time.
    pub fn record_session_id(&self, id: uuid::Uuid) -> io::Result<()> {
        let mut content = read_lock_content(&self.cwd).unwrap_or(LockFileContent {
            session_id: None,
            pid: std::process::id(),
            started_at: Utc::now(),
        });
        content.session_id = Some(id);
        write_lock_content(&self.cwd, &content)
    }
}

pub struct SessionManager;

impl SessionManager {
    /// Acquires the directory lock, non-blocking: a session already running
    /// here surfaces as `LockConflict` with that session's pid instead of
    /// hanging behind it.
    pub fn acquire(cwd: &Path, force: bool) -> Result<SessionGuard, SessionManagerError> {
        std::fs::create_dir_all(session_dir(cwd))?;
        let lock = FileLock::new(session_dir(cwd).join("ralph"))?;

        match lock.try_exclusive() {
            Ok(guard) => {
                let content = LockFileContent {
                    session_id: None,
                    pid: std::process::id(),
                    started_at: Utc::now(),
                };
                write_lock_content(cwd, &content)?;
                Ok(SessionGuard { cwd: cwd.to_path_buf(), _lock: guard })
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock && !force => {
                let pid = read_lock_content(cwd).map(|c| c.pid).unwrap_or(0);
                Err(SessionManagerError::LockConflict { pid })
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock && force => {
                // `--force`: the caller has decided to proceed despite a
                // (possibly stale) holder. We cannot steal the flock itself,
                // so instead we just overwrite the content and reopen for a
                // blocking acquire; the previous holder, if actually dead,
                // will have already released its flock.
                let content = LockFileContent {
                    session_id: None,
                    pid: std::process::id(),
                    started_at: Utc::now(),
                };
                write_lock_content(cwd, &content)?;
                let lock2 = FileLock::new(session_dir(cwd).join("ralph"))?;
                let guard = lock2.exclusive()?;
                Ok(SessionGuard { cwd: cwd.to_path_buf(), _lock: guard })
            }
            Err(e) => Err(SessionManagerError::Io(e)),
        }
    }

    pub fn save(&self, session: &Session) -> Result<(), SessionManagerError> {
        let path = session_file(&session.cwd);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(session)
            .map_err(|e| SessionManagerError::Corrupted(e.to_string()))?;
        std::fs::write(&path, json)?;
        self.upsert_registry_entry(session)?;
        Ok(())
    }

    pub fn load(&self, cwd: &Path) -> Result<Option<Session>, SessionManagerError> {
        let path = session_file(cwd);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        let session: Session = serde_json::from_str(&content)
            .map_err(|e| SessionManagerError::Corrupted(e.to_string()))?;
        Ok(Some(session))
    }

    /// Deletes the session file once `should_delete_session_file` says it's
    /// safe, always removing the pid file and registry entry regardless.
    pub fn finalize(&self, session: &Session) -> Result<(), SessionManagerError> {
        if session.should_delete_session_file() {
            let path = session_file(&session.cwd);
            if path.exists() {
                std::fs::remove_file(path)?;
            }
        } else {
            self.save(session)?;
        }
        let _ = std::fs::remove_file(lock_content_path(&session.cwd));
        self.remove_registry_entry(session.id)?;
        Ok(())
    }

    pub fn cleanup(&self, cwd: &Path) -> Result<(), SessionManagerError> {
        let dir = session_dir(cwd);
        for name in ["session.json", "ralph.lock"] {
            let _ = std::fs::remove_file(dir.join(name));
        }
        Ok(())
    }

    fn upsert_registry_entry(&self, session: &Session) -> Result<(), SessionManagerError> {
        self.with_registry(|entries| {
            entries.retain(|e| e.id != session.id);
            entries.push(SessionRegistryEntry {
                id: session.id,
                cwd: session.cwd.clone(),
                status: session.status,
                started_at: session.started_at,
                updated_at: Utc::now(),
                agent_plugin_id: session.agent_plugin_id.clone(),
                tracker_plugin_id: session.tracker_plugin_id.clone(),
                epic_id: None,
                prd_path: None,
                sandboxed: false,
            });
        })
    }

    fn remove_registry_entry(&self, id: uuid::Uuid) -> Result<(), SessionManagerError> {
        self.with_registry(|entries| entries.retain(|e| e.id != id))
    }

    /// Returns every registry entry whose session is no longer resumable
    /// removed first: paused/interrupted entries whose pid is dead, and
    /// anything already completed or failed.
    pub fn list_resumable(&self) -> Result<Vec<SessionRegistryEntry>, SessionManagerError> {
        let mut result = Vec::new();
        self.with_registry(|entries| {
            entries.retain(|e| {
                is_pid_alive(read_lock_content(&e.cwd).map(|c| c.pid))
                    || matches!(e.status, SessionStatus::Paused | SessionStatus::Interrupted)
            });
            result = entries.clone();
        })?;
        Ok(result)
    }

    fn with_registry<F>(&self, f: F) -> Result<(), SessionManagerError>
    where
        F: FnOnce(&mut Vec<SessionRegistryEntry>),
    {
        let path = registry_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let lock = FileLock::new(&path)?;
        let _guard = lock.exclusive()?;

        let mut entries: Vec<SessionRegistryEntry> = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            if content.trim().is_empty() {
                Vec::new()
            } else {
                serde_json::from_str(&content).map_err(|e| SessionManagerError::Corrupted(e.to_string()))?
            }
        } else {
            Vec::new()
        };

        f(&mut entries);

        let json = serde_json::to_string_pretty(&entries)
            .map_err(|e| SessionManagerError::Corrupted(e.to_string()))?;
        std::fs::write(&path, json)?;
        Ok(())
    }
}

#[cfg(unix)]
fn is_pid_alive(pid: Option<u32>) -> bool {
    let Some(pid) = pid else { return false };
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(not(unix))]
fn is_pid_alive(pid: Option<u32>) -> bool {
    pid.is_some()
}

impl SessionGuard {
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ralph_proto::{ErrorHandlingPolicy, TaskCounts};
    use tempfile::TempDir;

    fn sample_session(cwd: &Path) -> Session {
        Session {
            id: uuid::Uuid::new_v4(),
            cwd: cwd.to_path_buf(),
            tracker_plugin_id: "json".into(),
            agent_plugin_id: "claude".into(),
            iteration: 0,
            counts: TaskCounts::default(),
            max_iterations: Some(10),
            iteration_delay_ms: 0,
            error_handling: ErrorHandlingPolicy::default(),
            worktree_path: None,
            status: SessionStatus::Running,
            stop_reason: None,
            started_at: Utc::now(),
            updated_at: Utc::now(),
            config_fingerprint: "abc".into(),
        }
    }

    #[test]
    fn acquire_then_save_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let _guard = SessionManager::acquire(dir.path(), false).unwrap();
        let mgr = SessionManager;
        let session = sample_session(dir.path());
        mgr.save(&session).unwrap();
        let loaded = mgr.load(dir.path()).unwrap().unwrap();
        assert_eq!(loaded.id, session.id);
    }

    #[test]
    fn load_returns_none_when_no_session_exists() {
        let dir = TempDir::new().unwrap();
        let mgr = SessionManager;
        assert!(mgr.load(dir.path()).unwrap().is_none());
    }

    #[test]
    fn finalize_deletes_file_when_fully_closed() {
        let dir = TempDir::new().unwrap();
        let _guard = SessionManager::acquire(dir.path(), false).unwrap();
        let mgr = SessionManager;
        let mut session = sample_session(dir.path());
        session.counts.total = 2;
        session.counts.closed = 2;
        session.set_stop_reason(ralph_proto::StopReason::Completed);
        mgr.save(&session).unwrap();
        mgr.finalize(&session).unwrap();
        assert!(mgr.load(dir.path()).unwrap().is_none());
    }

    #[test]
    fn finalize_keeps_file_when_incomplete() {
        let dir = TempDir::new().unwrap();
        let _guard = SessionManager::acquire(dir.path(), false).unwrap();
        let mgr = SessionManager;
        let mut session = sample_session(dir.path());
        session.counts.total = 3;
        session.counts.closed = 1;
        session.set_stop_reason(ralph_proto::StopReason::UserQuit);
        mgr.save(&session).unwrap();
        mgr.finalize(&session).unwrap();
        assert!(mgr.load(dir.path()).unwrap().is_some());
    }

    #[test]
    fn cleanup_removes_all_session_files() {
        let dir = TempDir::new().unwrap();
        let _guard = SessionManager::acquire(dir.path(), false).unwrap();
        let mgr = SessionManager;
        mgr.save(&sample_session(dir.path())).unwrap();
        mgr.cleanup(dir.path()).unwrap();
        assert!(mgr.load(dir.path()).unwrap().is_none());
    }

    #[test]
    fn acquire_writes_pid_and_started_at_to_lock_file() {
        let dir = TempDir::new().unwrap();
        let _guard = SessionManager::acquire(dir.path(), false).unwrap();
        let content = read_lock_content(dir.path()).unwrap();
        assert_eq!(content.pid, std::process::id());
        assert!(content.session_id.is_none());
    }

    #[test]
    fn record_session_id_fills_in_lock_content_without_losing_pid() {
        let dir = TempDir::new().unwrap();
        let guard = SessionManager::acquire(dir.path(), false).unwrap();
        let id = uuid::Uuid::new_v4();
        guard.record_session_id(id).unwrap();
        let content = read_lock_content(dir.path()).unwrap();
        assert_eq!(content.session_id, Some(id));
        assert_eq!(content.pid, std::process::id());
    }
}
