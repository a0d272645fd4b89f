//! Structured logging: a per-iteration JSONL file plus an in-process event
//! bus other components can subscribe to without depending on the file
//! format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::sync::broadcast;

/// One structured line in an iteration's JSONL log. Payloads are truncated
/// the same way the event log truncates them, so a runaway agent reply
/// can't blow up the log file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub ts: DateTime<Utc>,
    pub level: LogLevel,
    pub topic: String,
    pub message: String,
}

const MAX_MESSAGE_LEN: usize = 4000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogRecord {
    pub fn new(level: LogLevel, topic: impl Into<String>, message: impl Into<String>) -> Self {
        let message: String = message.into();
        let message = if message.len() > MAX_MESSAGE_LEN {
            let mut cut = MAX_MESSAGE_LEN;
            while cut > 0 && !message.is_char_boundary(cut) {
                cut -= 1;
            }
            format!("{}... [truncated, {} chars total]", &message[..cut], message.len())
        } else {
            message
        };
        Self {
            ts: Utc::now(),
            level,
            topic: topic.into(),
            message,
        }
    }
}

/// Events fanned out to whatever subscribed via `IterationLogger::subscribe`.
/// Lossy by design: a lagging subscriber drops the oldest events rather than
/// back-pressuring the iteration loop.
#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    IterationStarted { number: u32, task_ids: Vec<String> },
    IterationFinished { number: u32, exit_code: Option<i32> },
    TaskClosed { task_id: String },
    ConflictDetected { path: PathBuf },
    SessionStopped { reason: String },
}

/// Writes one JSONL file per iteration under `.ralph-tui/iterations/`, named
/// `(iterationNumber)-(startedAt).log`, and fans every record out to an
/// in-process broadcast channel.
pub struct IterationLogger {
    dir: PathBuf,
    events: broadcast::Sender<OrchestratorEvent>,
    /// First-log-call timestamp per iteration, so every subsequent append
    /// for the same iteration lands in the same file.
    starts: Mutex<HashMap<u32, DateTime<Utc>>>,
}

fn file_stamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y%m%dT%H%M%S%.3fZ").to_string()
}

impl IterationLogger {
    pub fn new(cwd: &Path) -> Self {
        let (events, _rx) = broadcast::channel(256);
        Self {
            dir: cwd.join(".ralph-tui").join("iterations"),
            events,
            starts: Mutex::new(HashMap::new()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.events.subscribe()
    }

    /// Publishing never blocks on a slow subscriber; with no subscribers at
    /// all `send` returns an error this function deliberately ignores.
    pub fn publish(&self, event: OrchestratorEvent) {
        let _ = self.events.send(event);
    }

    fn path_for(&self, iteration: u32) -> PathBuf {
        let started_at = *self
            .starts
            .lock()
            .unwrap()
            .entry(iteration)
            .or_insert_with(Utc::now);
        self.dir
            .join(format!("{iteration}-{}.log", file_stamp(started_at)))
    }

    pub fn log(&self, iteration: u32, record: &LogRecord) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(iteration);
        let line = serde_json::to_string(record)
            .map_err(|e| io::Error::other(e.to_string()))?;
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    /// Scans the iteration directory for the file belonging to this
    /// iteration number, since the timestamp suffix isn't known to callers
    /// that didn't perform the original `log` call.
    pub fn read_iteration(&self, iteration: u32) -> io::Result<Vec<LogRecord>> {
        let prefix = format!("{iteration}-");
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return Ok(Vec::new());
        };
        let path = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .find(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(&prefix) && n.ends_with(".log"))
            });
        let Some(path) = path else {
            return Ok(Vec::new());
        };
        let content = fs::read_to_string(path)?;
        Ok(content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn log_then_read_round_trips() {
        let dir = TempDir::new().unwrap();
        let logger = IterationLogger::new(dir.path());
        let record = LogRecord::new(LogLevel::Info, "iteration.start", "starting T-1");
        logger.log(1, &record).unwrap();
        let records = logger.read_iteration(1).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].topic, "iteration.start");
    }

    #[test]
    fn read_missing_iteration_is_empty() {
        let dir = TempDir::new().unwrap();
        let logger = IterationLogger::new(dir.path());
        assert!(logger.read_iteration(99).unwrap().is_empty());
    }

    #[test]
    fn long_message_is_truncated() {
        let message = "x".repeat(MAX_MESSAGE_LEN + 100);
        let record = LogRecord::new(LogLevel::Debug, "noisy", message);
        assert!(record.message.contains("truncated"));
    }

    #[test]
    fn subscriber_receives_published_events() {
        let dir = TempDir::new().unwrap();
        let logger = IterationLogger::new(dir.path());
        let mut rx = logger.subscribe();
        logger.publish(OrchestratorEvent::IterationStarted {
            number: 1,
            task_ids: vec!["T-1".into()],
        });
        let event = rx.try_recv().unwrap();
        assert!(matches!(event, OrchestratorEvent::IterationStarted { number: 1, .. }));
    }

    #[test]
    fn publishing_with_no_subscribers_does_not_panic() {
        let dir = TempDir::new().unwrap();
        let logger = IterationLogger::new(dir.path());
        logger.publish(OrchestratorEvent::SessionStopped {
            reason: "no_tasks".into(),
        });
    }
}
