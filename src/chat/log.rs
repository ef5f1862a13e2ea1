use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// One line of the chat audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatLogEntry {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub query: String,
    pub response: String,
    pub is_crisis: bool,
}

/// Append-only JSON-lines audit trail of every answered chat message.
/// Write failures are logged and swallowed.
pub struct ChatLogger {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl ChatLogger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn log_chat(&self, session_id: &str, query: &str, response: &str, is_crisis: bool) {
        let entry = ChatLogEntry {
            timestamp: Utc::now(),
            session_id: session_id.to_owned(),
            query: query.to_owned(),
            response: response.to_owned(),
            is_crisis,
        };

        if is_crisis {
            info!(session_id, is_crisis, "crisis message answered with safety resources");
        }

        if let Err(e) = self.append(&entry) {
            warn!(path = %self.path.display(), error = %e, "could not write chat log");
        }
    }

    fn append(&self, entry: &ChatLogEntry) -> std::io::Result<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let _guard = self.write_lock.lock();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())
    }

    /// Every entry written so far; unreadable lines are skipped.
    pub fn entries(&self) -> Vec<ChatLogEntry> {
        std::fs::read_to_string(&self.path)
            .unwrap_or_default()
            .lines()
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect()
    }
}
