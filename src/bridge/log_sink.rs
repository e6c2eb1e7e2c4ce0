//! Bounded diagnostic log
//!
//! Retains the most recent stderr lines and exit notices from language
//! server processes so a debug panel can show them on demand. The buffer
//! is a fixed-capacity ring; old entries fall off the front.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Weak};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

use crate::bridge::bus::DiagnosticEvent;

pub const DEFAULT_LOG_CAPACITY: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Stderr,
    Info,
}

/// One retained diagnostic line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub plugin_id: Option<String>,
    #[serde(default)]
    pub language_id: Option<String>,
    pub level: LogLevel,
    pub message: String,
}

/// Fixed-capacity ring buffer of diagnostic entries.
pub struct LogSink {
    entries: Mutex<VecDeque<LogEntry>>,
    capacity: usize,
}

impl LogSink {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_LOG_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        // A zero-capacity ring would never retain anything; clamp to one.
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Record a line, stamping it with a fresh id and timestamp and
    /// evicting the oldest entry if the buffer is full.
    pub fn append(
        &self,
        level: LogLevel,
        session_id: Option<String>,
        plugin_id: Option<String>,
        language_id: Option<String>,
        message: impl Into<String>,
    ) {
        let entry = LogEntry {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            session_id,
            plugin_id,
            language_id,
            level,
            message: message.into(),
        };
        if let Ok(mut entries) = self.entries.lock() {
            while entries.len() >= self.capacity {
                entries.pop_front();
            }
            entries.push_back(entry);
        }
    }

    /// Translate a supervisor event into a retained entry.
    pub fn observe(&self, event: DiagnosticEvent) {
        match event {
            DiagnosticEvent::Stderr {
                session_id,
                plugin_id,
                language_id,
                data,
            } => self.append(LogLevel::Stderr, session_id, plugin_id, language_id, data),
            DiagnosticEvent::Exit {
                session_id,
                plugin_id,
                language_id,
                status_code,
                signal,
            } => self.append(
                LogLevel::Info,
                session_id,
                plugin_id,
                language_id,
                exit_message(status_code, signal),
            ),
        }
    }

    /// Spawn a task that feeds this sink from a diagnostic subscription.
    /// The task ends when the bus closes or the sink is dropped.
    pub fn attach(self: &Arc<Self>, mut receiver: broadcast::Receiver<DiagnosticEvent>) -> JoinHandle<()> {
        let sink: Weak<LogSink> = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        let Some(sink) = sink.upgrade() else {
                            break;
                        };
                        sink.observe(event);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "log sink lagged behind the diagnostic stream");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Snapshot of the retained entries, oldest first.
    pub fn entries(&self) -> Vec<LogEntry> {
        match self.entries.lock() {
            Ok(entries) => entries.iter().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new()
    }
}

fn exit_message(status_code: Option<i32>, signal: Option<i32>) -> String {
    match (status_code, signal) {
        (Some(code), _) => format!("language server exited with status {code}"),
        (None, Some(signal)) => format!("language server killed by signal {signal}"),
        (None, None) => "language server exited".to_string(),
    }
}

// ============================================================================
// Tests
// ============================================================================
