//! Push-style event bus between the host supervisor and the bridge
//!
//! The supervisor tags everything it emits with a session id; transports
//! filter the message stream for their own session, and the [`LogSink`]
//! (crate::bridge::log_sink::LogSink) observes the diagnostic stream.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const DEFAULT_BUS_CAPACITY: usize = 256;

/// One inbound frame from a language server process.
///
/// `body` is the raw JSON-RPC text; parsing (and dropping of malformed
/// frames) is the transport's responsibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEnvelope {
    pub session_id: String,
    pub body: String,
}

/// Out-of-band diagnostic event from the supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", rename_all_fields = "camelCase")]
pub enum DiagnosticEvent {
    /// One line of the server process's stderr.
    Stderr {
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        plugin_id: Option<String>,
        #[serde(default)]
        language_id: Option<String>,
        data: String,
    },
    /// The server process exited.
    Exit {
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        plugin_id: Option<String>,
        #[serde(default)]
        language_id: Option<String>,
        #[serde(default)]
        status_code: Option<i32>,
        #[serde(default)]
        signal: Option<i32>,
    },
}

/// Broadcast fan-out of supervisor events to any number of subscribers.
#[derive(Debug, Clone)]
pub struct MessageBus {
    messages: broadcast::Sender<MessageEnvelope>,
    diagnostics: broadcast::Sender<DiagnosticEvent>,
}

impl MessageBus {
    pub fn new(capacity: usize) -> Self {
        let (messages, _) = broadcast::channel(capacity);
        let (diagnostics, _) = broadcast::channel(capacity);
        Self {
            messages,
            diagnostics,
        }
    }

    /// Publish an inbound session frame. Dropped silently when nothing is
    /// subscribed, matching broadcast semantics.
    pub fn publish_message(&self, envelope: MessageEnvelope) {
        let _ = self.messages.send(envelope);
    }

    pub fn publish_diagnostic(&self, event: DiagnosticEvent) {
        let _ = self.diagnostics.send(event);
    }

    pub fn subscribe_messages(&self) -> broadcast::Receiver<MessageEnvelope> {
        self.messages.subscribe()
    }

    pub fn subscribe_diagnostics(&self) -> broadcast::Receiver<DiagnosticEvent> {
        self.diagnostics.subscribe()
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}
