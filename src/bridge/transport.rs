//! Per-session duplex transport
//!
//! Adapts one session's slice of the host message bus to the duplex
//! contract an LSP client expects: `send`, `subscribe`/`unsubscribe`,
//! `dispose`, `shutdown`. Every message moved in either direction passes
//! through the session's [`PathMapper`], so subscribers always see host
//! paths and the remote process always sees guest paths.
//!
//! The transport is a resilient relay: malformed frames are dropped with a
//! debug log and send failures are logged, never raised into the client's
//! state machine.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::bridge::bus::MessageEnvelope;
use crate::bridge::host::{SendPayload, SessionHost};
use crate::bridge::path_map::{Direction, PathMapper};

/// Token returned by [`SessionTransport::subscribe`], used to unsubscribe.
pub type HandlerId = u64;

type MessageHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Duplex message transport for one language server session.
pub struct SessionTransport {
    session_id: String,
    mapper: PathMapper,
    host: Arc<dyn SessionHost>,
    /// Defaults injected into an `initialize` request when the caller's
    /// params omit them; caller-provided values always win.
    initialization_options: Option<Value>,
    workspace_folders: Option<Value>,
    handlers: Mutex<Vec<(HandlerId, MessageHandler)>>,
    next_handler_id: AtomicU64,
    disposed: AtomicBool,
    stop_requested: AtomicBool,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl SessionTransport {
    /// Construct a transport and start its bus reader task.
    ///
    /// The reader filters the bus for this session id and delivers each
    /// frame to the subscribed handlers after a `ToHost` rewrite.
    pub fn spawn(
        session_id: impl Into<String>,
        initialization_options: Option<Value>,
        workspace_folders: Option<Value>,
        mapper: PathMapper,
        host: Arc<dyn SessionHost>,
        inbound: broadcast::Receiver<MessageEnvelope>,
    ) -> Arc<Self> {
        let transport = Arc::new(Self {
            session_id: session_id.into(),
            mapper,
            host,
            initialization_options,
            workspace_folders,
            handlers: Mutex::new(Vec::new()),
            next_handler_id: AtomicU64::new(1),
            disposed: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            reader: Mutex::new(None),
        });

        let task = tokio::spawn(Self::reader_task(Arc::downgrade(&transport), inbound));

        // An early dispose() may have raced ahead of task registration; the
        // disposed flag decides whether the task attaches or dies here.
        if transport.disposed.load(Ordering::SeqCst) {
            task.abort();
        } else if let Ok(mut reader) = transport.reader.lock() {
            *reader = Some(task);
        }

        transport
    }

    async fn reader_task(
        transport: Weak<SessionTransport>,
        mut inbound: broadcast::Receiver<MessageEnvelope>,
    ) {
        loop {
            match inbound.recv().await {
                Ok(envelope) => {
                    let Some(transport) = transport.upgrade() else {
                        break;
                    };
                    if envelope.session_id != transport.session_id {
                        continue;
                    }
                    transport.deliver_inbound(&envelope.body);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "transport reader lagged behind the message bus");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    fn deliver_inbound(&self, body: &str) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }

        let parsed: Value = match serde_json::from_str(body) {
            Ok(value) => value,
            Err(err) => {
                debug!(
                    session_id = %self.session_id,
                    error = %err,
                    "dropping malformed inbound frame"
                );
                return;
            }
        };

        let rewritten = self.mapper.transform_message(&parsed, Direction::ToHost);
        let text = rewritten.to_string();

        // Snapshot the handler list so a handler may unsubscribe (itself or
        // others) during delivery without invalidating the iteration.
        let snapshot: Vec<MessageHandler> = match self.handlers.lock() {
            Ok(handlers) => handlers.iter().map(|(_, h)| h.clone()).collect(),
            Err(_) => return,
        };
        for handler in snapshot {
            handler(&text);
        }
    }

    /// Forward one JSON-RPC message to the remote session.
    ///
    /// The message is rewritten `ToGuest`; `initialize` requests receive
    /// the constructor-supplied defaults for any param they omit. Failures
    /// are logged and swallowed.
    pub async fn send(&self, message: &str) {
        let parsed: Value = match serde_json::from_str(message) {
            Ok(value) => value,
            Err(err) => {
                debug!(
                    session_id = %self.session_id,
                    error = %err,
                    "dropping malformed outbound message"
                );
                return;
            }
        };

        let mut outbound = self.mapper.transform_message(&parsed, Direction::ToGuest);
        self.augment_initialize(&mut outbound);

        let payload = SendPayload {
            session_id: self.session_id.clone(),
            payload: outbound,
        };
        if let Err(err) = self.host.send_payload(payload).await {
            warn!(
                session_id = %self.session_id,
                error = %err,
                "failed to dispatch message to host"
            );
        }
    }

    fn augment_initialize(&self, message: &mut Value) {
        if message.get("method").and_then(Value::as_str) != Some("initialize") {
            return;
        }
        if !message.get("params").is_some_and(Value::is_object) {
            message["params"] = Value::Object(serde_json::Map::new());
        }
        let Some(params) = message["params"].as_object_mut() else {
            return;
        };
        if !params.contains_key("initializationOptions") {
            if let Some(options) = &self.initialization_options {
                params.insert("initializationOptions".to_string(), options.clone());
            }
        }
        if !params.contains_key("workspaceFolders") {
            if let Some(folders) = &self.workspace_folders {
                params.insert("workspaceFolders".to_string(), folders.clone());
            }
        }
    }

    /// Register a handler for inbound messages; delivery follows
    /// subscription order.
    pub fn subscribe(&self, handler: impl Fn(&str) + Send + Sync + 'static) -> HandlerId {
        let id = self.next_handler_id.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut handlers) = self.handlers.lock() {
            handlers.push((id, Arc::new(handler)));
        }
        id
    }

    pub fn unsubscribe(&self, id: HandlerId) {
        if let Ok(mut handlers) = self.handlers.lock() {
            handlers.retain(|(handler_id, _)| *handler_id != id);
        }
    }

    /// Stop inbound delivery. Idempotent, and safe to call while the
    /// reader task is still attaching.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Ok(mut reader) = self.reader.lock() {
            if let Some(task) = reader.take() {
                task.abort();
            }
        }
        debug!(session_id = %self.session_id, "transport disposed");
    }

    /// Dispose, then ask the host to stop the remote session.
    ///
    /// Best-effort cleanup: a failed stop is logged, never propagated. The
    /// remote stop is issued at most once across repeated calls.
    pub async fn shutdown(&self) {
        self.dispose();
        if self.stop_requested.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(err) = self.host.stop_session(&self.session_id).await {
            warn!(
                session_id = %self.session_id,
                error = %err,
                "remote stop failed during shutdown"
            );
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Tests
// ============================================================================
