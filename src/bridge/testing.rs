//! Test doubles for the bridge
//!
//! [`MockSessionHost`] stands in for the host-side process supervisor. It
//! records every call, and can be configured to answer handshakes, echo
//! requests, fail, or stall, so lifecycle tests never need a real server
//! process.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::bridge::bus::{MessageBus, MessageEnvelope};
use crate::bridge::host::{
    HostError, SendPayload, SessionHost, StartSessionRequest, StartSessionResponse,
};
use crate::bridge::path_map::PathMapping;

/// Scriptable in-memory supervisor.
pub struct MockSessionHost {
    bus: MessageBus,
    start_calls: AtomicUsize,
    stop_calls: AtomicUsize,
    initialize_count: AtomicUsize,
    sent: Mutex<Vec<SendPayload>>,
    path_mapping: Mutex<Option<PathMapping>>,
    start_delay: Mutex<Option<Duration>>,
    answer_initialize: AtomicBool,
    echo_requests: AtomicBool,
    fail_starts: AtomicBool,
    fail_sends: AtomicBool,
    fail_stops: AtomicBool,
}

impl MockSessionHost {
    pub fn new(bus: MessageBus) -> Self {
        Self {
            bus,
            start_calls: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
            initialize_count: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
            path_mapping: Mutex::new(None),
            start_delay: Mutex::new(None),
            answer_initialize: AtomicBool::new(false),
            echo_requests: AtomicBool::new(false),
            fail_starts: AtomicBool::new(false),
            fail_sends: AtomicBool::new(false),
            fail_stops: AtomicBool::new(false),
        }
    }

    /// Reply to `initialize` requests with an empty capability set.
    pub fn answer_initialize(&self, enabled: bool) {
        self.answer_initialize.store(enabled, Ordering::SeqCst);
    }

    /// Reply to every other request by echoing its method back.
    pub fn echo_requests(&self, enabled: bool) {
        self.echo_requests.store(enabled, Ordering::SeqCst);
    }

    pub fn fail_starts(&self, enabled: bool) {
        self.fail_starts.store(enabled, Ordering::SeqCst);
    }

    pub fn fail_sends(&self, enabled: bool) {
        self.fail_sends.store(enabled, Ordering::SeqCst);
    }

    pub fn fail_stops(&self, enabled: bool) {
        self.fail_stops.store(enabled, Ordering::SeqCst);
    }

    pub fn delay_starts(&self, delay: Duration) {
        if let Ok(mut slot) = self.start_delay.lock() {
            *slot = Some(delay);
        }
    }

    pub fn set_path_mapping(&self, mapping: Option<PathMapping>) {
        if let Ok(mut slot) = self.path_mapping.lock() {
            *slot = mapping;
        }
    }

    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub fn initialize_count(&self) -> usize {
        self.initialize_count.load(Ordering::SeqCst)
    }

    pub fn sent_payloads(&self) -> Vec<SendPayload> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }

    fn respond(&self, session_id: &str, id: &Value, result: Value) {
        self.bus.publish_message(MessageEnvelope {
            session_id: session_id.to_string(),
            body: json!({"jsonrpc": "2.0", "id": id, "result": result}).to_string(),
        });
    }
}

#[async_trait]
impl SessionHost for MockSessionHost {
    async fn start_session(
        &self,
        request: StartSessionRequest,
    ) -> Result<StartSessionResponse, HostError> {
        // Counted on entry so abandoned calls are visible too.
        let call = self.start_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = self.start_delay.lock().ok().and_then(|slot| *slot);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_starts.load(Ordering::SeqCst) {
            return Err(HostError::StartRejected("scripted rejection".to_string()));
        }
        let mapping = self.path_mapping.lock().ok().and_then(|slot| slot.clone());
        Ok(StartSessionResponse {
            session_id: format!("session-{call}"),
            plugin_id: request.plugin_id,
            language_id: request
                .language_id
                .unwrap_or_else(|| "plaintext".to_string()),
            initialization_options: request.initialization_options,
            client_capabilities: request.client_capabilities,
            workspace_folders: request.workspace_folders,
            path_mapping: mapping,
        })
    }

    async fn send_payload(&self, payload: SendPayload) -> Result<(), HostError> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(payload.clone());
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(HostError::Dispatch("scripted failure".to_string()));
        }

        let method = payload.payload.get("method").and_then(Value::as_str);
        let id = payload.payload.get("id").cloned();
        match (method, id) {
            (Some("initialize"), Some(id)) => {
                self.initialize_count.fetch_add(1, Ordering::SeqCst);
                if self.answer_initialize.load(Ordering::SeqCst) {
                    self.respond(&payload.session_id, &id, json!({"capabilities": {}}));
                }
            }
            (Some(method), Some(id)) => {
                if self.echo_requests.load(Ordering::SeqCst) {
                    self.respond(
                        &payload.session_id,
                        &id,
                        json!({"echo": {"method": method}}),
                    );
                }
            }
            _ => {}
        }
        Ok(())
    }

    async fn stop_session(&self, session_id: &str) -> Result<(), HostError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_stops.load(Ordering::SeqCst) {
            return Err(HostError::UnknownSession(session_id.to_string()));
        }
        Ok(())
    }
}

/// One-time tracing setup for tests, enabled by the `test-logging` feature.
pub mod logging {
    use std::sync::Once;

    static INIT: Once = Once::new();

    pub fn init() {
        INIT.call_once(|| {
            let filter = tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug"));
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_test_writer()
                .try_init();
        });
    }
}
