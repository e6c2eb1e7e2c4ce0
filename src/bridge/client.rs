//! JSON-RPC client over a session transport
//!
//! Correlates requests with responses by id, drives the LSP
//! `initialize`/`initialized` handshake, and exposes fire-and-forget
//! notifications. Everything below the correlation layer (path rewriting,
//! dispatch) belongs to [`SessionTransport`].

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use lsp_types::{
    ClientCapabilities, HoverClientCapabilities, InitializeResult, MarkupKind,
    TextDocumentClientCapabilities, WorkspaceClientCapabilities,
};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::bridge::error::BridgeError;
use crate::bridge::transport::{HandlerId, SessionTransport};

/// Request/response correlation and handshake driver for one session.
pub struct LspClient {
    transport: Arc<SessionTransport>,
    pending: Mutex<HashMap<i64, tokio::sync::oneshot::Sender<Value>>>,
    next_id: AtomicI64,
    subscription: Mutex<Option<HandlerId>>,
    closed: AtomicBool,
}

impl LspClient {
    /// Attach a client to a transport and start routing responses.
    pub fn connect(transport: Arc<SessionTransport>) -> Arc<Self> {
        let client = Arc::new(Self {
            transport: transport.clone(),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
            subscription: Mutex::new(None),
            closed: AtomicBool::new(false),
        });

        let weak: Weak<LspClient> = Arc::downgrade(&client);
        let id = transport.subscribe(move |message| {
            if let Some(client) = weak.upgrade() {
                client.route_inbound(message);
            }
        });
        if let Ok(mut subscription) = client.subscription.lock() {
            *subscription = Some(id);
        }

        client
    }

    fn route_inbound(&self, message: &str) {
        let Ok(parsed) = serde_json::from_str::<Value>(message) else {
            return;
        };
        // Responses carry an id plus result or error and no method; server
        // requests and notifications fall through to other subscribers.
        if parsed.get("method").is_some() {
            return;
        }
        let Some(id) = parsed.get("id").and_then(Value::as_i64) else {
            return;
        };
        if parsed.get("result").is_none() && parsed.get("error").is_none() {
            return;
        }

        let sender = match self.pending.lock() {
            Ok(mut pending) => pending.remove(&id),
            Err(_) => None,
        };
        match sender {
            Some(sender) => {
                let _ = sender.send(parsed);
            }
            None => {
                debug!(id, "response for unknown or abandoned request");
            }
        }
    }

    /// Issue a request and await its response within `timeout`.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, BridgeError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BridgeError::ClientClosed);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = tokio::sync::oneshot::channel();
        if let Ok(mut pending) = self.pending.lock() {
            pending.insert(id, tx);
        }

        let mut message = json!({"jsonrpc": "2.0", "id": id, "method": method});
        if let Some(params) = params {
            message["params"] = params;
        }
        self.transport.send(&message.to_string()).await;

        let response = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(BridgeError::ClientClosed),
            Err(_) => {
                if let Ok(mut pending) = self.pending.lock() {
                    pending.remove(&id);
                }
                return Err(BridgeError::RequestTimeout {
                    method: method.to_string(),
                });
            }
        };

        if let Some(error) = response.get("error") {
            let code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            return Err(BridgeError::Server { code, message });
        }

        Ok(response.get("result").cloned().unwrap_or(Value::Null))
    }

    /// Send a notification; no response is expected.
    pub async fn notify(&self, method: &str, params: Value) {
        if self.closed.load(Ordering::SeqCst) {
            warn!(method, "notify on a closed client");
            return;
        }
        let message = json!({"jsonrpc": "2.0", "method": method, "params": params});
        self.transport.send(&message.to_string()).await;
    }

    /// Run the LSP handshake: `initialize`, then the `initialized`
    /// notification once the server answers.
    pub async fn initialize(
        &self,
        root_uri: Option<String>,
        capabilities: Option<Value>,
        initialization_options: Option<Value>,
        timeout: Duration,
    ) -> Result<InitializeResult, BridgeError> {
        let capabilities = match capabilities {
            Some(value) => value,
            None => serde_json::to_value(default_client_capabilities())?,
        };

        let mut params = json!({
            "processId": Value::Null,
            "capabilities": capabilities,
            "rootUri": root_uri,
        });
        if let Some(options) = initialization_options {
            params["initializationOptions"] = options;
        }

        let result = self.request("initialize", Some(params), timeout).await?;
        let initialize_result: InitializeResult = serde_json::from_value(result)?;

        self.notify("initialized", json!({})).await;
        debug!(
            session_id = %self.transport.session_id(),
            "LSP handshake complete"
        );

        Ok(initialize_result)
    }

    /// Stop routing and fail all in-flight requests. Idempotent.
    pub fn disconnect(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Ok(mut subscription) = self.subscription.lock() {
            if let Some(id) = subscription.take() {
                self.transport.unsubscribe(id);
            }
        }
        // Dropping the senders resolves every pending receiver as closed.
        if let Ok(mut pending) = self.pending.lock() {
            pending.clear();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Capability set advertised when the host supplies none.
fn default_client_capabilities() -> ClientCapabilities {
    ClientCapabilities {
        workspace: Some(WorkspaceClientCapabilities {
            workspace_folders: Some(true),
            configuration: Some(false),
            ..Default::default()
        }),
        text_document: Some(TextDocumentClientCapabilities {
            hover: Some(HoverClientCapabilities {
                content_format: Some(vec![MarkupKind::Markdown, MarkupKind::PlainText]),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

// ============================================================================
// Tests
// ============================================================================
