//! Session lifecycle management
//!
//! Owns the map of live language server sessions, keyed by plugin and
//! language. `ensure_session` is the only way in: concurrent callers for
//! the same key share a single establishment attempt, and a failed or
//! abandoned attempt leaves no residue so the next caller retries from
//! scratch.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::bridge::bus::MessageBus;
use crate::bridge::client::LspClient;
use crate::bridge::error::BridgeError;
use crate::bridge::host::{SessionHost, StartSessionRequest};
use crate::bridge::path_map::{PathMapper, file_uri_for_path};
use crate::bridge::transport::SessionTransport;

const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);

/// Static description of an installed language plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginDescriptor {
    pub plugin_id: String,
    pub enabled: bool,
    /// Language ids the plugin serves, most specific first.
    #[serde(default)]
    pub language_ids: Vec<String>,
    /// Absolute host path of the workspace the plugin operates on.
    pub workspace_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initialization_options: Option<Value>,
}

/// A live, handshaken session.
pub struct SessionRecord {
    pub session_id: String,
    pub plugin_id: String,
    pub language_id: String,
    pub transport: Arc<SessionTransport>,
    pub client: Arc<LspClient>,
}

impl fmt::Debug for SessionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRecord")
            .field("session_id", &self.session_id)
            .field("plugin_id", &self.plugin_id)
            .field("language_id", &self.language_id)
            .finish_non_exhaustive()
    }
}

/// Tunables for session establishment.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub handshake_timeout: Duration,
    /// Capabilities advertised to every server; `None` lets the client
    /// build its defaults.
    pub client_capabilities: Option<Value>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            client_capabilities: None,
        }
    }
}

/// Map key for one plugin/language pair.
pub fn session_key(plugin_id: &str, language_id: &str) -> String {
    format!("{plugin_id}::{language_id}")
}

type EstablishResult = Result<Arc<SessionRecord>, Arc<BridgeError>>;

/// Owner of all live sessions and in-flight establishment attempts.
pub struct SessionManager {
    host: Arc<dyn SessionHost>,
    bus: MessageBus,
    config: BridgeConfig,
    // Lock order is sessions, then pending. Neither lock is ever held
    // across an await.
    sessions: Mutex<HashMap<String, Arc<SessionRecord>>>,
    pending: Mutex<HashMap<String, broadcast::Sender<EstablishResult>>>,
}

/// Frees a key's pending slot if the initiating future is dropped before
/// it publishes an outcome. Dropping the sender closes every waiter's
/// channel, and they retry against a clean map.
struct PendingGuard<'a> {
    manager: &'a SessionManager,
    key: &'a str,
    armed: bool,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.manager.lock_pending().remove(self.key);
        }
    }
}

impl SessionManager {
    pub fn new(host: Arc<dyn SessionHost>, bus: MessageBus, config: BridgeConfig) -> Self {
        Self {
            host,
            bus,
            config,
            sessions: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn lock_sessions(&self) -> MutexGuard<'_, HashMap<String, Arc<SessionRecord>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_pending(
        &self,
    ) -> MutexGuard<'_, HashMap<String, broadcast::Sender<EstablishResult>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the live session for a plugin/language pair, establishing it
    /// if needed. Concurrent callers for the same key piggyback on one
    /// attempt and all observe its outcome.
    pub async fn ensure_session(
        &self,
        plugin: &PluginDescriptor,
        language_id: Option<&str>,
    ) -> Result<Arc<SessionRecord>, BridgeError> {
        if !plugin.enabled {
            return Err(BridgeError::PluginDisabled(plugin.plugin_id.clone()));
        }
        let language = match language_id {
            Some(language) => language.to_string(),
            None => plugin
                .language_ids
                .first()
                .cloned()
                .ok_or_else(|| BridgeError::MissingLanguage(plugin.plugin_id.clone()))?,
        };
        let key = session_key(&plugin.plugin_id, &language);

        enum Role {
            Live(Arc<SessionRecord>),
            Waiter(broadcast::Receiver<EstablishResult>),
            Initiator,
        }

        loop {
            // Check live, check pending, insert pending: one critical
            // section, so two callers can never both become initiator.
            let role = {
                let sessions = self.lock_sessions();
                let mut pending = self.lock_pending();
                if let Some(record) = sessions.get(&key) {
                    Role::Live(record.clone())
                } else if let Some(tx) = pending.get(&key) {
                    Role::Waiter(tx.subscribe())
                } else {
                    let (tx, _) = broadcast::channel(1);
                    pending.insert(key.clone(), tx);
                    Role::Initiator
                }
            };

            match role {
                Role::Live(record) => return Ok(record),
                Role::Waiter(mut rx) => {
                    debug!(key = %key, "joining in-flight session establishment");
                    match rx.recv().await {
                        Ok(Ok(record)) => return Ok(record),
                        Ok(Err(err)) => return Err(BridgeError::Shared(err)),
                        // The initiator was dropped before publishing; its
                        // guard freed the slot, so start over.
                        Err(_) => continue,
                    }
                }
                Role::Initiator => {
                    let mut guard = PendingGuard {
                        manager: self,
                        key: &key,
                        armed: true,
                    };
                    let outcome = self.establish(plugin, &language).await;
                    return match outcome {
                        Ok(record) => {
                            self.publish_outcome(&key, Ok(record.clone()));
                            guard.armed = false;
                            info!(
                                key = %key,
                                session_id = %record.session_id,
                                "language server session established"
                            );
                            Ok(record)
                        }
                        Err(err) => {
                            let err = Arc::new(err);
                            self.publish_outcome(&key, Err(err.clone()));
                            guard.armed = false;
                            warn!(key = %key, error = %err, "session establishment failed");
                            Err(BridgeError::Shared(err))
                        }
                    };
                }
            }
        }
    }

    /// Atomically retire the pending slot, install the record if the
    /// attempt succeeded, and wake every waiter.
    fn publish_outcome(&self, key: &str, outcome: EstablishResult) {
        let mut sessions = self.lock_sessions();
        let mut pending = self.lock_pending();
        let tx = pending.remove(key);
        if let Ok(record) = &outcome {
            sessions.insert(key.to_string(), record.clone());
        }
        if let Some(tx) = tx {
            let _ = tx.send(outcome);
        }
    }

    async fn establish(
        &self,
        plugin: &PluginDescriptor,
        language: &str,
    ) -> Result<Arc<SessionRecord>, BridgeError> {
        let response = self
            .host
            .start_session(StartSessionRequest {
                plugin_id: plugin.plugin_id.clone(),
                language_id: Some(language.to_string()),
                workspace_path: plugin.workspace_path.clone(),
                client_capabilities: self.config.client_capabilities.clone(),
                workspace_folders: None,
                initialization_options: plugin.initialization_options.clone(),
            })
            .await?;

        let mapper = PathMapper::new(response.path_mapping.clone());

        // The root URI stays in host space; the transport rewrites it on
        // the way out. Workspace folder defaults are injected after that
        // rewrite, so they are computed in guest space here.
        let host_root_uri = file_uri_for_path(&plugin.workspace_path);
        let workspace_folders = match response.workspace_folders.clone() {
            Some(folders) => folders,
            None => {
                let name = plugin
                    .workspace_path
                    .rsplit('/')
                    .find(|segment| !segment.is_empty())
                    .unwrap_or("workspace");
                json!([{
                    "uri": mapper.host_path_to_file_uri(&plugin.workspace_path),
                    "name": name,
                }])
            }
        };

        let transport = SessionTransport::spawn(
            response.session_id.clone(),
            response.initialization_options.clone(),
            Some(workspace_folders),
            mapper,
            self.host.clone(),
            self.bus.subscribe_messages(),
        );
        let client = LspClient::connect(transport.clone());

        let handshake = client
            .initialize(
                Some(host_root_uri),
                response.client_capabilities.clone(),
                response.initialization_options.clone(),
                self.config.handshake_timeout,
            )
            .await;
        if let Err(err) = handshake {
            client.disconnect();
            transport.shutdown().await;
            return Err(err);
        }

        Ok(Arc::new(SessionRecord {
            session_id: response.session_id,
            plugin_id: response.plugin_id,
            language_id: response.language_id,
            transport,
            client,
        }))
    }

    /// Tear down one session. A key with no live session is a no-op, so
    /// repeated disposal is safe.
    pub fn dispose_session(&self, key: &str) {
        let record = self.lock_sessions().remove(key);
        let Some(record) = record else {
            return;
        };
        info!(key = %key, session_id = %record.session_id, "disposing session");
        record.client.disconnect();
        let transport = record.transport.clone();
        tokio::spawn(async move {
            transport.shutdown().await;
        });
    }

    /// Drop every session whose plugin is no longer in the enabled set.
    pub fn retain_plugins(&self, enabled: &HashSet<String>) {
        let stale: Vec<String> = {
            let sessions = self.lock_sessions();
            sessions
                .iter()
                .filter(|(_, record)| !enabled.contains(&record.plugin_id))
                .map(|(key, _)| key.clone())
                .collect()
        };
        for key in stale {
            self.dispose_session(&key);
        }
    }

    /// Tear down everything, for a workspace switch.
    pub fn reset_workspace(&self) {
        let keys: Vec<String> = self.lock_sessions().keys().cloned().collect();
        for key in keys {
            self.dispose_session(&key);
        }
    }

    pub fn session_count(&self) -> usize {
        self.lock_sessions().len()
    }

    pub fn live_keys(&self) -> Vec<String> {
        self.lock_sessions().keys().cloned().collect()
    }
}

// ============================================================================
// Tests
// ============================================================================
