//! Host-side process supervisor interface
//!
//! The bridge never spawns or supervises language server processes itself;
//! it talks to a host supervisor through this trait. Request and response
//! shapes mirror the supervisor's camelCase wire format.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bridge::path_map::PathMapping;

/// Errors surfaced by the host supervisor.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("session start rejected: {0}")]
    StartRejected(String),

    #[error("unknown session: {0}")]
    UnknownSession(String),

    #[error("host dispatch failed: {0}")]
    Dispatch(String),
}

/// Request to start one language server session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionRequest {
    pub plugin_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_id: Option<String>,
    /// Absolute host path of the workspace/project folder.
    pub workspace_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_capabilities: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_folders: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initialization_options: Option<Value>,
}

/// Supervisor's answer to a successful session start.
///
/// The supervisor may normalize the requested language id, and reports the
/// sandbox mount layout when one applies (`path_mapping: None` means the
/// guest sees real host paths).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionResponse {
    pub session_id: String,
    pub plugin_id: String,
    pub language_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initialization_options: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_capabilities: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_folders: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_mapping: Option<PathMapping>,
}

/// One outbound JSON-RPC message, addressed to a live session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendPayload {
    pub session_id: String,
    pub payload: Value,
}

/// Asynchronous handle to the host-side process supervisor.
///
/// Inbound traffic does not flow through this trait; the supervisor pushes
/// it onto the [`MessageBus`](crate::bridge::bus::MessageBus) instead.
#[async_trait]
pub trait SessionHost: Send + Sync {
    /// Start a language server session for a plugin/language pair.
    async fn start_session(
        &self,
        request: StartSessionRequest,
    ) -> Result<StartSessionResponse, HostError>;

    /// Forward one JSON-RPC message to a session's server process.
    async fn send_payload(&self, payload: SendPayload) -> Result<(), HostError>;

    /// Request teardown of a session's server process.
    async fn stop_session(&self, session_id: &str) -> Result<(), HostError>;
}
