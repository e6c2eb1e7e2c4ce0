//! Bridge error taxonomy
//!
//! Only handshake-class failures propagate to the caller of
//! `ensure_session`; malformed frames, unresolvable paths, and shutdown
//! failures are logged and absorbed at the layer that observes them.

use std::sync::Arc;
use thiserror::Error;

use crate::bridge::host::HostError;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("host error: {0}")]
    Host(#[from] HostError),

    #[error("plugin {0} is disabled")]
    PluginDisabled(String),

    #[error("plugin {0} declares no language id")]
    MissingLanguage(String),

    #[error("request timed out: {method}")]
    RequestTimeout { method: String },

    #[error("language server error {code}: {message}")]
    Server { code: i64, message: String },

    #[error("client connection closed")]
    ClientClosed,

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Result of an establishment another caller initiated; carries the
    /// original failure for every deduplicated waiter.
    #[error("{0}")]
    Shared(Arc<BridgeError>),
}
