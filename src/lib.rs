//! lsp-session-bridge
//!
//! Embeddable bridge between an editor-side LSP client and language server
//! processes supervised by a host on the far side of a sandbox boundary.
//! The host owns process lifecycles and pushes raw frames onto a session
//! tagged bus; this crate owns path translation, message correlation, the
//! LSP handshake, session caching, and diagnostic retention.
//!
//! Typical wiring:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use lsp_session_bridge::bridge::{
//!     BridgeConfig, LogSink, MessageBus, SessionHost, SessionManager,
//! };
//!
//! # fn wire(host: Arc<dyn SessionHost>) {
//! let bus = MessageBus::default();
//! let manager = SessionManager::new(host, bus.clone(), BridgeConfig::default());
//! let sink = Arc::new(LogSink::new());
//! sink.attach(bus.subscribe_diagnostics());
//! # let _ = manager;
//! # }
//! ```

pub mod bridge;
pub mod logging;

pub use bridge::{
    BridgeConfig, BridgeError, LogSink, MessageBus, PathMapper, PathMapping, PluginDescriptor,
    SessionHost, SessionManager,
};
