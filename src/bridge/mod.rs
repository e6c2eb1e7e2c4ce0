//! Language server session bridge
//!
//! Connects an editor-side LSP client to language server processes that a
//! host supervisor runs on its side of a sandbox boundary, with proper
//! separation of concerns:
//!
//! - **Path mapping**: host/guest path and URI translation
//! - **Transport**: per-session duplex message relay over the host bus
//! - **Client**: JSON-RPC correlation and the LSP handshake
//! - **Session**: lifecycle, keyed caching, and deduplicated establishment
//! - **Log sink**: bounded retention of server stderr and exit notices

pub mod bus;
pub mod client;
pub mod error;
pub mod host;
pub mod log_sink;
pub mod path_map;
pub mod session;
pub mod transport;

#[cfg(test)]
pub mod testing;

pub use bus::{DiagnosticEvent, MessageBus, MessageEnvelope};
pub use client::LspClient;
pub use error::BridgeError;
pub use host::{HostError, SendPayload, SessionHost, StartSessionRequest, StartSessionResponse};
pub use log_sink::{LogEntry, LogLevel, LogSink};
pub use path_map::{Direction, PathMapper, PathMapping};
pub use session::{BridgeConfig, PluginDescriptor, SessionManager, SessionRecord, session_key};
pub use transport::{HandlerId, SessionTransport};
