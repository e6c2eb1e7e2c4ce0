//! Tracing setup for embedding shells
//!
//! The bridge logs through `tracing` and works under whatever subscriber
//! the embedding application installs. Shells without their own setup can
//! call [`init_logging`] to get an env-configured subscriber writing plain
//! or JSON lines to stderr or a file.

use std::env;
use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;

use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Where and how bridge logs are written.
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    /// Filter directive string (`EnvFilter` syntax). Empty means `info`.
    pub filter: String,
    /// Append to this file instead of writing to stderr.
    pub file: Option<PathBuf>,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl LogConfig {
    /// Read `RUST_LOG`, `BRIDGE_LOG_FILE`, and `BRIDGE_LOG_JSON`.
    pub fn from_env() -> Self {
        Self {
            filter: env::var("RUST_LOG").unwrap_or_default(),
            file: env::var("BRIDGE_LOG_FILE").ok().map(PathBuf::from),
            json: truthy(env::var("BRIDGE_LOG_JSON").ok().as_deref()),
        }
    }
}

fn truthy(value: Option<&str>) -> bool {
    matches!(value, Some("1") | Some("true"))
}

/// Install a global subscriber per `config`.
///
/// Fails if the log file cannot be opened or a subscriber is already
/// installed.
pub fn init_logging(config: &LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    let directive = if config.filter.is_empty() {
        "info"
    } else {
        config.filter.as_str()
    };
    let filter = EnvFilter::try_new(directive).or_else(|_| EnvFilter::try_new("info"))?;

    let writer = match &config.file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            BoxMakeWriter::new(std::sync::Arc::new(file))
        }
        None => BoxMakeWriter::new(io::stderr),
    };

    let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(config.file.is_none() && !config.json)
        .with_target(true);
    let registry = tracing_subscriber::registry().with(filter);
    if config.json {
        registry.with(layer.json()).try_init()?;
    } else {
        registry.with(layer).try_init()?;
    }

    Ok(())
}
