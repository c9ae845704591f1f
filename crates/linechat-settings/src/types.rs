//! Settings types for the relay server and its logging.

use serde::{Deserialize, Serialize};

/// Root settings document (`~/.linechat/settings.json`).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LinechatSettings {
    /// Listener and per-connection settings.
    pub server: ServerSettings,
    /// Log output settings.
    pub logging: LoggingSettings,
}

/// Listener and per-connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listening port (`0` auto-assigns).
    pub port: u16,
    /// Seconds without inbound activity before a client is forced offline.
    pub idle_timeout_secs: u64,
    /// Longest accepted command line in bytes.
    pub max_line_length: usize,
    /// Seconds a closing session may spend flushing its outbound queue.
    pub shutdown_grace_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8888,
            idle_timeout_secs: 60,
            max_line_length: 4096,
            shutdown_grace_secs: 5,
        }
    }
}

/// Minimum level for emitted log events.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace-level (most verbose).
    Trace,
    /// Debug-level.
    Debug,
    /// Info-level (default).
    #[default]
    Info,
    /// Warning-level.
    Warn,
    /// Error-level.
    Error,
}

impl LogLevel {
    /// Convert to a tracing filter string.
    pub fn as_filter_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Log line layout on stdout.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

/// Logging configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level; `RUST_LOG` takes precedence when set.
    pub level: LogLevel,
    /// Output layout.
    pub format: LogFormat,
}
