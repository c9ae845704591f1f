//! # linechat
//!
//! Relay server binary: loads settings, installs logging, serves until
//! ctrl-c.

#![deny(unsafe_code)]

mod logging;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use linechat_server::{ChatServer, ServerConfig};
use linechat_settings::{LinechatSettings, LogFormat, LogLevel};

/// Line-oriented TCP chat relay.
#[derive(Parser, Debug)]
#[command(name = "linechat", version, about = "Line-oriented TCP chat relay")]
struct Cli {
    /// Settings file (default `~/.linechat/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Seconds of inbound silence before a client is forced offline.
    #[arg(long)]
    idle_timeout_secs: Option<u64>,

    /// Longest accepted line in bytes.
    #[arg(long)]
    max_line_length: Option<usize>,

    /// Log level (`RUST_LOG` still wins when set).
    #[arg(long, value_enum)]
    log_level: Option<CliLogLevel>,

    /// Log output format.
    #[arg(long, value_enum)]
    log_format: Option<CliLogFormat>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CliLogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<CliLogLevel> for LogLevel {
    fn from(level: CliLogLevel) -> Self {
        match level {
            CliLogLevel::Trace => Self::Trace,
            CliLogLevel::Debug => Self::Debug,
            CliLogLevel::Info => Self::Info,
            CliLogLevel::Warn => Self::Warn,
            CliLogLevel::Error => Self::Error,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CliLogFormat {
    Pretty,
    Json,
}

impl From<CliLogFormat> for LogFormat {
    fn from(format: CliLogFormat) -> Self {
        match format {
            CliLogFormat::Pretty => Self::Pretty,
            CliLogFormat::Json => Self::Json,
        }
    }
}

impl Cli {
    /// Flags take precedence over file and environment layers.
    fn apply(&self, settings: &mut LinechatSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(secs) = self.idle_timeout_secs {
            settings.server.idle_timeout_secs = secs;
        }
        if let Some(max) = self.max_line_length {
            settings.server.max_line_length = max;
        }
        if let Some(level) = self.log_level {
            settings.logging.level = level.into();
        }
        if let Some(format) = self.log_format {
            settings.logging.format = format.into();
        }
    }

    fn settings(&self) -> Result<LinechatSettings> {
        let mut settings = match &self.config {
            Some(path) => linechat_settings::load_settings_from_path(path)
                .with_context(|| format!("Failed to load settings from {}", path.display()))?,
            None => linechat_settings::load_settings().with_context(|| {
                format!(
                    "Failed to load settings from {}",
                    linechat_settings::settings_path().display()
                )
            })?,
        };
        self.apply(&mut settings);
        linechat_settings::validate(&settings).context("Invalid command-line settings")?;
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let settings = args.settings()?;
    logging::init(&settings.logging);

    let config = ServerConfig::from(&settings.server);
    let server = ChatServer::new(config)
        .start()
        .await
        .context("Failed to start chat server")?;
    tracing::info!(addr = %server.local_addr(), "linechat ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    server.shutdown().await;
    Ok(())
}
