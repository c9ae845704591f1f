//! Runtime server configuration.

use std::time::Duration;

use linechat_settings::ServerSettings;

/// Configuration for the relay server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (`0` auto-assigns).
    pub port: u16,
    /// Inbound silence after which a client is forced offline.
    pub idle_timeout: Duration,
    /// Longest accepted line in bytes; longer lines are discarded.
    pub max_line_length: usize,
    /// How long a closing session may spend flushing queued lines.
    pub shutdown_grace: Duration,
}

impl ServerConfig {
    /// `host:port` string handed to the listener. Bare IPv6 hosts are
    /// bracketed.
    pub fn bind_addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from(&ServerSettings::default())
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(settings: &ServerSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            idle_timeout: Duration::from_secs(settings.idle_timeout_secs),
            max_line_length: settings.max_line_length,
            shutdown_grace: Duration::from_secs(settings.shutdown_grace_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_idle_timeout_is_one_minute() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.idle_timeout, Duration::from_secs(60));
    }

    #[test]
    fn default_bind_addr() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.bind_addr(), "127.0.0.1:8888");
    }

    #[test]
    fn ipv6_host_is_bracketed() {
        let cfg = ServerConfig {
            host: "::1".into(),
            port: 9000,
            ..ServerConfig::default()
        };
        assert_eq!(cfg.bind_addr(), "[::1]:9000");
        assert!(cfg.bind_addr().parse::<std::net::SocketAddr>().is_ok());

        let cfg = ServerConfig {
            host: "[::1]".into(),
            ..cfg
        };
        assert_eq!(cfg.bind_addr(), "[::1]:9000");
    }

    #[test]
    fn from_settings() {
        let settings = ServerSettings {
            host: "0.0.0.0".into(),
            port: 0,
            idle_timeout_secs: 5,
            max_line_length: 128,
            shutdown_grace_secs: 1,
        };
        let cfg = ServerConfig::from(&settings);
        assert_eq!(cfg.bind_addr(), "0.0.0.0:0");
        assert_eq!(cfg.idle_timeout, Duration::from_secs(5));
        assert_eq!(cfg.max_line_length, 128);
        assert_eq!(cfg.shutdown_grace, Duration::from_secs(1));
    }
}
