//! Configuration types

use crate::server::conn::ConnSettings;
use crate::server::fsm::AutomatonSettings;
use crate::telemetry::LogConfig;
use serde::Deserialize;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

/// User-defined configuration (config.toml)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub lcp: LcpConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// TCP listen address for the control channel
    pub listen: SocketAddr,
    /// Local address bound into call channels
    pub local_addr: Ipv4Addr,
    /// Hostname announced in the start reply
    pub hostname: String,
    /// Vendor string announced in the start reply
    pub vendor: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:1723".parse().unwrap(),
            local_addr: Ipv4Addr::UNSPECIFIED,
            hostname: "pptpd".to_string(),
            vendor: "pptpd".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Seconds without control traffic before logging a liveness warning
    pub idle_secs: u64,
    /// Milliseconds to linger after the stop exchange
    pub finish_holddown_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            idle_secs: 10,
            finish_holddown_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LcpConfig {
    /// Restart timer period in milliseconds
    pub restart_period_ms: u64,
    /// Terminate-Request transmission ceiling
    pub max_terminate: u32,
    /// Configure-Request transmission ceiling
    pub max_configure: u32,
    /// Unacceptable-configuration ceiling
    pub max_failure: u32,
    /// Cycle the link down and up when the peer reopens an established link
    pub restart_on_reopen: bool,
}

impl Default for LcpConfig {
    fn default() -> Self {
        let defaults = AutomatonSettings::default();
        Self {
            restart_period_ms: defaults.restart_period.as_millis() as u64,
            max_terminate: defaults.max_terminate,
            max_configure: defaults.max_configure,
            max_failure: defaults.max_failure,
            restart_on_reopen: defaults.restart_on_reopen,
        }
    }
}

impl LcpConfig {
    pub fn automaton_settings(&self) -> AutomatonSettings {
        AutomatonSettings {
            restart_period: Duration::from_millis(self.restart_period_ms),
            max_terminate: self.max_terminate,
            max_configure: self.max_configure,
            max_failure: self.max_failure,
            restart_on_reopen: self.restart_on_reopen,
        }
    }
}

impl Config {
    /// Per-connection settings derived from this config.
    pub fn conn_settings(&self) -> ConnSettings {
        ConnSettings {
            hostname: self.server.hostname.clone(),
            vendor: self.server.vendor.clone(),
            idle_timeout: Duration::from_secs(self.timeouts.idle_secs),
            finish_holddown: Duration::from_millis(self.timeouts.finish_holddown_ms),
            lcp: self.lcp.automaton_settings(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.listen.port(), 1723);
        assert_eq!(config.lcp.max_configure, 10);
        assert_eq!(config.timeouts.idle_secs, 10);
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [server]
            hostname = "vpn-gw"

            [lcp]
            max_terminate = 4
            "#,
        )
        .unwrap();

        assert_eq!(config.server.hostname, "vpn-gw");
        assert_eq!(config.server.vendor, "pptpd");
        assert_eq!(config.lcp.max_terminate, 4);
        assert_eq!(config.lcp.max_configure, 10);
    }

    #[test]
    fn test_conn_settings_mapping() {
        let mut config = Config::default();
        config.timeouts.finish_holddown_ms = 250;
        config.lcp.restart_period_ms = 500;

        let settings = config.conn_settings();
        assert_eq!(settings.finish_holddown, Duration::from_millis(250));
        assert_eq!(settings.lcp.restart_period, Duration::from_millis(500));
    }
}
