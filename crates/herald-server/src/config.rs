//! Server configuration.
//!
//! Sources are layered, later ones winning:
//! - Built-in defaults
//! - TOML configuration file (`--config`, or the first default path found)
//! - Environment variables (`HERALD_PORT`, `HERALD_HEARTBEAT__INTERVAL_MS`, ...)

use anyhow::{Context, Result};
use herald_core::HubConfig;
use herald_protocol::Encoding;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Searched in order when no explicit path is given.
const CONFIG_PATHS: [&str; 3] = [
    "herald.toml",
    "/etc/herald/herald.toml",
    "~/.config/herald/herald.toml",
];

const ENV_PREFIX: &str = "HERALD";

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Built-in relay handlers.
    #[serde(default)]
    pub relay: RelayConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// WebSocket endpoint paths. All of them feed the same hub.
    #[serde(default = "default_ws_paths")]
    pub paths: Vec<String>,

    /// Outbound wire encoding (`json` or `msgpack`).
    #[serde(default)]
    pub encoding: Encoding,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Maximum inbound message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Outbound queue capacity per connection.
    #[serde(default = "default_queue_capacity")]
    pub outbound_queue_capacity: usize,

    /// Hub command queue capacity.
    #[serde(default = "default_queue_capacity")]
    pub command_queue_capacity: usize,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Ping interval in milliseconds. 0 disables pings.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,

    /// Idle timeout in milliseconds. 0 disables the timeout.
    #[serde(default = "default_heartbeat_timeout")]
    pub timeout_ms: u64,

    /// Upper bound on a single socket write, in milliseconds.
    #[serde(default = "default_write_timeout")]
    pub write_timeout_ms: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

/// Relay handler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Register the typing and chat relay handlers.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_ws_paths() -> Vec<String> {
    vec!["/notifications".to_string(), "/users".to_string()]
}

fn default_max_connections() -> usize {
    100_000
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_queue_capacity() -> usize {
    256
}

fn default_heartbeat_interval() -> u64 {
    54_000 // 54 seconds
}

fn default_heartbeat_timeout() -> u64 {
    120_000 // 2 minutes
}

fn default_write_timeout() -> u64 {
    10_000 // 10 seconds
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            metrics: MetricsConfig::default(),
            relay: RelayConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            paths: default_ws_paths(),
            encoding: Encoding::default(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_message_size: default_max_message_size(),
            outbound_queue_capacity: default_queue_capacity(),
            command_queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval(),
            timeout_ms: default_heartbeat_timeout(),
            write_timeout_ms: default_write_timeout(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Config {
    /// Load configuration from the given file, or the first default path
    /// that exists, then apply environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file cannot be read or parsed, or an
    /// environment override has the wrong type.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => Some(path.to_path_buf()),
            None => Self::find_default_file(),
        };
        Self::layered(file.as_deref(), None)
    }

    fn find_default_file() -> Option<PathBuf> {
        CONFIG_PATHS
            .iter()
            .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
            .find(|path| path.exists())
    }

    /// Build the layered configuration. `env` replaces the process
    /// environment when given.
    fn layered(file: Option<&Path>, env: Option<HashMap<String, String>>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = file {
            let name = path.to_string_lossy();
            builder =
                builder.add_source(config::File::new(&name, config::FileFormat::Toml).required(true));
        }

        let environment = config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("transport.paths")
            .try_parsing(true)
            .source(env);

        let source = match file {
            Some(path) => path.display().to_string(),
            None => "environment".to_string(),
        };

        builder
            .add_source(environment)
            .build()
            .and_then(|settings| settings.try_deserialize())
            .with_context(|| format!("Failed to load configuration from {source}"))
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if `host:port` is not a valid socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }

    /// Hub settings derived from this configuration.
    #[must_use]
    pub fn to_hub_config(&self) -> HubConfig {
        HubConfig {
            outbound_capacity: self.limits.outbound_queue_capacity,
            command_capacity: self.limits.command_queue_capacity,
            ping_interval: Duration::from_millis(self.heartbeat.interval_ms),
            idle_timeout: (self.heartbeat.timeout_ms > 0)
                .then(|| Duration::from_millis(self.heartbeat.timeout_ms)),
            write_timeout: Duration::from_millis(self.heartbeat.write_timeout_ms),
            encoding: self.transport.encoding,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(vars: &[(&str, &str)]) -> Option<HashMap<String, String>> {
        Some(
            vars.iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.transport.paths, vec!["/notifications", "/users"]);
        assert_eq!(config.transport.encoding, Encoding::Json);
        assert_eq!(config.heartbeat.interval_ms, 54_000);
        assert!(config.relay.enabled);
    }

    #[test]
    fn test_config_bind_addr() {
        let config = Config::default();
        let addr = config.bind_addr().unwrap();
        assert_eq!(addr.port(), 8080);

        let bad = Config {
            host: "not a host".into(),
            ..Config::default()
        };
        assert!(bad.bind_addr().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "127.0.0.1"
            port = 9000

            [transport]
            encoding = "msgpack"

            [limits]
            max_connections = 50000
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 9000);
        assert_eq!(config.limits.max_connections, 50000);
        assert_eq!(config.transport.encoding, Encoding::Msgpack);
        assert_eq!(config.limits.outbound_queue_capacity, 256);
    }

    #[test]
    fn test_environment_overrides() {
        let config = Config::layered(
            None,
            env(&[
                ("HERALD_PORT", "7000"),
                ("HERALD_HEARTBEAT__INTERVAL_MS", "1000"),
                ("HERALD_TRANSPORT__PATHS", "/ws,/events"),
                ("HERALD_RELAY__ENABLED", "false"),
            ]),
        )
        .unwrap();

        assert_eq!(config.port, 7000);
        assert_eq!(config.heartbeat.interval_ms, 1000);
        assert_eq!(config.transport.paths, vec!["/ws", "/events"]);
        assert!(!config.relay.enabled);
        assert_eq!(config.limits.max_connections, 100_000);
    }

    #[test]
    fn test_file_then_environment() {
        let path = std::env::temp_dir().join(format!("herald-test-{}.toml", std::process::id()));
        std::fs::write(&path, "port = 9100\n[limits]\nmax_connections = 10\n").unwrap();

        let config = Config::layered(Some(&path), env(&[("HERALD_PORT", "9200")])).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.port, 9200);
        assert_eq!(config.limits.max_connections, 10);
    }

    #[test]
    fn test_load_explicit_file() {
        let path =
            std::env::temp_dir().join(format!("herald-load-{}.toml", std::process::id()));
        std::fs::write(&path, "[limits]\nmax_connections = 42\n").unwrap();

        let config = Config::load(Some(&path));
        std::fs::remove_file(&path).ok();

        assert_eq!(config.unwrap().limits.max_connections, 42);
        assert!(Config::load(Some(Path::new("/nonexistent/herald.toml"))).is_err());
    }

    #[test]
    fn test_hub_config_mapping() {
        let mut config = Config::default();
        config.heartbeat.timeout_ms = 0;
        config.limits.outbound_queue_capacity = 32;

        let hub = config.to_hub_config();
        assert_eq!(hub.idle_timeout, None);
        assert_eq!(hub.outbound_capacity, 32);
        assert_eq!(hub.ping_interval, Duration::from_secs(54));
    }
}
