use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub driver: DriverConfig,
    #[serde(default)]
    pub responder: ResponderConfig,
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load from `path` when given, otherwise fall back to built-in defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => {
                Self::from_file(p).with_context(|| format!("Failed to load config from {:?}", p))
            }
            None => Ok(Self::default()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Target host name or IP address
    pub host: String,
    /// Target port
    pub port: u16,
    /// Request path of the WebSocket endpoint
    pub path: String,
    /// Number of connections to establish at startup
    pub connections: usize,
    /// Period of the send tick in milliseconds
    pub send_interval_ms: u64,
    /// Period of the latency report in milliseconds
    pub report_interval_ms: u64,
    /// Upper bound on a single connection attempt in milliseconds
    pub connect_timeout_ms: u64,
    /// Deadline for the liveness probe in milliseconds
    pub probe_timeout_ms: u64,
    /// Deadline for the payload send in milliseconds
    pub send_timeout_ms: u64,
    /// Per-connection grace period for the close handshake in milliseconds
    pub close_grace_ms: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 9000,
            path: "/".to_string(),
            connections: 1,
            send_interval_ms: 1_000,
            report_interval_ms: 10_000,
            connect_timeout_ms: 5_000,
            probe_timeout_ms: 5_000,
            send_timeout_ms: 5_000,
            close_grace_ms: 1_000,
        }
    }
}

impl DriverConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.host.trim().is_empty() {
            anyhow::bail!("driver.host must not be empty");
        }
        if self.connections == 0 {
            anyhow::bail!("driver.connections must be at least 1");
        }
        for (name, value) in [
            ("send_interval_ms", self.send_interval_ms),
            ("report_interval_ms", self.report_interval_ms),
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("probe_timeout_ms", self.probe_timeout_ms),
            ("send_timeout_ms", self.send_timeout_ms),
            ("close_grace_ms", self.close_grace_ms),
        ] {
            if value == 0 {
                anyhow::bail!("driver.{name} must be greater than zero");
            }
        }
        Ok(())
    }

    /// Build the endpoint URL, e.g. `ws://localhost:9000/`.
    pub fn endpoint(&self) -> anyhow::Result<Url> {
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };
        let raw = format!("ws://{}:{}{}", self.host, self.port, path);
        let url = Url::parse(&raw).with_context(|| format!("Invalid endpoint: {raw}"))?;
        if url.host_str().is_none() {
            anyhow::bail!("Endpoint must include a host (got {raw})");
        }
        Ok(url)
    }

    pub fn send_interval(&self) -> Duration {
        Duration::from_millis(self.send_interval_ms)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponderConfig {
    /// Address to accept WebSocket connections on
    pub listen: String,
    /// Period of the counter report in milliseconds
    pub report_interval_ms: u64,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:9000".to_string(),
            report_interval_ms: 1_000,
        }
    }
}

impl ResponderConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.listen.trim().is_empty() {
            anyhow::bail!("responder.listen must not be empty");
        }
        if self.report_interval_ms == 0 {
            anyhow::bail!("responder.report_interval_ms must be greater than zero");
        }
        Ok(())
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_serde() {
        let config_str = r#"
[driver]
host = "172.17.0.1"
connections = 250
send_interval_ms = 500

[responder]
listen = "127.0.0.1:9100"
        "#;

        let config: Config = toml::from_str(config_str).unwrap();
        assert_eq!(config.driver.host, "172.17.0.1");
        assert_eq!(config.driver.connections, 250);
        assert_eq!(config.driver.send_interval_ms, 500);
        // Unset fields keep their defaults
        assert_eq!(config.driver.port, 9000);
        assert_eq!(config.driver.report_interval_ms, 10_000);
        assert_eq!(config.responder.listen, "127.0.0.1:9100");
        assert_eq!(config.responder.report_interval_ms, 1_000);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.driver.connections, 1);
        assert_eq!(config.driver.close_grace(), Duration::from_secs(1));
        assert_eq!(config.responder.listen, "0.0.0.0:9000");
    }

    #[test]
    fn test_endpoint() {
        let driver = DriverConfig::default();
        assert_eq!(driver.endpoint().unwrap().as_str(), "ws://localhost:9000/");

        let driver = DriverConfig {
            host: "10.0.0.7".to_string(),
            port: 8080,
            path: "echo".to_string(),
            ..DriverConfig::default()
        };
        assert_eq!(driver.endpoint().unwrap().as_str(), "ws://10.0.0.7:8080/echo");
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let driver = DriverConfig {
            connections: 0,
            ..DriverConfig::default()
        };
        assert!(driver.validate().is_err());

        let driver = DriverConfig {
            send_interval_ms: 0,
            ..DriverConfig::default()
        };
        assert!(driver.validate().is_err());

        let driver = DriverConfig {
            close_grace_ms: 0,
            ..DriverConfig::default()
        };
        assert!(driver.validate().is_err());

        let responder = ResponderConfig {
            report_interval_ms: 0,
            ..ResponderConfig::default()
        };
        assert!(responder.validate().is_err());

        assert!(DriverConfig::default().validate().is_ok());
        assert!(ResponderConfig::default().validate().is_ok());
    }

    #[test]
    fn test_load() {
        assert_eq!(Config::load(None).unwrap().driver.host, "localhost");

        let path = std::env::temp_dir().join(format!("load-core-config-{}.toml", std::process::id()));
        std::fs::write(&path, "[driver]\nconnections = 7\n").unwrap();
        let config = Config::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(config.driver.connections, 7);

        assert!(Config::load(Some(Path::new("/nonexistent/load.toml"))).is_err());
    }
}
