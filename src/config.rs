//! Configuration system for the secure publisher
//!
//! A TOML file supplies the base values and CLI flags override them. Every
//! field has a default except the broker host, so an empty file plus
//! `--host` is a complete configuration.

use crate::transport::{Endpoint, Message, QoS};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Files probed, in order, when no `--config` is given
pub const DEFAULT_CONFIG_PATHS: &[&str] = &["publisher.toml", "config/publisher.toml"];

/// Prefix for generated client identifiers
const GENERATED_CLIENT_ID_PREFIX: &str = "secure-publisher";

/// Main publisher configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PublisherConfig {
    #[serde(default)]
    pub broker: BrokerSection,
    #[serde(default)]
    pub tls: TlsSection,
    #[serde(default)]
    pub message: MessageSection,
    #[serde(default)]
    pub timeouts: TimeoutSection,
}

/// Broker section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BrokerSection {
    /// Broker URL (`mqtts://host[:port]`), used when `host` is unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Broker host name or address
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    pub port: u16,
    /// MQTT client identifier; empty means generate one
    pub client_id: String,
    pub keep_alive_secs: u64,
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            url: None,
            host: None,
            port: Endpoint::DEFAULT_PORT,
            client_id: "test-con".to_string(),
            keep_alive_secs: 30,
        }
    }
}

/// TLS section: credential paths and broker verification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TlsSection {
    /// Client certificate (PEM or DER)
    pub cert_path: PathBuf,
    /// Private key for the client certificate
    pub key_path: PathBuf,
    /// CA bundle the broker certificate must chain to
    pub ca_path: PathBuf,
    /// Validate the broker's certificate chain and host name
    pub verify_server: bool,
}

impl Default for TlsSection {
    fn default() -> Self {
        Self {
            cert_path: PathBuf::from("./certs/clientCert.crt"),
            key_path: PathBuf::from("./certs/clientKey.key"),
            ca_path: PathBuf::from("./certs/serverCert.pem"),
            verify_server: true,
        }
    }
}

/// Message section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MessageSection {
    pub topic: String,
    /// Published as a JSON string literal
    pub payload: String,
    pub qos: QoS,
    pub retain: bool,
}

impl Default for MessageSection {
    fn default() -> Self {
        Self {
            topic: "con/topic".to_string(),
            payload: "connected sucessfully".to_string(),
            qos: QoS::AtMostOnce,
            retain: false,
        }
    }
}

/// Timeout section, all in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimeoutSection {
    /// TCP connect + TLS handshake + CONNACK
    pub handshake_ms: u64,
    /// QoS 1/2 acknowledgement wait
    pub ack_ms: u64,
    /// Time allowed for DISCONNECT to be written before closing
    pub grace_period_ms: u64,
}

impl Default for TimeoutSection {
    fn default() -> Self {
        Self {
            handshake_ms: 10_000,
            ack_ms: 10_000,
            grace_period_ms: 250,
        }
    }
}

impl TimeoutSection {
    pub fn handshake(&self) -> Duration {
        Duration::from_millis(self.handshake_ms)
    }

    pub fn ack(&self) -> Duration {
        Duration::from_millis(self.ack_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Failed to render TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("Invalid broker endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Command-line overrides, applied on top of the file
#[derive(Debug, Clone, Default, clap::Args)]
pub struct ConfigOverrides {
    /// Broker host name or address
    #[arg(long, env = "PUBLISHER_HOST")]
    pub host: Option<String>,

    /// Broker port
    #[arg(long, env = "PUBLISHER_PORT")]
    pub port: Option<u16>,

    /// Broker URL (mqtts://host[:port]), used when no host is given
    #[arg(long, env = "PUBLISHER_URL")]
    pub url: Option<String>,

    /// Topic to publish on
    #[arg(long, env = "PUBLISHER_TOPIC")]
    pub topic: Option<String>,

    /// MQTT client identifier (empty to generate one)
    #[arg(long, env = "PUBLISHER_CLIENT_ID")]
    pub client_id: Option<String>,

    /// Client certificate path
    #[arg(long, env = "PUBLISHER_CERT")]
    pub cert: Option<PathBuf>,

    /// Client private key path
    #[arg(long, env = "PUBLISHER_KEY")]
    pub key: Option<PathBuf>,

    /// CA bundle path
    #[arg(long, env = "PUBLISHER_CA")]
    pub ca: Option<PathBuf>,

    /// Accept any broker certificate (the client certificate is still sent)
    #[arg(long, env = "PUBLISHER_INSECURE_SKIP_VERIFY")]
    pub insecure_skip_verify: bool,

    /// Payload string, published JSON-encoded
    #[arg(long, env = "PUBLISHER_PAYLOAD")]
    pub payload: Option<String>,

    /// Delivery guarantee: 0, 1 or 2
    #[arg(long, env = "PUBLISHER_QOS")]
    pub qos: Option<QoS>,

    /// Ask the broker to retain the message
    #[arg(long, env = "PUBLISHER_RETAIN")]
    pub retain: bool,
}

impl ConfigOverrides {
    /// Overwrite every field that was given on the command line
    pub fn apply(&self, config: &mut PublisherConfig) {
        if let Some(host) = &self.host {
            config.broker.host = Some(host.clone());
        }
        if let Some(port) = self.port {
            config.broker.port = port;
        }
        if let Some(url) = &self.url {
            config.broker.url = Some(url.clone());
        }
        if let Some(topic) = &self.topic {
            config.message.topic = topic.clone();
        }
        if let Some(client_id) = &self.client_id {
            config.broker.client_id = client_id.clone();
        }
        if let Some(cert) = &self.cert {
            config.tls.cert_path = cert.clone();
        }
        if let Some(key) = &self.key {
            config.tls.key_path = key.clone();
        }
        if let Some(ca) = &self.ca {
            config.tls.ca_path = ca.clone();
        }
        if self.insecure_skip_verify {
            config.tls.verify_server = false;
        }
        if let Some(payload) = &self.payload {
            config.message.payload = payload.clone();
        }
        if let Some(qos) = self.qos {
            config.message.qos = qos;
        }
        if self.retain {
            config.message.retain = true;
        }
    }
}

impl PublisherConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: PublisherConfig = toml::from_str(&content)?;

        // Host may still come from the command line, so only values present
        // in the file are checked here
        config.check_values()?;

        debug!(path = %path.display(), "Loaded configuration file");
        Ok(config)
    }

    /// Load `path` if given, else the first default path that exists, else
    /// built-in defaults
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::load_from_file(path);
        }

        match DEFAULT_CONFIG_PATHS
            .iter()
            .map(Path::new)
            .find(|candidate| candidate.is_file())
        {
            Some(found) => {
                info!(path = %found.display(), "Using configuration file");
                Self::load_from_file(found)
            }
            None => {
                debug!("No configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Full validation, run after overrides are applied
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.check_values()?;
        self.endpoint()?;
        Ok(())
    }

    fn check_values(&self) -> Result<(), ConfigError> {
        if self.broker.port == 0 {
            return Err(ConfigError::InvalidConfig(
                "broker port must be non-zero".to_string(),
            ));
        }
        if let Some(url) = &self.broker.url {
            Endpoint::parse_url(url).map_err(ConfigError::InvalidEndpoint)?;
        }
        if self.broker.keep_alive_secs > u64::from(u16::MAX) {
            return Err(ConfigError::InvalidConfig(format!(
                "broker.keep_alive_secs is {}, MQTT allows at most {}",
                self.broker.keep_alive_secs,
                u16::MAX
            )));
        }

        for (name, path) in [
            ("tls.cert_path", &self.tls.cert_path),
            ("tls.key_path", &self.tls.key_path),
            ("tls.ca_path", &self.tls.ca_path),
        ] {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::InvalidConfig(format!("{name} must not be empty")));
            }
        }

        if self.timeouts.handshake_ms == 0 || self.timeouts.ack_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "handshake and ack timeouts must be non-zero".to_string(),
            ));
        }

        self.message()
            .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;
        Ok(())
    }

    /// Broker endpoint: `host` + `port` when a host is set, otherwise `url`
    pub fn endpoint(&self) -> Result<Endpoint, ConfigError> {
        match (&self.broker.host, &self.broker.url) {
            (Some(host), _) if !host.trim().is_empty() => {
                Ok(Endpoint::new(host.trim(), self.broker.port))
            }
            (_, Some(url)) => Endpoint::parse_url(url).map_err(ConfigError::InvalidEndpoint),
            _ => Err(ConfigError::InvalidEndpoint(
                "broker host is required (set broker.host, broker.url or --host)".to_string(),
            )),
        }
    }

    /// The message described by the `[message]` section
    pub fn message(&self) -> Result<Message, crate::error::PublishError> {
        Message::json(
            self.message.topic.as_str(),
            self.message.payload.as_str(),
            self.message.qos,
            self.message.retain,
        )
    }

    /// Replace an empty client id with a generated one and return it
    pub fn ensure_client_id(&mut self) -> &str {
        if self.broker.client_id.trim().is_empty() {
            self.broker.client_id = format!("{GENERATED_CLIENT_ID_PREFIX}-{}", uuid::Uuid::new_v4());
            info!(client_id = %self.broker.client_id, "Generated MQTT client id");
        }
        &self.broker.client_id
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.broker.keep_alive_secs)
    }

    /// Effective configuration rendered as TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[broker]
host = "localhost"
port = 8883
client_id = "test-con"

[tls]
cert_path = "tests/fixtures/client.pem"
key_path = "tests/fixtures/client.key"
ca_path = "tests/fixtures/ca.pem"
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}
