//! Configuration loading and validation tests
//!
//! Tests focus on BEHAVIOR of configuration loading, validation, and error handling.
//! We test observable outcomes, not implementation details of TOML parsing.

use secure_publisher::config::{ConfigError, ConfigOverrides, PublisherConfig};
use secure_publisher::transport::{Endpoint, QoS};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "{content}").unwrap();
    temp_file
}

#[test]
fn test_config_loads_successfully_from_valid_toml() {
    let temp_file = write_config(
        r#"
[broker]
host = "a1b2c3-ats.iot.us-east-1.amazonaws.com"
port = 8883
client_id = "device-7"

[tls]
cert_path = "/etc/publisher/client.crt"
key_path = "/etc/publisher/client.key"
ca_path = "/etc/publisher/ca.pem"

[message]
topic = "devices/7/status"
payload = "online"
qos = 1
retain = true

[timeouts]
handshake_ms = 5000
ack_ms = 3000
grace_period_ms = 500
"#,
    );

    let config = PublisherConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(
        config.endpoint().unwrap(),
        Endpoint::new("a1b2c3-ats.iot.us-east-1.amazonaws.com", 8883)
    );
    assert_eq!(config.broker.client_id, "device-7");
    assert_eq!(config.tls.cert_path, PathBuf::from("/etc/publisher/client.crt"));
    assert_eq!(config.message.topic, "devices/7/status");
    assert_eq!(config.message.qos, QoS::AtLeastOnce);
    assert!(config.message.retain);
    assert_eq!(config.timeouts.handshake(), Duration::from_secs(5));
    assert_eq!(config.timeouts.ack(), Duration::from_secs(3));
    assert_eq!(config.timeouts.grace_period(), Duration::from_millis(500));
}

#[test]
fn test_empty_file_yields_defaults() {
    let temp_file = write_config("");
    let config = PublisherConfig::load_from_file(temp_file.path()).unwrap();
    assert_eq!(config, PublisherConfig::default());
}

#[test]
fn test_broker_url_supplies_endpoint() {
    let temp_file = write_config(
        r#"
[broker]
url = "mqtts://broker.example.com:18883"
"#,
    );

    let config = PublisherConfig::load_from_file(temp_file.path()).unwrap();
    assert_eq!(
        config.endpoint().unwrap(),
        Endpoint::new("broker.example.com", 18883)
    );
    assert!(config.validate().is_ok());
}

#[test]
fn test_plaintext_broker_url_is_rejected() {
    let temp_file = write_config(
        r#"
[broker]
url = "mqtt://broker.example.com:1883"
"#,
    );

    let result = PublisherConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::InvalidEndpoint(_))));
}

#[test]
fn test_missing_file_is_read_error() {
    let result = PublisherConfig::load_from_file(&PathBuf::from("/nonexistent/publisher.toml"));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_malformed_toml_is_parse_error() {
    let temp_file = write_config("[broker\nhost = ");
    let result = PublisherConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_wrong_type_is_parse_error() {
    let temp_file = write_config("[broker]\nport = \"eighty\"\n");
    let result = PublisherConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_wildcard_topic_in_file_is_invalid() {
    let temp_file = write_config("[message]\ntopic = \"con/+\"\n");
    let result = PublisherConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
}

#[test]
fn test_explicit_path_wins_over_search() {
    let temp_file = write_config("[broker]\nhost = \"explicit.example.com\"\n");
    let config = PublisherConfig::load(Some(temp_file.path())).unwrap();
    assert_eq!(config.broker.host.as_deref(), Some("explicit.example.com"));
}

#[test]
fn test_cli_overrides_take_precedence_over_file() {
    let temp_file = write_config(
        r#"
[broker]
host = "file.example.com"
client_id = "from-file"

[message]
topic = "file/topic"
"#,
    );
    let mut config = PublisherConfig::load_from_file(temp_file.path()).unwrap();

    let overrides = ConfigOverrides {
        host: Some("cli.example.com".to_string()),
        client_id: Some("from-cli".to_string()),
        cert: Some(PathBuf::from("/tmp/cli.crt")),
        payload: Some("hello".to_string()),
        ..Default::default()
    };
    overrides.apply(&mut config);

    assert_eq!(config.broker.host.as_deref(), Some("cli.example.com"));
    assert_eq!(config.broker.client_id, "from-cli");
    assert_eq!(config.message.topic, "file/topic");
    assert_eq!(config.message.payload, "hello");
    assert_eq!(config.tls.cert_path, PathBuf::from("/tmp/cli.crt"));
    assert!(config.tls.verify_server);
}

#[test]
fn test_show_output_reloads_to_same_config() {
    let mut config = PublisherConfig::default();
    config.broker.host = Some("localhost".to_string());
    config.message.qos = QoS::ExactlyOnce;

    let rendered = config.to_toml().unwrap();
    let temp_file = write_config(&rendered);
    let reloaded = PublisherConfig::load_from_file(temp_file.path()).unwrap();
    assert_eq!(reloaded, config);
}

#[test]
fn test_oversized_keep_alive_in_file_is_invalid() {
    let temp_file = write_config("[broker]\nkeep_alive_secs = 70000\n");
    let result = PublisherConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
}
