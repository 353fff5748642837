//! Transport layer for the secure publisher
//!
//! This module holds the transport-independent data model (broker endpoint,
//! message, delivery guarantee) and the MQTT-over-mutual-TLS implementation.

use crate::error::PublishError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

pub mod cancel;
pub mod mqtt;

pub use cancel::{cancellation, CancelHandle, Cancellation};

/// Broker address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Standard MQTT-over-TLS port
    pub const DEFAULT_PORT: u16 = 8883;

    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse `mqtts://host[:port]` (or `ssl://`). Plain `mqtt://` is refused
    /// because this client never opens an unencrypted connection.
    pub fn parse_url(raw: &str) -> Result<Self, String> {
        let url = Url::parse(raw).map_err(|e| format!("invalid broker URL '{raw}': {e}"))?;

        match url.scheme() {
            "mqtts" | "ssl" => {}
            other => {
                return Err(format!(
                    "unsupported scheme '{other}' in '{raw}': expected mqtts:// or ssl://"
                ))
            }
        }

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| format!("broker URL '{raw}' has no host"))?;

        Ok(Self::new(host, url.port().unwrap_or(Self::DEFAULT_PORT)))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// MQTT delivery guarantee
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum QoS {
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl TryFrom<u8> for QoS {
    type Error = String;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(format!("QoS must be 0, 1 or 2, got {other}")),
        }
    }
}

impl From<QoS> for u8 {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }
}

impl From<QoS> for rumqttc::QoS {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
            QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}

impl FromStr for QoS {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "0" | "at-most-once" | "at_most_once" => Ok(QoS::AtMostOnce),
            "1" | "at-least-once" | "at_least_once" => Ok(QoS::AtLeastOnce),
            "2" | "exactly-once" | "exactly_once" => Ok(QoS::ExactlyOnce),
            other => Err(format!("unknown QoS '{other}'")),
        }
    }
}

impl fmt::Display for QoS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QoS::AtMostOnce => "QoS 0 (at most once)",
            QoS::AtLeastOnce => "QoS 1 (at least once)",
            QoS::ExactlyOnce => "QoS 2 (exactly once)",
        };
        f.write_str(name)
    }
}

/// A single message to publish. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    topic: String,
    payload: Bytes,
    qos: QoS,
    retain: bool,
}

impl Message {
    pub fn new(
        topic: impl Into<String>,
        payload: impl Into<Bytes>,
        qos: QoS,
        retain: bool,
    ) -> Result<Self, PublishError> {
        let topic = topic.into();
        validate_topic(&topic).map_err(PublishError::InvalidMessage)?;

        Ok(Self {
            topic,
            payload: payload.into(),
            qos,
            retain,
        })
    }

    /// Build a message whose payload is the JSON encoding of `value`
    pub fn json<T: Serialize + ?Sized>(
        topic: impl Into<String>,
        value: &T,
        qos: QoS,
        retain: bool,
    ) -> Result<Self, PublishError> {
        let payload = mqtt::message_handler::MessageHandler::format_json_payload(value)
            .map_err(PublishError::Serialization)?;
        Self::new(topic, payload, qos, retain)
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn qos(&self) -> QoS {
        self.qos
    }

    pub fn retain(&self) -> bool {
        self.retain
    }
}

/// Outcome of a completed publish
#[derive(Debug, Clone, PartialEq)]
pub struct Acknowledgement {
    pub topic: String,
    pub qos: QoS,
    /// Packet identifier assigned by the client (0 for QoS 0)
    pub packet_id: u16,
    /// Time from handing the message to the client until the QoS handshake finished
    pub elapsed: Duration,
}

/// Topic names used for PUBLISH must be non-empty and wildcard-free
fn validate_topic(topic: &str) -> Result<(), String> {
    if topic.is_empty() {
        return Err("topic must not be empty".to_string());
    }
    if topic.len() > u16::MAX as usize {
        return Err(format!("topic is {} bytes, limit is 65535", topic.len()));
    }
    if topic.contains(|c| c == '+' || c == '#') {
        return Err(format!("topic '{topic}' contains a wildcard"));
    }
    if topic.contains('\0') {
        return Err("topic contains a NUL character".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_display() {
        let endpoint = Endpoint::new("broker.example.com", 8883);
        assert_eq!(endpoint.to_string(), "broker.example.com:8883");
    }

    #[test]
    fn test_parse_url_defaults_port() {
        let endpoint = Endpoint::parse_url("mqtts://broker.example.com").unwrap();
        assert_eq!(endpoint.host(), "broker.example.com");
        assert_eq!(endpoint.port(), Endpoint::DEFAULT_PORT);
    }

    #[test]
    fn test_parse_url_explicit_port_and_ssl_scheme() {
        let endpoint = Endpoint::parse_url("ssl://localhost:18883").unwrap();
        assert_eq!(endpoint, Endpoint::new("localhost", 18883));
    }

    #[test]
    fn test_parse_url_rejects_plaintext_scheme() {
        let err = Endpoint::parse_url("mqtt://localhost:1883").unwrap_err();
        assert!(err.contains("unsupported scheme"), "got: {err}");
    }

    #[test]
    fn test_parse_url_rejects_garbage() {
        assert!(Endpoint::parse_url("not a url").is_err());
    }

    #[test]
    fn test_qos_conversions() {
        assert_eq!(QoS::try_from(0).unwrap(), QoS::AtMostOnce);
        assert_eq!(QoS::try_from(2).unwrap(), QoS::ExactlyOnce);
        assert!(QoS::try_from(3).is_err());
        assert_eq!(u8::from(QoS::AtLeastOnce), 1);
        assert_eq!(rumqttc::QoS::from(QoS::AtLeastOnce), rumqttc::QoS::AtLeastOnce);
        assert_eq!("exactly-once".parse::<QoS>().unwrap(), QoS::ExactlyOnce);
        assert_eq!(" 1 ".parse::<QoS>().unwrap(), QoS::AtLeastOnce);
        assert!("fast".parse::<QoS>().is_err());
        assert_eq!(QoS::default(), QoS::AtMostOnce);
    }

    #[test]
    fn test_json_message_encodes_string_literal() {
        let message = Message::json(
            "con/topic",
            "connected sucessfully",
            QoS::AtMostOnce,
            false,
        )
        .unwrap();

        assert_eq!(message.topic(), "con/topic");
        assert_eq!(&message.payload()[..], br#""connected sucessfully""#);
        assert_eq!(message.qos(), QoS::AtMostOnce);
        assert!(!message.retain());
    }

    #[test]
    fn test_message_rejects_invalid_topics() {
        for topic in ["", "sensors/+/temp", "sensors/#", "bad\0topic"] {
            let result = Message::new(topic, Bytes::from_static(b"x"), QoS::AtMostOnce, false);
            assert!(
                matches!(result, Err(PublishError::InvalidMessage(_))),
                "topic {topic:?} should be rejected"
            );
        }
    }
}
