//! Pure connection state management and configuration for the MQTT session
//!
//! This module contains the connection state machine, the rustls client
//! configuration for mutual TLS, and the rumqttc option builder.

use super::verifier::NoChainVerification;
use crate::credentials::{Identity, TrustAnchor};
use crate::error::ConnectionError;
use crate::transport::Endpoint;
use rumqttc::{MqttOptions, NetworkOptions, TlsConfiguration, Transport as RumqttcTransport};
use rustls::ClientConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Connection state for an MQTT session
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// TCP/TLS/MQTT handshake in progress
    Connecting,
    /// CONNACK received, ready to publish
    Connected,
    /// Closed, with reason
    Disconnected(String),
}

impl ConnectionState {
    /// Check if connection state allows publishing (pure function)
    pub fn can_publish(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Build the rustls client configuration for mutual TLS.
///
/// The client certificate is presented regardless of `verify_server`; only
/// validation of the broker's chain is affected by it.
pub fn build_tls_config(
    identity: &Identity,
    trust_anchor: &TrustAnchor,
    verify_server: bool,
) -> Result<Arc<ClientConfig>, ConnectionError> {
    let mut config = ClientConfig::builder()
        .with_root_certificates(trust_anchor.root_store().clone())
        .with_client_auth_cert(identity.cert_chain().to_vec(), identity.clone_key())
        .map_err(ConnectionError::TlsConfig)?;

    if verify_server {
        debug!(
            trust_anchors = trust_anchor.len(),
            "Broker certificate chain will be verified"
        );
    } else {
        warn!("Broker certificate verification is DISABLED; any server certificate will be accepted");
        config
            .dangerous()
            .set_certificate_verifier(Arc::new(NoChainVerification::new()));
    }

    Ok(Arc::new(config))
}

/// Client ids must be non-empty UTF-8 without leading whitespace or control
/// characters, and fit in an MQTT string
pub fn validate_client_id(client_id: &str) -> Result<(), ConnectionError> {
    let reason = if client_id.is_empty() {
        Some("must not be empty")
    } else if client_id.starts_with(char::is_whitespace) {
        Some("must not start with whitespace")
    } else if client_id.chars().any(char::is_control) {
        Some("must not contain control characters")
    } else if client_id.len() > u16::MAX as usize {
        Some("exceeds 65535 bytes")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(ConnectionError::InvalidClientId {
            client_id: client_id.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

/// Pure function to configure MQTT options for one TLS session
pub fn configure_mqtt_options(
    endpoint: &Endpoint,
    client_id: &str,
    tls_config: Arc<ClientConfig>,
    keep_alive: Duration,
) -> Result<MqttOptions, ConnectionError> {
    validate_client_id(client_id)?;

    let mut mqtt_options = MqttOptions::new(client_id, endpoint.host(), endpoint.port());
    mqtt_options.set_transport(RumqttcTransport::tls_with_config(
        TlsConfiguration::Rustls(tls_config),
    ));
    mqtt_options.set_keep_alive(keep_alive);
    // Single-shot sessions never resume broker-side state
    mqtt_options.set_clean_session(true);

    Ok(mqtt_options)
}

/// Network options for the event loop.
///
/// rumqttc bounds TCP connect, TLS handshake and CONNACK with its own
/// whole-second connection timeout. It is kept strictly longer than
/// `handshake_timeout` so the session's own bound is the one that fires.
pub fn configure_network_options(handshake_timeout: Duration) -> NetworkOptions {
    let whole_secs = handshake_timeout
        .as_secs()
        .saturating_add(u64::from(handshake_timeout.subsec_nanos() > 0));

    let mut network_options = NetworkOptions::new();
    network_options.set_connection_timeout(whole_secs.saturating_add(1));
    network_options
}
