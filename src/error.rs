//! Error types for the secure publisher
//!
//! One enum per failure class. Credential errors need an operator to fix the
//! files; connection and publish errors are retryable by a caller, never by
//! this crate. `PublisherError` ties each failure to the stage it happened in.

use crate::config::ConfigError;
use crate::transport::mqtt::ConnectionState;
use crate::transport::QoS;
use std::error::Error as StdError;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Which credential file an error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    Certificate,
    PrivateKey,
    CaBundle,
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CredentialKind::Certificate => "certificate",
            CredentialKind::PrivateKey => "private key",
            CredentialKind::CaBundle => "CA bundle",
        })
    }
}

/// Bad, missing or mismatched certificate/key material
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("failed to read {kind} from {}", .path.display())]
    Unreadable {
        kind: CredentialKind,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no {kind} found in {}", .path.display())]
    Missing { kind: CredentialKind, path: PathBuf },
    #[error("malformed {kind} in {}: {reason}", .path.display())]
    Malformed {
        kind: CredentialKind,
        path: PathBuf,
        reason: String,
    },
    #[error(
        "private key {} does not match certificate {}",
        .key_path.display(),
        .cert_path.display()
    )]
    KeyMismatch { cert_path: PathBuf, key_path: PathBuf },
}

/// Transport, TLS handshake or broker-level connection failure
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("invalid client id '{client_id}': {reason}")]
    InvalidClientId { client_id: String, reason: String },
    #[error("failed to build TLS client configuration")]
    TlsConfig(#[source] rustls::Error),
    #[error("broker certificate is not trusted")]
    UntrustedServer(#[source] rustls::Error),
    #[error("TLS handshake failed")]
    Handshake(#[source] rustls::Error),
    #[error("broker refused the connection: {code}")]
    Rejected { code: String },
    #[error("transport failure")]
    Transport(#[source] rumqttc::ConnectionError),
    #[error("connection handshake did not complete within {0:?}")]
    HandshakeTimeout(Duration),
    #[error("event loop stopped before the broker acknowledged the connection")]
    Closed,
    #[error("connection attempt cancelled")]
    Cancelled,
}

impl ConnectionError {
    /// Classify an error surfaced by the rumqttc event loop.
    ///
    /// TLS failures arrive wrapped in `io::Error`s, so the source chain is
    /// searched for the underlying `rustls::Error`.
    pub fn from_event_loop(error: rumqttc::ConnectionError) -> Self {
        if let rumqttc::ConnectionError::ConnectionRefused(code) = error {
            return ConnectionError::Rejected {
                code: format!("{code:?}"),
            };
        }

        let tls_error = find_rustls_error(&error).cloned();
        match tls_error {
            Some(tls @ rustls::Error::InvalidCertificate(_)) => ConnectionError::UntrustedServer(tls),
            Some(tls) => ConnectionError::Handshake(tls),
            None => ConnectionError::Transport(error),
        }
    }

    /// Classify an event loop error raised before CONNACK arrived.
    ///
    /// rumqttc's own connection timeout counts as the handshake bound.
    pub fn from_handshake(error: rumqttc::ConnectionError, handshake_timeout: Duration) -> Self {
        match error {
            rumqttc::ConnectionError::NetworkTimeout => {
                ConnectionError::HandshakeTimeout(handshake_timeout)
            }
            other => Self::from_event_loop(other),
        }
    }
}

/// Failure writing a message or completing its acknowledgement handshake
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("invalid message: {0}")]
    InvalidMessage(String),
    #[error("failed to encode payload")]
    Serialization(#[source] serde_json::Error),
    #[error("not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },
    #[error("client rejected the publish request")]
    Request(#[source] rumqttc::ClientError),
    #[error("no acknowledgement for {qos} within {timeout:?}")]
    AckTimeout { qos: QoS, timeout: Duration },
    #[error("connection lost before delivery completed: {0}")]
    ConnectionLost(String),
    #[error("publish cancelled")]
    Cancelled,
}

/// Stage of the single-shot run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Configuration,
    LoadIdentity,
    LoadTrustAnchor,
    Connect,
    Publish,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Configuration => "configuration",
            Stage::LoadIdentity => "load-identity",
            Stage::LoadTrustAnchor => "load-trust-anchor",
            Stage::Connect => "connect",
            Stage::Publish => "publish",
        })
    }
}

/// Top-level error of a publisher run
#[derive(Debug, Error)]
pub enum PublisherError {
    #[error("configuration failed")]
    Config(#[from] ConfigError),
    #[error("{stage} failed")]
    Credential {
        stage: Stage,
        #[source]
        source: CredentialError,
    },
    #[error("connect failed")]
    Connection(#[from] ConnectionError),
    #[error("publish failed")]
    Publish(#[from] PublishError),
}

impl PublisherError {
    pub fn credential(stage: Stage, source: CredentialError) -> Self {
        Self::Credential { stage, source }
    }

    pub fn stage(&self) -> Stage {
        match self {
            PublisherError::Config(_) => Stage::Configuration,
            PublisherError::Credential { stage, .. } => *stage,
            PublisherError::Connection(_) => Stage::Connect,
            PublisherError::Publish(_) => Stage::Publish,
        }
    }

    /// Whether a long-lived caller could reasonably try again
    pub fn is_retryable(&self) -> bool {
        match self {
            PublisherError::Config(_) | PublisherError::Credential { .. } => false,
            PublisherError::Connection(e) => !matches!(
                e,
                ConnectionError::InvalidClientId { .. }
                    | ConnectionError::TlsConfig(_)
                    | ConnectionError::Cancelled
            ),
            PublisherError::Publish(e) => !matches!(
                e,
                PublishError::InvalidMessage(_)
                    | PublishError::Serialization(_)
                    | PublishError::Cancelled
            ),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            PublisherError::Connection(ConnectionError::Cancelled)
                | PublisherError::Publish(PublishError::Cancelled)
        )
    }

    /// Process exit code for this failure
    pub fn exit_code(&self) -> i32 {
        if self.is_cancelled() {
            return 130;
        }
        match self {
            PublisherError::Config(_) => 2,
            PublisherError::Credential { .. } => 3,
            PublisherError::Connection(_) => 4,
            PublisherError::Publish(_) => 5,
        }
    }

    /// One-line diagnostic: the stage followed by the full cause chain
    pub fn diagnostic(&self) -> String {
        let mut line = self.to_string();
        let mut source = self.source();
        while let Some(cause) = source {
            line.push_str(": ");
            line.push_str(&cause.to_string());
            source = cause.source();
        }
        line
    }
}

/// Result type for publisher runs
pub type PublisherResult<T> = Result<T, PublisherError>;

/// Walk a source chain looking for a rustls error, looking inside `io::Error`
/// payloads where tokio-rustls puts them
fn find_rustls_error<'a>(error: &'a (dyn StdError + 'static)) -> Option<&'a rustls::Error> {
    let mut current = Some(error);
    while let Some(err) = current {
        if let Some(tls) = err.downcast_ref::<rustls::Error>() {
            return Some(tls);
        }
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            if let Some(tls) = io.get_ref().and_then(|inner| inner.downcast_ref::<rustls::Error>()) {
                return Some(tls);
            }
        }
        current = err.source();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustls::CertificateError;
    use std::io;

    fn io_wrapped(tls: rustls::Error) -> rumqttc::ConnectionError {
        rumqttc::ConnectionError::Io(io::Error::new(io::ErrorKind::InvalidData, tls))
    }

    #[test]
    fn test_unknown_issuer_is_untrusted_server() {
        let error = ConnectionError::from_event_loop(io_wrapped(rustls::Error::InvalidCertificate(
            CertificateError::UnknownIssuer,
        )));
        assert!(matches!(error, ConnectionError::UntrustedServer(_)));
    }

    #[test]
    fn test_other_tls_error_is_handshake_failure() {
        let error = ConnectionError::from_event_loop(io_wrapped(
            rustls::Error::NoCertificatesPresented,
        ));
        assert!(matches!(error, ConnectionError::Handshake(_)));
    }

    #[test]
    fn test_refused_connack_is_rejection() {
        let error = ConnectionError::from_event_loop(rumqttc::ConnectionError::ConnectionRefused(
            rumqttc::ConnectReturnCode::NotAuthorized,
        ));
        match error {
            ConnectionError::Rejected { code } => assert!(code.contains("NotAuthorized")),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_network_timeout_before_connack_is_handshake_timeout() {
        let bound = Duration::from_secs(8);
        match ConnectionError::from_handshake(rumqttc::ConnectionError::NetworkTimeout, bound) {
            ConnectionError::HandshakeTimeout(timeout) => assert_eq!(timeout, bound),
            other => panic!("expected handshake timeout, got {other:?}"),
        }

        let refused = ConnectionError::from_handshake(
            rumqttc::ConnectionError::ConnectionRefused(
                rumqttc::ConnectReturnCode::BadUserNamePassword,
            ),
            bound,
        );
        assert!(matches!(refused, ConnectionError::Rejected { .. }));
    }

    #[test]
    fn test_plain_io_error_is_transport_failure() {
        let error = ConnectionError::from_event_loop(rumqttc::ConnectionError::Io(
            io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
        ));
        assert!(matches!(error, ConnectionError::Transport(_)));
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(Stage::LoadIdentity.to_string(), "load-identity");
        assert_eq!(Stage::LoadTrustAnchor.to_string(), "load-trust-anchor");
        assert_eq!(Stage::Connect.to_string(), "connect");
        assert_eq!(Stage::Publish.to_string(), "publish");
    }

    #[test]
    fn test_credential_error_reports_stage_and_cause() {
        let error = PublisherError::credential(
            Stage::LoadTrustAnchor,
            CredentialError::Missing {
                kind: CredentialKind::CaBundle,
                path: PathBuf::from("/certs/ca.pem"),
            },
        );

        assert_eq!(error.stage(), Stage::LoadTrustAnchor);
        assert_eq!(error.exit_code(), 3);
        assert!(!error.is_retryable());
        assert_eq!(
            error.diagnostic(),
            "load-trust-anchor failed: no CA bundle found in /certs/ca.pem"
        );
    }

    #[test]
    fn test_diagnostic_includes_nested_sources() {
        let error = PublisherError::from(ConnectionError::UntrustedServer(
            rustls::Error::InvalidCertificate(CertificateError::UnknownIssuer),
        ));

        let diagnostic = error.diagnostic();
        assert!(diagnostic.starts_with("connect failed: broker certificate is not trusted"));
        assert!(diagnostic.contains("UnknownIssuer"), "got: {diagnostic}");
    }

    #[test]
    fn test_exit_codes_and_retryability() {
        let timeout = PublisherError::from(PublishError::AckTimeout {
            qos: QoS::AtLeastOnce,
            timeout: Duration::from_secs(1),
        });
        assert_eq!(timeout.exit_code(), 5);
        assert!(timeout.is_retryable());

        let refused = PublisherError::from(ConnectionError::Rejected {
            code: "NotAuthorized".to_string(),
        });
        assert_eq!(refused.exit_code(), 4);
        assert!(refused.is_retryable());

        let cancelled = PublisherError::from(PublishError::Cancelled);
        assert_eq!(cancelled.exit_code(), 130);
        assert!(!cancelled.is_retryable());
        assert!(cancelled.is_cancelled());

        let config = PublisherError::from(ConfigError::InvalidConfig("no host".to_string()));
        assert_eq!(config.stage(), Stage::Configuration);
        assert_eq!(config.exit_code(), 2);
    }
}
