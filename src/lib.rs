//! Secure Publisher
//!
//! A single-shot MQTT publisher over mutually authenticated TLS: load a client
//! certificate and key, load the CA bundle the broker must chain to, connect,
//! publish one message, disconnect.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use secure_publisher::{PublisherConfig, SecurePublisher};
//!
//! # tokio_test::block_on(async {
//! let mut config = PublisherConfig::default();
//! config.broker.host = Some("broker.example.com".to_string());
//!
//! let publisher = SecurePublisher::new(config)?;
//! let ack = publisher.run_configured().await?;
//! println!("published on {}", ack.topic);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod config;
pub mod credentials;
pub mod error;
pub mod observability;
pub mod publisher;
pub mod transport;

pub use config::{ConfigError, ConfigOverrides, PublisherConfig};
pub use credentials::{load_identity, load_trust_anchor, Identity, TrustAnchor};
pub use error::{
    ConnectionError, CredentialError, PublishError, PublisherError, PublisherResult, Stage,
};
pub use publisher::SecurePublisher;
pub use transport::mqtt::Session;
pub use transport::{cancellation, Acknowledgement, Endpoint, Message, QoS};
