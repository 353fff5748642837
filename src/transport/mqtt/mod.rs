//! MQTT 3.1.1 session over mutual TLS
//!
//! This module separates pure functions from I/O operations for testability.
//!
//! # Architecture
//!
//! - [`connection`] - Connection state, TLS configuration and MQTT options
//! - [`verifier`] - Broker certificate verifier for the skip-verification opt-in
//! - [`message_handler`] - Pure event routing and payload encoding
//! - [`client`] - The session: event loop task, publish and disconnect
//!
//! # Usage
//!
//! ```rust,no_run
//! use secure_publisher::credentials::{load_identity, load_trust_anchor};
//! use secure_publisher::transport::mqtt::{Session, SessionOptions};
//! use secure_publisher::transport::{Endpoint, Message, QoS};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let identity = load_identity("certs/clientCert.crt", "certs/clientKey.key")?;
//! let trust_anchor = load_trust_anchor("certs/serverCert.pem")?;
//! let endpoint = Endpoint::new("broker.example.com", 8883);
//!
//! let mut session = Session::connect(
//!     &endpoint,
//!     &identity,
//!     &trust_anchor,
//!     "test-con",
//!     true,
//!     &SessionOptions::default(),
//! )
//! .await?;
//! let message = Message::json("con/topic", "connected sucessfully", QoS::AtMostOnce, false)?;
//! session.publish(&message).await?;
//! session.disconnect(Duration::from_millis(250)).await;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;
pub mod verifier;

pub use client::{Session, SessionOptions};
pub use connection::{
    build_tls_config, configure_mqtt_options, configure_network_options, ConnectionState,
};
pub use message_handler::{EventRoute, MessageHandler};
pub use verifier::NoChainVerification;
