//! Single-shot secure publisher
//!
//! Runs the fixed sequence load-identity, load-trust-anchor, connect,
//! publish, disconnect. Each step is attempted once; the first failure ends
//! the run and is reported with the stage it happened in.

use crate::config::PublisherConfig;
use crate::credentials::{load_identity, load_trust_anchor, Identity, TrustAnchor};
use crate::error::{PublisherError, PublisherResult, Stage};
use crate::transport::mqtt::{Session, SessionOptions};
use crate::transport::{Acknowledgement, Cancellation, Endpoint, Message};
use tracing::{info, warn, Instrument};

pub struct SecurePublisher {
    config: PublisherConfig,
    endpoint: Endpoint,
    cancellation: Cancellation,
}

impl SecurePublisher {
    /// Validate the configuration and fix the client id for this run
    pub fn new(mut config: PublisherConfig) -> PublisherResult<Self> {
        config.validate()?;
        let endpoint = config.endpoint()?;
        config.ensure_client_id();

        Ok(Self {
            config,
            endpoint,
            cancellation: Cancellation::never(),
        })
    }

    /// Observe `cancellation` during the handshake and acknowledgement waits
    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn client_id(&self) -> &str {
        &self.config.broker.client_id
    }

    pub fn load_identity(&self) -> PublisherResult<Identity> {
        load_identity(&self.config.tls.cert_path, &self.config.tls.key_path)
            .map_err(|e| PublisherError::credential(Stage::LoadIdentity, e))
    }

    pub fn load_trust_anchor(&self) -> PublisherResult<TrustAnchor> {
        load_trust_anchor(&self.config.tls.ca_path)
            .map_err(|e| PublisherError::credential(Stage::LoadTrustAnchor, e))
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            handshake_timeout: self.config.timeouts.handshake(),
            ack_timeout: self.config.timeouts.ack(),
            keep_alive: self.config.keep_alive(),
            cancellation: self.cancellation.clone(),
        }
    }

    pub async fn connect(
        &self,
        identity: &Identity,
        trust_anchor: &TrustAnchor,
    ) -> PublisherResult<Session> {
        let session = Session::connect(
            &self.endpoint,
            identity,
            trust_anchor,
            self.client_id(),
            self.config.tls.verify_server,
            &self.session_options(),
        )
        .await?;
        Ok(session)
    }

    pub async fn publish(
        &self,
        session: &mut Session,
        message: &Message,
    ) -> PublisherResult<Acknowledgement> {
        Ok(session.publish(message).await?)
    }

    /// Disconnect with the configured grace period
    pub async fn disconnect(&self, session: &mut Session) {
        session.disconnect(self.config.timeouts.grace_period()).await;
    }

    /// Publish `message` once, from credential loading to disconnect.
    ///
    /// The session is disconnected even when the publish fails.
    pub async fn run(&self, message: &Message) -> PublisherResult<Acknowledgement> {
        let span = crate::mqtt_span!(
            client_id = %self.client_id(),
            broker = %self.endpoint,
            topic = message.topic()
        );

        async {
            let identity = self.load_identity()?;
            let trust_anchor = self.load_trust_anchor()?;
            let mut session = self.connect(&identity, &trust_anchor).await?;

            let outcome = self.publish(&mut session, message).await;
            if let Err(e) = &outcome {
                warn!(stage = %e.stage(), error = %e.diagnostic(), "Publish failed, disconnecting");
            }
            self.disconnect(&mut session).await;

            if outcome.is_ok() {
                info!("Publish sequence complete");
            }
            outcome
        }
        .instrument(span)
        .await
    }

    /// Publish the message described by the configuration's `[message]` section
    pub async fn run_configured(&self) -> PublisherResult<Acknowledgement> {
        let message = self.config.message().map_err(|e| {
            PublisherError::Config(crate::config::ConfigError::InvalidConfig(e.to_string()))
        })?;
        self.run(&message).await
    }
}
