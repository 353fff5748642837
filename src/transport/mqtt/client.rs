//! Impure I/O operations for the MQTT session
//!
//! This module owns the rumqttc client and its event loop task. The task
//! never reconnects: the first transport error ends the session.

use super::connection::{
    build_tls_config, configure_mqtt_options, configure_network_options, ConnectionState,
};
use super::message_handler::{EventRoute, MessageHandler};
use crate::credentials::{Identity, TrustAnchor};
use crate::error::{ConnectionError, PublishError};
use crate::transport::{Acknowledgement, Cancellation, Endpoint, Message, QoS};
use rumqttc::{AsyncClient, EventLoop};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Capacity of the rumqttc request channel. One publish and one disconnect
/// are the most a session ever queues.
const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// Outcome of the handshake, reported once by the event loop task
type ConnAckResult = Result<(), ConnectionError>;

/// Timing and cancellation knobs for one session
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Bound on TCP connect + TLS handshake + CONNECT/CONNACK
    pub handshake_timeout: Duration,
    /// Bound on waiting for the QoS handshake of a publish
    pub ack_timeout: Duration,
    pub keep_alive: Duration,
    pub cancellation: Cancellation,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            ack_timeout: Duration::from_secs(10),
            keep_alive: Duration::from_secs(30),
            cancellation: Cancellation::never(),
        }
    }
}

/// An established MQTT session over mutual TLS
pub struct Session {
    client_id: String,
    endpoint: Endpoint,
    client: AsyncClient,
    state_rx: watch::Receiver<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
    events_rx: mpsc::UnboundedReceiver<EventRoute>,
    cancellation: Cancellation,
    event_loop_handle: Option<JoinHandle<()>>,
    ack_timeout: Duration,
    closed: bool,
}

impl Session {
    /// Open a TLS connection to `endpoint`, present the client identity and
    /// complete the MQTT handshake.
    ///
    /// Returns only after the broker accepted the CONNECT. Any failure along
    /// the way tears the half-open connection down before returning.
    pub async fn connect(
        endpoint: &Endpoint,
        identity: &Identity,
        trust_anchor: &TrustAnchor,
        client_id: &str,
        verify_server: bool,
        options: &SessionOptions,
    ) -> Result<Self, ConnectionError> {
        if options.cancellation.is_cancelled() {
            return Err(ConnectionError::Cancelled);
        }

        let tls_config = build_tls_config(identity, trust_anchor, verify_server)?;
        let mqtt_options =
            configure_mqtt_options(endpoint, client_id, tls_config, options.keep_alive)?;
        let (client, mut event_loop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);
        event_loop.set_network_options(configure_network_options(options.handshake_timeout));

        let ((state_tx, state_rx), (shutdown_tx, shutdown_rx)) = Self::setup_connection_channels();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (connack_tx, connack_rx) = oneshot::channel();

        info!(
            broker = %endpoint,
            client_id,
            verify_server,
            "Connecting to MQTT broker"
        );

        let handle = tokio::spawn(Self::run_event_loop(
            event_loop,
            state_tx,
            shutdown_rx,
            events_tx,
            connack_tx,
            client_id.to_string(),
            options.handshake_timeout,
        ));

        // Built before waiting so Drop cleans up the task on every error path
        let session = Session {
            client_id: client_id.to_string(),
            endpoint: endpoint.clone(),
            client,
            state_rx,
            shutdown_tx,
            events_rx,
            cancellation: options.cancellation.clone(),
            event_loop_handle: Some(handle),
            ack_timeout: options.ack_timeout,
            closed: false,
        };

        Self::wait_for_connection_confirmation(
            connack_rx,
            options.handshake_timeout,
            options.cancellation.clone(),
        )
        .await?;

        info!(broker = %endpoint, client_id, "Connected to MQTT broker");
        Ok(session)
    }

    /// Create connection state and shutdown channels
    #[allow(clippy::type_complexity)]
    fn setup_connection_channels() -> (
        (
            watch::Sender<ConnectionState>,
            watch::Receiver<ConnectionState>,
        ),
        (watch::Sender<bool>, watch::Receiver<bool>),
    ) {
        let state_channels = watch::channel(ConnectionState::Connecting);
        let shutdown_channels = watch::channel(false);
        (state_channels, shutdown_channels)
    }

    /// Wait for the event loop to report the CONNACK outcome
    async fn wait_for_connection_confirmation(
        connack_rx: oneshot::Receiver<ConnAckResult>,
        timeout: Duration,
        mut cancellation: Cancellation,
    ) -> Result<(), ConnectionError> {
        tokio::select! {
            biased;
            _ = cancellation.cancelled() => Err(ConnectionError::Cancelled),
            result = tokio::time::timeout(timeout, connack_rx) => match result {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(_)) => Err(ConnectionError::Closed),
                Err(_) => Err(ConnectionError::HandshakeTimeout(timeout)),
            },
        }
    }

    async fn run_event_loop(
        mut event_loop: EventLoop,
        state_tx: watch::Sender<ConnectionState>,
        mut shutdown_rx: watch::Receiver<bool>,
        events_tx: mpsc::UnboundedSender<EventRoute>,
        connack_tx: oneshot::Sender<ConnAckResult>,
        client_id: String,
        handshake_timeout: Duration,
    ) {
        debug!(target: "mqtt_transport", client_id = %client_id, "Event loop started");
        let mut connack_tx = Some(connack_tx);

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        debug!(target: "mqtt_transport", "Shutdown signal received, stopping event loop");
                        break;
                    }
                }

                event_result = event_loop.poll() => match event_result {
                    Ok(event) => {
                        let route = MessageHandler::route_mqtt_event(&event);
                        let keep_running =
                            Self::process_event_route(&route, &state_tx, &mut connack_tx);
                        let _ = events_tx.send(route);
                        if !keep_running {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = state_tx.send(ConnectionState::Disconnected(e.to_string()));
                        match connack_tx.take() {
                            Some(tx) => {
                                let failure = ConnectionError::from_handshake(e, handshake_timeout);
                                let _ = tx.send(Err(failure));
                            }
                            None => error!(client_id = %client_id, error = %e, "MQTT connection lost"),
                        }
                        break;
                    }
                }
            }
        }

        if !matches!(*state_tx.borrow(), ConnectionState::Disconnected(_)) {
            let _ = state_tx.send(ConnectionState::Disconnected(
                "event loop stopped".to_string(),
            ));
        }
        debug!(target: "mqtt_transport", client_id = %client_id, "Event loop stopped");
    }

    /// Apply a routed event to the session state.
    /// Returns true to keep polling, false once the session is over.
    fn process_event_route(
        route: &EventRoute,
        state_tx: &watch::Sender<ConnectionState>,
        connack_tx: &mut Option<oneshot::Sender<ConnAckResult>>,
    ) -> bool {
        match route {
            EventRoute::ConnectionAcknowledged => {
                let _ = state_tx.send(ConnectionState::Connected);
                if let Some(tx) = connack_tx.take() {
                    let _ = tx.send(Ok(()));
                }
                true
            }
            EventRoute::DisconnectSent => {
                let _ = state_tx.send(ConnectionState::Disconnected(
                    "client disconnected".to_string(),
                ));
                false
            }
            EventRoute::Disconnected => {
                warn!("Broker closed the session");
                let _ = state_tx.send(ConnectionState::Disconnected(
                    "broker closed the session".to_string(),
                ));
                false
            }
            EventRoute::PublishReceived { pkid } => {
                debug!(target: "mqtt_transport", pkid, "PUBREC received, releasing");
                true
            }
            EventRoute::InfrastructureEvent(event_str) => {
                debug!(target: "mqtt_transport", "MQTT event: {}", event_str);
                true
            }
            EventRoute::PublishSent { .. }
            | EventRoute::PublishAcknowledged { .. }
            | EventRoute::PublishCompleted { .. }
            | EventRoute::OutgoingEvent => true,
        }
    }

    /// Check connection state before operations
    fn check_connection_state(&self) -> Result<(), PublishError> {
        let current_state = self.connection_state();
        if !current_state.can_publish() {
            return Err(PublishError::NotConnected {
                state: current_state,
            });
        }
        Ok(())
    }

    /// Publish one message and wait for its QoS handshake.
    ///
    /// QoS 0 completes once the PUBLISH is written to the connection, QoS 1
    /// on PUBACK, QoS 2 on PUBCOMP. The wait is bounded by the ack timeout
    /// and interrupted by cancellation.
    pub async fn publish(&mut self, message: &Message) -> Result<Acknowledgement, PublishError> {
        if self.cancellation.is_cancelled() {
            return Err(PublishError::Cancelled);
        }

        // Routes queued before this publish cannot belong to it
        while self.events_rx.try_recv().is_ok() {}
        self.check_connection_state()?;

        let qos = message.qos();
        let started = Instant::now();
        debug!(
            topic = message.topic(),
            %qos,
            retain = message.retain(),
            bytes = message.payload().len(),
            "Publishing message"
        );

        self.client
            .publish_bytes(
                message.topic(),
                qos.into(),
                message.retain(),
                message.payload().clone(),
            )
            .await
            .map_err(PublishError::Request)?;

        let ack_timeout = self.ack_timeout;
        let mut cancellation = self.cancellation.clone();
        let state_rx = self.state_rx.clone();
        let outcome = tokio::select! {
            biased;
            _ = cancellation.cancelled() => Err(PublishError::Cancelled),
            result = tokio::time::timeout(
                ack_timeout,
                Self::wait_for_delivery(&mut self.events_rx, qos, &state_rx),
            ) => result.unwrap_or(Err(PublishError::AckTimeout {
                qos,
                timeout: ack_timeout,
            })),
        };
        if matches!(outcome, Err(PublishError::Cancelled)) {
            warn!(topic = message.topic(), "Publish cancelled, closing connection");
            self.abort();
        }
        let packet_id = outcome?;

        let acknowledgement = Acknowledgement {
            topic: message.topic().to_string(),
            qos,
            packet_id,
            elapsed: started.elapsed(),
        };
        info!(
            topic = %acknowledgement.topic,
            %qos,
            packet_id,
            elapsed_ms = acknowledgement.elapsed.as_millis() as u64,
            "Message delivered"
        );
        Ok(acknowledgement)
    }

    /// Follow routes until the handshake for the message just handed to the
    /// client finishes. The packet id is learned from its PUBLISH event.
    async fn wait_for_delivery(
        events_rx: &mut mpsc::UnboundedReceiver<EventRoute>,
        qos: QoS,
        state_rx: &watch::Receiver<ConnectionState>,
    ) -> Result<u16, PublishError> {
        let mut packet_id = None;

        while let Some(route) = events_rx.recv().await {
            if let EventRoute::PublishSent { pkid } = route {
                packet_id.get_or_insert(pkid);
            }
            if let Some(pkid) = packet_id {
                if MessageHandler::completes_delivery(&route, qos, pkid) {
                    return Ok(pkid);
                }
            }
            if matches!(route, EventRoute::Disconnected | EventRoute::DisconnectSent) {
                break;
            }
        }

        let reason = match &*state_rx.borrow() {
            ConnectionState::Disconnected(reason) => reason.clone(),
            _ => "event loop stopped".to_string(),
        };
        Err(PublishError::ConnectionLost(reason))
    }

    /// Send DISCONNECT and stop the event loop.
    ///
    /// Waits up to `grace` for the DISCONNECT to be written, then closes the
    /// connection regardless. Safe to call more than once and on a session
    /// whose connection already dropped.
    pub async fn disconnect(&mut self, grace: Duration) {
        if self.closed {
            debug!(client_id = %self.client_id, "Session already closed");
            return;
        }
        self.closed = true;

        let connected = self.state_rx.borrow().can_publish();
        if let Some(mut handle) = self.event_loop_handle.take() {
            if connected {
                if let Err(e) = self.client.disconnect().await {
                    debug!(error = %e, "Disconnect request not delivered to event loop");
                }

                match tokio::time::timeout(grace, &mut handle).await {
                    Ok(Ok(())) => debug!("Event loop shut down gracefully"),
                    Ok(Err(e)) if !e.is_cancelled() => {
                        warn!("Event loop task ended with error: {}", e);
                    }
                    Ok(Err(_)) => {}
                    Err(_) => {
                        warn!(
                            grace_ms = grace.as_millis() as u64,
                            "Event loop didn't shut down within grace period, forcing abort"
                        );
                        handle.abort();
                    }
                }
            } else {
                handle.abort();
            }
        }
        let _ = self.shutdown_tx.send(true);

        info!(broker = %self.endpoint, client_id = %self.client_id, "Disconnected from MQTT broker");
    }

    /// Stop the event loop without a DISCONNECT, closing the transport
    fn abort(&mut self) {
        self.closed = true;
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.event_loop_handle.take() {
            handle.abort();
        }
    }

    /// Current connection state
    pub fn connection_state(&self) -> ConnectionState {
        let state = self.state_rx.borrow().clone();
        if self.closed && !matches!(state, ConnectionState::Disconnected(_)) {
            return ConnectionState::Disconnected("client disconnected".to_string());
        }
        state
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.abort();
    }
}
