//! Pure routing and payload logic for MQTT events
//!
//! The session's event-loop task turns every rumqttc event into an
//! [`EventRoute`]; the publish path only has to match on routes.

use crate::transport::QoS;
use rumqttc::{Event, Outgoing, Packet};
use serde::Serialize;

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to appropriate handler (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                Packet::PubAck(ack) => EventRoute::PublishAcknowledged { pkid: ack.pkid },
                Packet::PubRec(rec) => EventRoute::PublishReceived { pkid: rec.pkid },
                Packet::PubComp(comp) => EventRoute::PublishCompleted { pkid: comp.pkid },
                Packet::Disconnect => EventRoute::Disconnected,
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(outgoing) => match outgoing {
                Outgoing::Publish(pkid) => EventRoute::PublishSent { pkid: *pkid },
                Outgoing::Disconnect => EventRoute::DisconnectSent,
                _ => EventRoute::OutgoingEvent,
            },
        }
    }

    /// Whether `route` completes the QoS handshake for packet `pkid`.
    ///
    /// QoS 0 completes as soon as the frame is written, QoS 1 on PUBACK,
    /// QoS 2 on PUBCOMP.
    pub fn completes_delivery(route: &EventRoute, qos: QoS, pkid: u16) -> bool {
        match (qos, route) {
            (QoS::AtMostOnce, EventRoute::PublishSent { .. }) => true,
            (QoS::AtLeastOnce, EventRoute::PublishAcknowledged { pkid: acked }) => *acked == pkid,
            (QoS::ExactlyOnce, EventRoute::PublishCompleted { pkid: completed }) => {
                *completed == pkid
            }
            _ => false,
        }
    }

    /// Format a value into a JSON payload (pure function)
    pub fn format_json_payload<T: Serialize + ?Sized>(
        value: &T,
    ) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(value)
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// CONNACK with success code
    ConnectionAcknowledged,
    /// PUBLISH written to the transport
    PublishSent { pkid: u16 },
    /// PUBACK (QoS 1 complete)
    PublishAcknowledged { pkid: u16 },
    /// PUBREC (first half of QoS 2)
    PublishReceived { pkid: u16 },
    /// PUBCOMP (QoS 2 complete)
    PublishCompleted { pkid: u16 },
    /// DISCONNECT written to the transport
    DisconnectSent,
    /// Broker closed the session
    Disconnected,
    /// Infrastructure event (PingResp, etc.)
    InfrastructureEvent(String),
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}
