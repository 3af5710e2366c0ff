//! Pure routing decisions for rumqttc events
//!
//! The session pump feeds every polled event through [`route_mqtt_event`]
//! (or [`route_v311_event`] on MQTT 3.1.1) and every poll error through the
//! matching `classify_*` function; the resulting values are all it needs to
//! resolve acknowledgments and emit [`TransportEvent`]s.

use super::connection::{from_rumqttc_qos, from_v311_qos};
use crate::transport::{QoS, TransportEvent};
use bytes::Bytes;
use rumqttc::v5::mqttbytes::v5::{Packet, SubscribeReasonCode};
use rumqttc::v5::{ConnectionError, Event};
use rumqttc::Outgoing;
use std::io::ErrorKind;

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Connection acknowledged - ready to publish/subscribe
    ConnectionAcknowledged,
    /// Message received on subscribed topic
    MessageReceived { topic: String, payload: Bytes },
    /// Broker sent DISCONNECT
    Disconnected(String),
    /// SUBACK with the outcome of the single filter we subscribed
    SubscribeAcknowledged {
        pkid: u16,
        result: Result<QoS, String>,
    },
    UnsubscribeAcknowledged { pkid: u16 },
    /// PUBACK (QoS 1) or PUBCOMP (QoS 2): the publish flow is complete
    PublishCompleted { pkid: u16 },
    /// A queued request was written to the network with this packet id
    RequestSent(SentRequest),
    /// Our DISCONNECT was written
    DisconnectSent,
    /// Infrastructure event (PingResp, etc.)
    InfrastructureEvent(String),
}

/// Outgoing packets that complete the hand-off of a queued request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SentRequest {
    Publish(u16),
    Subscribe(u16),
    Unsubscribe(u16),
}

/// Route MQTT event to appropriate handler (pure routing decision)
pub fn route_mqtt_event(event: &Event) -> EventRoute {
    match event {
        Event::Incoming(incoming) => match incoming {
            Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
            Packet::Publish(publish) => EventRoute::MessageReceived {
                topic: String::from_utf8_lossy(&publish.topic).to_string(),
                payload: publish.payload.clone(),
            },
            Packet::Disconnect(disconnect) => {
                EventRoute::Disconnected(format!("broker disconnect: {disconnect:?}"))
            }
            Packet::SubAck(suback) => EventRoute::SubscribeAcknowledged {
                pkid: suback.pkid,
                result: subscription_result(&suback.return_codes),
            },
            Packet::UnsubAck(unsuback) => EventRoute::UnsubscribeAcknowledged {
                pkid: unsuback.pkid,
            },
            Packet::PubAck(puback) => EventRoute::PublishCompleted { pkid: puback.pkid },
            Packet::PubComp(pubcomp) => EventRoute::PublishCompleted { pkid: pubcomp.pkid },
            other => EventRoute::InfrastructureEvent(format!("{other:?}")),
        },
        Event::Outgoing(outgoing) => route_outgoing(outgoing),
    }
}

/// Route an MQTT 3.1.1 event (pure routing decision)
pub fn route_v311_event(event: &rumqttc::Event) -> EventRoute {
    use rumqttc::Packet as V311Packet;

    match event {
        rumqttc::Event::Incoming(incoming) => match incoming {
            V311Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
            V311Packet::Publish(publish) => EventRoute::MessageReceived {
                topic: publish.topic.clone(),
                payload: publish.payload.clone(),
            },
            V311Packet::Disconnect => EventRoute::Disconnected("broker disconnect".to_string()),
            V311Packet::SubAck(suback) => EventRoute::SubscribeAcknowledged {
                pkid: suback.pkid,
                result: v311_subscription_result(&suback.return_codes),
            },
            V311Packet::UnsubAck(unsuback) => EventRoute::UnsubscribeAcknowledged {
                pkid: unsuback.pkid,
            },
            V311Packet::PubAck(puback) => EventRoute::PublishCompleted { pkid: puback.pkid },
            V311Packet::PubComp(pubcomp) => EventRoute::PublishCompleted { pkid: pubcomp.pkid },
            other => EventRoute::InfrastructureEvent(format!("{other:?}")),
        },
        rumqttc::Event::Outgoing(outgoing) => route_outgoing(outgoing),
    }
}

/// Outgoing packets look the same for both protocol revisions
fn route_outgoing(outgoing: &Outgoing) -> EventRoute {
    match outgoing {
        Outgoing::Publish(pkid) => EventRoute::RequestSent(SentRequest::Publish(*pkid)),
        Outgoing::Subscribe(pkid) => EventRoute::RequestSent(SentRequest::Subscribe(*pkid)),
        Outgoing::Unsubscribe(pkid) => EventRoute::RequestSent(SentRequest::Unsubscribe(*pkid)),
        Outgoing::Disconnect => EventRoute::DisconnectSent,
        other => EventRoute::InfrastructureEvent(format!("{other:?}")),
    }
}

/// Validate subscription success from SubAck (pure function)
pub fn subscription_result(return_codes: &[SubscribeReasonCode]) -> Result<QoS, String> {
    match return_codes.first() {
        Some(SubscribeReasonCode::Success(qos)) => Ok(from_rumqttc_qos(*qos)),
        Some(code) => Err(format!("Subscription refused by broker: {code:?}")),
        None => Err("Subscription acknowledgment carried no reason code".to_string()),
    }
}

pub fn v311_subscription_result(
    return_codes: &[rumqttc::SubscribeReasonCode],
) -> Result<QoS, String> {
    match return_codes.first() {
        Some(rumqttc::SubscribeReasonCode::Success(qos)) => Ok(from_v311_qos(*qos)),
        Some(rumqttc::SubscribeReasonCode::Failure) => {
            Err("Subscription refused by broker".to_string())
        }
        None => Err("Subscription acknowledgment carried no reason code".to_string()),
    }
}

/// Map an MQTT 5 poll error to the lifecycle event the manager should see
///
/// The client reports an unanswered connect as `Timeout`.
pub fn classify_connection_error(error: &ConnectionError) -> TransportEvent {
    let message = error.to_string();
    match error {
        ConnectionError::Timeout(_) => TransportEvent::Timeout(message),
        ConnectionError::Io(io) if is_closed_kind(io.kind()) => TransportEvent::Closed(message),
        _ => TransportEvent::Error(message),
    }
}

/// Map an MQTT 3.1.1 poll error to the lifecycle event the manager should see
pub fn classify_v311_error(error: &rumqttc::ConnectionError) -> TransportEvent {
    let message = error.to_string();
    match error {
        rumqttc::ConnectionError::NetworkTimeout | rumqttc::ConnectionError::FlushTimeout => {
            TransportEvent::Timeout(message)
        }
        rumqttc::ConnectionError::Io(io) if is_closed_kind(io.kind()) => {
            TransportEvent::Closed(message)
        }
        _ => TransportEvent::Error(message),
    }
}

fn is_closed_kind(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::UnexpectedEof
            | ErrorKind::BrokenPipe
    )
}
