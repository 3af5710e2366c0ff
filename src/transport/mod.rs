//! Transport seam between the connection manager and the wire-level client
//!
//! The manager never talks to a protocol library directly. It builds sessions
//! through a [`TransportConnector`], issues requests through the
//! [`TransportSession`] it gets back, and consumes one stream of
//! [`TransportEvent`]s per session. The rumqttc binding lives in [`mqtt`];
//! tests use the mocks in [`crate::testing`].

use crate::config::ConnectionConfig;
use crate::error::ClientError;
use bytes::Bytes;
use std::fmt;
use tokio::sync::{mpsc, oneshot};

pub mod mqtt;

/// Delivery guarantee negotiated per subscription or publish
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QoS {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl QoS {
    pub fn level(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for QoS {
    type Error = ClientError;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(ClientError::transport(format!("invalid QoS level {other}"))),
        }
    }
}

impl fmt::Display for QoS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.level())
    }
}

/// Lifecycle and data events emitted by a transport session
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Broker accepted the connection
    Connected,
    /// Protocol or network error
    Error(String),
    /// Connect or keep-alive timed out
    Timeout(String),
    /// Underlying stream closed
    Closed(String),
    /// Broker sent DISCONNECT
    Disconnected(String),
    /// Application message on a subscribed topic
    MessageReceived { topic: String, payload: Bytes },
}

impl TransportEvent {
    /// Failure description for connection-loss events, `None` otherwise
    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            TransportEvent::Error(reason)
            | TransportEvent::Timeout(reason)
            | TransportEvent::Closed(reason)
            | TransportEvent::Disconnected(reason) => Some(reason),
            TransportEvent::Connected | TransportEvent::MessageReceived { .. } => None,
        }
    }
}

/// Sending half handed to a session for its lifecycle events
pub type EventSender = mpsc::UnboundedSender<TransportEvent>;

/// Receiving half consumed by the connection manager
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// Acknowledgment for a request that has already been issued
///
/// Resolves exactly once: with the broker's answer, or with a transport error
/// when the session drops the request.
#[derive(Debug)]
pub struct PendingAck<T> {
    rx: oneshot::Receiver<Result<T, ClientError>>,
}

/// Completion side of a [`PendingAck`]
pub type AckSender<T> = oneshot::Sender<Result<T, ClientError>>;

impl<T> PendingAck<T> {
    /// Create an unresolved acknowledgment and its completion handle
    pub fn channel() -> (AckSender<T>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    /// Acknowledgment that is already resolved
    pub fn ready(result: Result<T, ClientError>) -> Self {
        let (tx, ack) = Self::channel();
        let _ = tx.send(result);
        ack
    }

    /// Wait for the acknowledgment
    pub async fn resolve(self) -> Result<T, ClientError> {
        self.rx.await.unwrap_or_else(|_| {
            Err(ClientError::transport(
                "request dropped before acknowledgment",
            ))
        })
    }
}

/// Builds transport sessions for a connection configuration
pub trait TransportConnector: Send + Sync + 'static {
    type Session: TransportSession;

    /// Start connecting; lifecycle events are delivered on `events`
    fn connect(
        &self,
        config: &ConnectionConfig,
        events: EventSender,
    ) -> Result<Self::Session, ClientError>;
}

/// One logical connection to the broker
///
/// Request methods issue the request before returning; only the
/// acknowledgment is awaited through the returned [`PendingAck`].
#[async_trait::async_trait]
pub trait TransportSession: Send + Sync + 'static {
    fn publish(&self, topic: &str, payload: Bytes, qos: QoS, retain: bool) -> PendingAck<()>;

    /// Resolves with the QoS granted by the broker
    fn subscribe(&self, topic: &str, qos: QoS) -> PendingAck<QoS>;

    fn unsubscribe(&self, topic: &str) -> PendingAck<()>;

    /// Re-establish the connection after a failure
    fn reconnect(&self) -> Result<(), ClientError>;

    /// Close the connection; no events are emitted afterwards
    async fn end(&self) -> Result<(), ClientError>;
}
