//! Mock transport for testing
//!
//! [`MockConnector`] hands out [`MockSession`]s that record every call and
//! answer requests immediately. Connection outcomes are scripted per attempt,
//! and tests can inject arbitrary transport events with [`MockConnector::emit`].
//! Subscription acknowledgments can be held back with
//! [`MockConnector::defer_subscribe_acks`] to model a slow broker.

use crate::config::ConnectionConfig;
use crate::error::ClientError;
use crate::transport::{
    AckSender, EventSender, PendingAck, QoS, TransportConnector, TransportEvent, TransportSession,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;

/// What the mock broker does with one connection attempt
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ConnectOutcome {
    /// Emit `Connected`
    #[default]
    Accept,
    /// Emit the given failure event
    Fail(TransportEvent),
    /// Emit nothing; the test drives the attempt with `emit`
    Manual,
}

/// One recorded transport interaction
#[derive(Debug, Clone, PartialEq)]
pub enum TransportCall {
    Connect,
    Reconnect,
    Publish {
        topic: String,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    },
    Subscribe {
        topic: String,
        qos: QoS,
    },
    Unsubscribe {
        topic: String,
    },
    End,
}

#[derive(Debug, Default)]
struct MockBroker {
    calls: Vec<TransportCall>,
    attempts: Vec<Instant>,
    events: Option<EventSender>,
    outcomes: VecDeque<ConnectOutcome>,
    default_outcome: ConnectOutcome,
    granted: HashMap<String, QoS>,
    failing_topics: HashSet<String>,
    fail_publish: bool,
    refuse_sessions: bool,
    defer_subscribe_acks: bool,
    deferred_subscribes: Vec<(AckSender<QoS>, Result<QoS, ClientError>)>,
}

impl MockBroker {
    fn next_outcome(&mut self) -> ConnectOutcome {
        self.outcomes
            .pop_front()
            .unwrap_or_else(|| self.default_outcome.clone())
    }

    /// Record an attempt and play its scripted outcome on `events`
    fn attempt(&mut self, call: TransportCall, events: &EventSender) {
        self.calls.push(call);
        self.attempts.push(Instant::now());
        match self.next_outcome() {
            ConnectOutcome::Accept => {
                let _ = events.send(TransportEvent::Connected);
            }
            ConnectOutcome::Fail(event) => {
                let _ = events.send(event);
            }
            ConnectOutcome::Manual => {}
        }
    }
}

/// Connector producing in-memory sessions; clones share one mock broker
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    broker: Arc<Mutex<MockBroker>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connector whose first attempts follow `outcomes`, then accept
    pub fn with_outcomes(outcomes: impl IntoIterator<Item = ConnectOutcome>) -> Self {
        let connector = Self::new();
        connector.lock().outcomes.extend(outcomes);
        connector
    }

    fn lock(&self) -> MutexGuard<'_, MockBroker> {
        self.broker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Outcome used once the scripted outcomes run out
    pub fn set_default_outcome(&self, outcome: ConnectOutcome) {
        self.lock().default_outcome = outcome;
    }

    pub fn push_outcome(&self, outcome: ConnectOutcome) {
        self.lock().outcomes.push_back(outcome);
    }

    /// Make `connect` fail synchronously
    pub fn refuse_sessions(&self, refuse: bool) {
        self.lock().refuse_sessions = refuse;
    }

    /// Grant `qos` instead of the requested level for `topic`
    pub fn grant(&self, topic: &str, qos: QoS) {
        self.lock().granted.insert(topic.to_string(), qos);
    }

    /// Reject subscriptions to `topic`
    pub fn fail_topic(&self, topic: &str) {
        self.lock().failing_topics.insert(topic.to_string());
    }

    pub fn set_fail_publish(&self, fail: bool) {
        self.lock().fail_publish = fail;
    }

    /// Hold subscription acks until [`release_subscribe_acks`](Self::release_subscribe_acks)
    pub fn defer_subscribe_acks(&self, defer: bool) {
        self.lock().defer_subscribe_acks = defer;
    }

    /// Answer every held subscription; returns how many were answered
    pub fn release_subscribe_acks(&self) -> usize {
        let deferred = std::mem::take(&mut self.lock().deferred_subscribes);
        let count = deferred.len();
        for (ack, result) in deferred {
            let _ = ack.send(result);
        }
        count
    }

    /// Inject an event into the most recent session; false if nobody listens
    pub fn emit(&self, event: TransportEvent) -> bool {
        match &self.lock().events {
            Some(events) => events.send(event).is_ok(),
            None => false,
        }
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.lock().calls.clone()
    }

    pub fn subscribe_calls(&self) -> Vec<(String, QoS)> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                TransportCall::Subscribe { topic, qos } => Some((topic.clone(), *qos)),
                _ => None,
            })
            .collect()
    }

    pub fn publish_calls(&self) -> Vec<(String, Bytes)> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                TransportCall::Publish { topic, payload, .. } => {
                    Some((topic.clone(), payload.clone()))
                }
                _ => None,
            })
            .collect()
    }

    /// Instants of every connect and reconnect attempt
    pub fn connect_attempts(&self) -> Vec<Instant> {
        self.lock().attempts.clone()
    }

    pub fn clear_history(&self) {
        let mut broker = self.lock();
        broker.calls.clear();
        broker.attempts.clear();
    }
}

impl TransportConnector for MockConnector {
    type Session = MockSession;

    fn connect(
        &self,
        _config: &ConnectionConfig,
        events: EventSender,
    ) -> Result<Self::Session, ClientError> {
        let mut broker = self.lock();
        if broker.refuse_sessions {
            broker.calls.push(TransportCall::Connect);
            broker.attempts.push(Instant::now());
            return Err(ClientError::transport("mock broker refused the session"));
        }

        broker.events = Some(events.clone());
        broker.attempt(TransportCall::Connect, &events);

        Ok(MockSession {
            broker: self.broker.clone(),
            events,
        })
    }
}

/// Session bound to the mock broker
#[derive(Debug)]
pub struct MockSession {
    broker: Arc<Mutex<MockBroker>>,
    events: EventSender,
}

impl MockSession {
    fn lock(&self) -> MutexGuard<'_, MockBroker> {
        self.broker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl TransportSession for MockSession {
    fn publish(&self, topic: &str, payload: Bytes, qos: QoS, retain: bool) -> PendingAck<()> {
        let mut broker = self.lock();
        broker.calls.push(TransportCall::Publish {
            topic: topic.to_string(),
            payload,
            qos,
            retain,
        });

        if broker.fail_publish {
            PendingAck::ready(Err(ClientError::transport("mock publish failure")))
        } else {
            PendingAck::ready(Ok(()))
        }
    }

    fn subscribe(&self, topic: &str, qos: QoS) -> PendingAck<QoS> {
        let mut broker = self.lock();
        broker.calls.push(TransportCall::Subscribe {
            topic: topic.to_string(),
            qos,
        });

        let result = if broker.failing_topics.contains(topic) {
            Err(ClientError::transport(format!(
                "subscription to {topic} refused"
            )))
        } else {
            Ok(broker.granted.get(topic).copied().unwrap_or(qos))
        };

        if broker.defer_subscribe_acks {
            let (ack, pending) = PendingAck::channel();
            broker.deferred_subscribes.push((ack, result));
            pending
        } else {
            PendingAck::ready(result)
        }
    }

    fn unsubscribe(&self, topic: &str) -> PendingAck<()> {
        self.lock().calls.push(TransportCall::Unsubscribe {
            topic: topic.to_string(),
        });
        PendingAck::ready(Ok(()))
    }

    fn reconnect(&self) -> Result<(), ClientError> {
        self.lock().attempt(TransportCall::Reconnect, &self.events);
        Ok(())
    }

    async fn end(&self) -> Result<(), ClientError> {
        self.lock().calls.push(TransportCall::End);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_scripted_outcomes_then_default() {
        // Arrange
        let connector = MockConnector::with_outcomes([ConnectOutcome::Fail(
            TransportEvent::Error("refused".to_string()),
        )]);
        let config = ConnectionConfig::new("localhost", 1883);
        let (tx, mut rx) = mpsc::unbounded_channel();

        // Act
        let session = connector.connect(&config, tx).unwrap();
        session.reconnect().unwrap();

        // Assert
        assert_eq!(
            rx.recv().await,
            Some(TransportEvent::Error("refused".to_string()))
        );
        assert_eq!(rx.recv().await, Some(TransportEvent::Connected));
        assert_eq!(
            connector.calls(),
            vec![TransportCall::Connect, TransportCall::Reconnect]
        );
        assert_eq!(connector.connect_attempts().len(), 2);
    }

    #[tokio::test]
    async fn test_requests_are_recorded_and_answered() {
        let connector = MockConnector::new();
        connector.grant("a", QoS::AtMostOnce);
        connector.fail_topic("b");
        let (tx, _rx) = mpsc::unbounded_channel();
        let session = connector
            .connect(&ConnectionConfig::new("localhost", 1883), tx)
            .unwrap();

        assert_eq!(
            session.subscribe("a", QoS::ExactlyOnce).resolve().await.unwrap(),
            QoS::AtMostOnce
        );
        assert!(session.subscribe("b", QoS::AtMostOnce).resolve().await.is_err());
        session
            .publish("c", Bytes::from_static(b"hi"), QoS::AtLeastOnce, false)
            .resolve()
            .await
            .unwrap();

        assert_eq!(
            connector.subscribe_calls(),
            vec![
                ("a".to_string(), QoS::ExactlyOnce),
                ("b".to_string(), QoS::AtMostOnce)
            ]
        );
        assert_eq!(
            connector.publish_calls(),
            vec![("c".to_string(), Bytes::from_static(b"hi"))]
        );
    }

    #[tokio::test]
    async fn test_deferred_subscribe_acks() {
        let connector = MockConnector::new();
        connector.defer_subscribe_acks(true);
        let (tx, _rx) = mpsc::unbounded_channel();
        let session = connector
            .connect(&ConnectionConfig::new("localhost", 1883), tx)
            .unwrap();

        let pending = session.subscribe("a", QoS::AtLeastOnce);
        let waiter = tokio::spawn(pending.resolve());
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        assert_eq!(connector.release_subscribe_acks(), 1);
        assert_eq!(waiter.await.unwrap().unwrap(), QoS::AtLeastOnce);
        assert_eq!(connector.release_subscribe_acks(), 0);
    }

    #[test]
    fn test_emit_without_session() {
        let connector = MockConnector::new();
        assert!(!connector.emit(TransportEvent::Connected));
    }
}
