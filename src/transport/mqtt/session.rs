//! rumqttc-backed transport session
//!
//! Each connection attempt gets a fresh client/event-loop pair and a pump
//! task that polls the event loop until the first error. The pump never lets
//! rumqttc reconnect on its own; retries are driven by the connection manager
//! through [`TransportSession::reconnect`].
//!
//! rumqttc has separate clients for MQTT 3.1.1 and MQTT 5; [`MqttClient`] and
//! [`MqttEventLoop`] pick one per `protocol_version` so the pump and the ack
//! tracking are shared.

use super::ack_tracker::AckTracker;
use super::connection::{
    configure_mqtt_options, configure_v311_options, to_rumqttc_qos, to_v311_qos,
};
use super::message_handler::{
    classify_connection_error, classify_v311_error, route_mqtt_event, route_v311_event,
    EventRoute, SentRequest,
};
use crate::config::{ConnectionConfig, ProtocolVersion};
use crate::error::ClientError;
use crate::transport::{
    EventSender, PendingAck, QoS, TransportConnector, TransportEvent, TransportSession,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Capacity of the request channel between `AsyncClient` and `EventLoop`
const REQUEST_CHANNEL_CAPACITY: usize = 64;

/// How long `end` waits for the DISCONNECT packet to be flushed
const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Connector producing rumqttc sessions
#[derive(Debug, Clone, Copy, Default)]
pub struct RumqttcConnector;

impl RumqttcConnector {
    pub fn new() -> Self {
        Self
    }
}

impl TransportConnector for RumqttcConnector {
    type Session = RumqttcSession;

    fn connect(
        &self,
        config: &ConnectionConfig,
        events: EventSender,
    ) -> Result<Self::Session, ClientError> {
        let link = Link::open(config, events.clone())?;
        Ok(RumqttcSession {
            config: config.clone(),
            events,
            link: Mutex::new(Some(link)),
        })
    }
}

/// Request handle for either protocol revision
#[derive(Clone)]
pub enum MqttClient {
    V311(rumqttc::AsyncClient),
    V5(rumqttc::v5::AsyncClient),
}

/// Event loop for either protocol revision
pub enum MqttEventLoop {
    V311(rumqttc::EventLoop),
    V5(rumqttc::v5::EventLoop),
}

impl MqttClient {
    /// Build the client/event-loop pair for `config.protocol_version`
    pub fn new(config: &ConnectionConfig) -> Result<(Self, MqttEventLoop), ClientError> {
        match config.protocol_version {
            ProtocolVersion::V311 => {
                let options = configure_v311_options(config)?;
                let (client, eventloop) =
                    rumqttc::AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
                Ok((MqttClient::V311(client), MqttEventLoop::V311(eventloop)))
            }
            ProtocolVersion::V5 => {
                let options = configure_mqtt_options(config)?;
                let (client, eventloop) =
                    rumqttc::v5::AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
                Ok((MqttClient::V5(client), MqttEventLoop::V5(eventloop)))
            }
        }
    }

    fn try_publish(&self, topic: &str, qos: QoS, retain: bool, payload: Bytes) -> Result<(), String> {
        match self {
            MqttClient::V311(client) => client
                .try_publish(topic, to_v311_qos(qos), retain, payload.to_vec())
                .map_err(|e| e.to_string()),
            MqttClient::V5(client) => client
                .try_publish(topic, to_rumqttc_qos(qos), retain, payload)
                .map_err(|e| e.to_string()),
        }
    }

    fn try_subscribe(&self, topic: &str, qos: QoS) -> Result<(), String> {
        match self {
            MqttClient::V311(client) => client
                .try_subscribe(topic, to_v311_qos(qos))
                .map_err(|e| e.to_string()),
            MqttClient::V5(client) => client
                .try_subscribe(topic, to_rumqttc_qos(qos))
                .map_err(|e| e.to_string()),
        }
    }

    fn try_unsubscribe(&self, topic: &str) -> Result<(), String> {
        match self {
            MqttClient::V311(client) => client.try_unsubscribe(topic).map_err(|e| e.to_string()),
            MqttClient::V5(client) => client.try_unsubscribe(topic).map_err(|e| e.to_string()),
        }
    }

    fn try_disconnect(&self) -> Result<(), String> {
        match self {
            MqttClient::V311(client) => client.try_disconnect().map_err(|e| e.to_string()),
            MqttClient::V5(client) => client.try_disconnect().map_err(|e| e.to_string()),
        }
    }
}

impl MqttEventLoop {
    /// Poll the next event, already routed; errors are classified lifecycle events
    pub async fn next_route(&mut self) -> Result<EventRoute, TransportEvent> {
        match self {
            MqttEventLoop::V311(eventloop) => match eventloop.poll().await {
                Ok(event) => Ok(route_v311_event(&event)),
                Err(e) => Err(classify_v311_error(&e)),
            },
            MqttEventLoop::V5(eventloop) => match eventloop.poll().await {
                Ok(event) => Ok(route_mqtt_event(&event)),
                Err(e) => Err(classify_connection_error(&e)),
            },
        }
    }
}

/// One client/event-loop pair and the task polling it
struct Link {
    client: MqttClient,
    tracker: Arc<Mutex<AckTracker>>,
    pump: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl Link {
    fn open(config: &ConnectionConfig, events: EventSender) -> Result<Self, ClientError> {
        let (client, eventloop) = MqttClient::new(config)?;
        let tracker = Arc::new(Mutex::new(AckTracker::new()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        debug!(
            target: "mqtt_transport",
            host = %config.host,
            port = config.port,
            protocol_version = config.protocol_version.level(),
            "Starting MQTT event loop"
        );
        let pump = tokio::spawn(run_event_loop(
            eventloop,
            tracker.clone(),
            events,
            shutdown_rx,
            config.connect_timeout(),
        ));

        Ok(Self {
            client,
            tracker,
            pump,
            shutdown_tx,
        })
    }

    /// Stop the pump immediately and fail whatever it still owed
    fn abort(self, reason: &str) {
        let _ = self.shutdown_tx.send(true);
        self.pump.abort();
        lock(&self.tracker).fail_all(reason);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Transport session over rumqttc
pub struct RumqttcSession {
    config: ConnectionConfig,
    events: EventSender,
    link: Mutex<Option<Link>>,
}

impl std::fmt::Debug for RumqttcSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RumqttcSession")
            .field("client_id", &self.config.client_id)
            .field("active", &lock(&self.link).is_some())
            .finish()
    }
}

impl RumqttcSession {
    /// Run `issue` against the live link with the tracker locked, so the
    /// request is queued in the tracker before the pump can see it leave
    fn with_link<T>(
        &self,
        issue: impl FnOnce(&MqttClient, &mut AckTracker) -> PendingAck<T>,
    ) -> PendingAck<T> {
        let link = lock(&self.link);
        match link.as_ref() {
            Some(link) => {
                let mut tracker = lock(&link.tracker);
                issue(&link.client, &mut tracker)
            }
            None => PendingAck::ready(Err(ClientError::transport("MQTT session has ended"))),
        }
    }
}

#[async_trait]
impl TransportSession for RumqttcSession {
    fn publish(&self, topic: &str, payload: Bytes, qos: QoS, retain: bool) -> PendingAck<()> {
        self.with_link(|client, tracker| {
            match client.try_publish(topic, qos, retain, payload) {
                Ok(()) => {
                    let (ack_tx, ack) = PendingAck::channel();
                    tracker.queue_publish(qos, ack_tx);
                    ack
                }
                Err(e) => PendingAck::ready(Err(ClientError::transport(format!(
                    "Failed to queue publish: {e}"
                )))),
            }
        })
    }

    fn subscribe(&self, topic: &str, qos: QoS) -> PendingAck<QoS> {
        self.with_link(|client, tracker| {
            match client.try_subscribe(topic, qos) {
                Ok(()) => {
                    let (ack_tx, ack) = PendingAck::channel();
                    tracker.queue_subscribe(ack_tx);
                    ack
                }
                Err(e) => PendingAck::ready(Err(ClientError::transport(format!(
                    "Failed to queue subscribe: {e}"
                )))),
            }
        })
    }

    fn unsubscribe(&self, topic: &str) -> PendingAck<()> {
        self.with_link(|client, tracker| match client.try_unsubscribe(topic) {
            Ok(()) => {
                let (ack_tx, ack) = PendingAck::channel();
                tracker.queue_unsubscribe(ack_tx);
                ack
            }
            Err(e) => PendingAck::ready(Err(ClientError::transport(format!(
                "Failed to queue unsubscribe: {e}"
            )))),
        })
    }

    /// Replace the client and event loop with a fresh pair
    fn reconnect(&self) -> Result<(), ClientError> {
        let mut link = lock(&self.link);
        if let Some(old) = link.take() {
            old.abort("connection replaced by reconnect");
        }

        let new_link = Link::open(&self.config, self.events.clone())?;
        info!("Created new connection for reconnection attempt");
        *link = Some(new_link);
        Ok(())
    }

    async fn end(&self) -> Result<(), ClientError> {
        let link = lock(&self.link).take();
        let Some(mut link) = link else {
            return Ok(());
        };

        let queued = link.client.try_disconnect();
        // The pump stops once DISCONNECT is out, or right away if it already failed
        let stopped = tokio::time::timeout(GRACEFUL_SHUTDOWN_TIMEOUT, &mut link.pump)
            .await
            .is_ok();

        let result = match (queued, stopped) {
            (_, true) => {
                debug!(target: "mqtt_transport", "Event loop shut down gracefully");
                Ok(())
            }
            (Ok(()), false) => {
                warn!("Event loop did not shut down within timeout");
                Ok(())
            }
            (Err(e), false) => Err(ClientError::transport(format!(
                "Failed to send disconnect: {e}"
            ))),
        };

        link.abort("session ended");
        result
    }
}

impl Drop for RumqttcSession {
    fn drop(&mut self) {
        // Can't send DISCONNECT from Drop; only stop the background task
        if let Some(link) = lock(&self.link).take() {
            link.abort("session dropped");
        }
    }
}

/// Poll the event loop until shutdown or the first connection error
async fn run_event_loop(
    mut eventloop: MqttEventLoop,
    tracker: Arc<Mutex<AckTracker>>,
    events: EventSender,
    mut shutdown_rx: watch::Receiver<bool>,
    connect_timeout: Duration,
) {
    let connect_deadline = tokio::time::Instant::now() + connect_timeout;
    let mut connected = false;

    loop {
        let next = async {
            if connected {
                Ok(eventloop.next_route().await)
            } else {
                tokio::time::timeout_at(connect_deadline, eventloop.next_route()).await
            }
        };

        let polled = tokio::select! {
            _ = shutdown_rx.changed() => {
                debug!(target: "mqtt_transport", "Event loop received shutdown signal");
                return;
            }
            next = next => match next {
                Ok(polled) => polled,
                Err(_) => {
                    let reason = format!(
                        "no connection acknowledgment within {}s",
                        connect_timeout.as_secs()
                    );
                    warn!("MQTT connect timed out: {}", reason);
                    lock(&tracker).fail_all(&reason);
                    let _ = events.send(TransportEvent::Timeout(reason));
                    return;
                }
            },
        };

        let route = match polled {
            Ok(route) => route,
            Err(failure) => {
                let reason = failure.failure_reason().unwrap_or_default();
                error!("MQTT event loop error: {}", reason);
                lock(&tracker).fail_all(&format!("connection lost: {reason}"));
                let _ = events.send(failure);
                return;
            }
        };

        match route {
            EventRoute::ConnectionAcknowledged => {
                connected = true;
                info!("MQTT connection acknowledged by broker");
                let _ = events.send(TransportEvent::Connected);
            }
            EventRoute::MessageReceived { topic, payload } => {
                debug!(target: "mqtt_transport", "Received MQTT message on topic: {}", topic);
                let _ = events.send(TransportEvent::MessageReceived { topic, payload });
            }
            EventRoute::Disconnected(reason) => {
                warn!("MQTT broker disconnected: {}", reason);
                lock(&tracker).fail_all(&reason);
                let _ = events.send(TransportEvent::Disconnected(reason));
                return;
            }
            EventRoute::SubscribeAcknowledged { pkid, result } => {
                debug!(target: "mqtt_transport", pkid, "Subscription acknowledged: {:?}", result);
                lock(&tracker).subscribe_acknowledged(pkid, result);
            }
            EventRoute::UnsubscribeAcknowledged { pkid } => {
                lock(&tracker).unsubscribe_acknowledged(pkid);
            }
            EventRoute::PublishCompleted { pkid } => {
                lock(&tracker).publish_completed(pkid);
            }
            EventRoute::RequestSent(sent) => {
                let mut tracker = lock(&tracker);
                match sent {
                    SentRequest::Publish(pkid) => tracker.publish_sent(pkid),
                    SentRequest::Subscribe(pkid) => tracker.subscribe_sent(pkid),
                    SentRequest::Unsubscribe(pkid) => tracker.unsubscribe_sent(pkid),
                }
            }
            EventRoute::DisconnectSent => {
                debug!(target: "mqtt_transport", "DISCONNECT sent, stopping event loop");
                lock(&tracker).fail_all("session ended");
                return;
            }
            EventRoute::InfrastructureEvent(event_str) => {
                tracing::trace!(target: "mqtt_transport", "MQTT event: {}", event_str);
            }
        }
    }
}
