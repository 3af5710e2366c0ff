//! Connection manager
//!
//! Owns one broker connection: its state, the live transport session, the
//! subscription registry and the reconnect timer. All transport events for a
//! session are consumed by a single dispatch task, so replaying subscriptions
//! after a reconnect always happens before any message on the new session is
//! routed.
//!
//! Every session gets a new generation number. Events and timers carry the
//! generation they were created for and are ignored once it is stale, which
//! keeps events from an ended session from touching the current one.

use super::reconnect::{ReconnectDecision, ReconnectPolicy, ReconnectState};
use super::registry::{MessageCallback, SubscriptionRegistry};
use super::router::MessageRouter;
use super::status::{ConnectionState, StatusCallback, StatusKind};
use crate::config::ConnectionConfig;
use crate::error::{ClientError, ClientResult};
use crate::transport::{
    EventReceiver, PendingAck, QoS, TransportConnector, TransportEvent, TransportSession,
};
use bytes::Bytes;
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// Manages a single MQTT connection with automatic reconnection
pub struct ConnectionManager<C: TransportConnector> {
    inner: Arc<ManagerInner<C>>,
}

impl<C: TransportConnector> Clone for ConnectionManager<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct ManagerInner<C: TransportConnector> {
    config: ConnectionConfig,
    connector: C,
    policy: ReconnectPolicy,
    registry: Arc<SubscriptionRegistry>,
    router: MessageRouter,
    shared: Mutex<SharedState<C::Session>>,
}

struct SharedState<S> {
    state: ConnectionState,
    session: Option<Arc<S>>,
    generation: u64,
    /// Bumped whenever a clean disconnect wipes the registry
    clear_epoch: u64,
    /// Bumped every time the broker acknowledges a connection
    connection_epoch: u64,
    reconnect: ReconnectState,
    retry_timer: Option<JoinHandle<()>>,
    dispatch_task: Option<JoinHandle<()>>,
    on_status: Option<StatusCallback>,
}

impl<S> SharedState<S> {
    fn cancel_retry_timer(&mut self) {
        if let Some(timer) = self.retry_timer.take() {
            timer.abort();
            debug!("Cancelled pending reconnect timer");
        }
    }

    fn retry_pending(&self) -> bool {
        self.retry_timer
            .as_ref()
            .is_some_and(|timer| !timer.is_finished())
    }

    fn stop_dispatch(&mut self) {
        if let Some(task) = self.dispatch_task.take() {
            task.abort();
        }
    }

    fn transition(&mut self, to: ConnectionState) {
        let from = std::mem::replace(&mut self.state, to);
        log_state_transition(from, to);
    }
}

impl<C: TransportConnector> Drop for ManagerInner<C> {
    fn drop(&mut self) {
        // Background tasks only hold weak references; stop them with the manager
        let shared = self.shared.get_mut();
        shared.cancel_retry_timer();
        shared.stop_dispatch();
    }
}

/// Status notification to deliver once the state lock is released
struct PendingStatus {
    callback: Option<StatusCallback>,
    kind: StatusKind,
    error: Option<ClientError>,
}

impl PendingStatus {
    fn deliver(self) {
        notify(self.callback.as_ref(), self.kind, self.error.as_ref());
    }
}

fn notify(callback: Option<&StatusCallback>, kind: StatusKind, error: Option<&ClientError>) {
    match error {
        Some(err) => debug!(status = %kind, error = %err, "Reporting connection status"),
        None => debug!(status = %kind, "Reporting connection status"),
    }
    if let Some(callback) = callback {
        callback(kind, error);
    }
}

/// Log state transitions for debugging
fn log_state_transition(from: ConnectionState, to: ConnectionState) {
    match (from, to) {
        (ConnectionState::Connecting, ConnectionState::Connected) => {
            info!("MQTT connection established successfully");
        }
        (ConnectionState::Connected, ConnectionState::Disconnected) => {
            warn!("MQTT connection lost");
        }
        (ConnectionState::Connecting, ConnectionState::Disconnected) => {
            warn!("MQTT connection attempt failed");
        }
        (ConnectionState::Disconnected, ConnectionState::Connecting) => {
            info!("Connecting to MQTT broker");
        }
        (from, to) if from == to => {}
        (from, to) => {
            debug!("MQTT connection state: {:?} -> {:?}", from, to);
        }
    }
}

fn failure_status(event: &TransportEvent) -> Option<StatusKind> {
    match event {
        TransportEvent::Error(_) => Some(StatusKind::Error),
        TransportEvent::Timeout(_) => Some(StatusKind::ConnectTimeout),
        TransportEvent::Closed(_) => Some(StatusKind::ConnectClosed),
        TransportEvent::Disconnected(_) => Some(StatusKind::Disconnected),
        TransportEvent::Connected | TransportEvent::MessageReceived { .. } => None,
    }
}

impl<C: TransportConnector> ConnectionManager<C> {
    /// Create a manager; no connection is attempted until [`connect`](Self::connect)
    pub fn new(config: ConnectionConfig, connector: C) -> ClientResult<Self> {
        config.validate()?;

        let policy = ReconnectPolicy::from_config(&config);
        let registry = Arc::new(SubscriptionRegistry::new());
        let shared = SharedState {
            state: ConnectionState::Disconnected,
            session: None,
            generation: 0,
            clear_epoch: 0,
            connection_epoch: 0,
            reconnect: ReconnectState::new(&policy),
            retry_timer: None,
            dispatch_task: None,
            on_status: None,
        };

        Ok(Self {
            inner: Arc::new(ManagerInner {
                router: MessageRouter::new(registry.clone()),
                config,
                connector,
                policy,
                registry,
                shared: Mutex::new(shared),
            }),
        })
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    pub fn reconnect_policy(&self) -> &ReconnectPolicy {
        &self.inner.policy
    }

    pub async fn state(&self) -> ConnectionState {
        self.inner.shared.lock().await.state
    }

    pub async fn is_connected(&self) -> bool {
        self.state().await == ConnectionState::Connected
    }

    pub async fn reconnect_state(&self) -> ReconnectState {
        self.inner.shared.lock().await.reconnect
    }

    /// Topics currently in the subscription registry
    pub async fn subscribed_topics(&self) -> Vec<String> {
        self.inner.registry.topics().await
    }

    pub async fn subscription_qos(&self, topic: &str) -> Option<QoS> {
        self.inner.registry.qos(topic).await
    }

    /// Start connecting to the broker
    ///
    /// Returns once the connection attempt has been started; the outcome and
    /// every later lifecycle change are reported through `on_status`. Calling
    /// this while an attempt is in flight joins that attempt and replaces the
    /// callback.
    pub async fn connect<F>(&self, on_status: F) -> ClientResult<()>
    where
        F: Fn(StatusKind, Option<&ClientError>) + Send + Sync + 'static,
    {
        let on_status: StatusCallback = Arc::new(on_status);
        let mut shared = self.inner.shared.lock().await;

        let state = shared.state;
        match state {
            ConnectionState::Connected => {
                drop(shared);
                debug!("connect() called while already connected");
                notify(Some(&on_status), StatusKind::AlreadyConnected, None);
                return Ok(());
            }
            ConnectionState::Connecting => {
                debug!("connect() called while connecting, joining in-flight attempt");
                shared.on_status = Some(on_status);
                return Ok(());
            }
            ConnectionState::Disconnected => {}
        }

        info!(
            broker = %format!("{}:{}", self.inner.config.host, self.inner.config.port),
            client_id = %self.inner.config.client_id,
            protocol = %self.inner.config.protocol.scheme(),
            "Connecting to MQTT broker"
        );

        shared.on_status = Some(on_status.clone());
        shared.cancel_retry_timer();
        shared.reconnect.reset(&self.inner.policy);
        shared.stop_dispatch();

        if let Some(stale) = shared.session.take() {
            debug!("Ending stale session before reconnecting");
            if let Err(e) = stale.end().await {
                warn!("Failed to end stale session: {}", e);
            }
        }

        if let Err(e) = self.open_session(&mut shared) {
            drop(shared);
            error!("Failed to start MQTT connection: {}", e);
            notify(Some(&on_status), StatusKind::ConnectError, Some(&e));
            return Err(e);
        }

        Ok(())
    }

    /// Close the connection and cancel any pending reconnect
    ///
    /// With `clean_session` the subscription registry is cleared as well.
    pub async fn disconnect(&self) -> ClientResult<()> {
        let mut shared = self.inner.shared.lock().await;

        shared.cancel_retry_timer();
        shared.stop_dispatch();
        let session = shared.session.take();

        if session.is_none() && shared.state == ConnectionState::Disconnected {
            debug!("disconnect() called with no active session");
            return Ok(());
        }

        shared.generation += 1;
        shared.transition(ConnectionState::Disconnected);

        if self.inner.config.clean_session {
            self.inner.registry.clear().await;
            shared.clear_epoch += 1;
            debug!("Cleared subscription registry for clean session");
        }
        drop(shared);

        if let Some(session) = session {
            session.end().await?;
        }

        info!("MQTT client disconnected");
        Ok(())
    }

    /// Publish a message and wait for the broker acknowledgment required by `qos`
    pub async fn publish(
        &self,
        topic: &str,
        payload: impl Into<Bytes>,
        qos: QoS,
        retain: bool,
    ) -> ClientResult<()> {
        let payload = payload.into();
        let payload_len = payload.len();

        let ack = {
            let shared = self.inner.shared.lock().await;
            let session = Self::connected_session(&shared)?;
            session.publish(topic, payload, qos, retain)
        };

        match ack.resolve().await {
            Ok(()) => {
                debug!(topic = %topic, qos = %qos, retain, bytes = payload_len, "Published message");
                Ok(())
            }
            Err(e) => {
                error!(topic = %topic, "Failed to publish message: {}", e);
                Err(e)
            }
        }
    }

    /// Subscribe to `topic` and route its messages to `handler`
    ///
    /// The registry entry is written only after the broker acknowledges the
    /// subscription, with the QoS the broker granted.
    pub async fn subscribe<H>(&self, topic: &str, qos: QoS, handler: H) -> ClientResult<QoS>
    where
        H: Fn(&str, &str) + Send + Sync + 'static,
    {
        let handler: MessageCallback = Arc::new(handler);

        let (ack, issued_epoch, issued_connection) = {
            let shared = self.inner.shared.lock().await;
            let session = Self::connected_session(&shared)?;
            (
                session.subscribe(topic, qos),
                shared.clear_epoch,
                shared.connection_epoch,
            )
        };

        let span = crate::subscription_span!(topic = %topic, qos = %qos);
        let granted = match ack.resolve().instrument(span).await {
            Ok(granted) => granted,
            Err(e) => {
                error!(topic = %topic, "Failed to subscribe: {}", e);
                return Err(e);
            }
        };

        let shared = self.inner.shared.lock().await;
        if shared.clear_epoch != issued_epoch {
            warn!(
                topic = %topic,
                "Subscription acknowledged after a clean disconnect, not registering"
            );
            return Ok(granted);
        }
        self.inner.registry.insert(topic, granted, handler).await;

        // A connection established while the ack was in flight replayed the
        // registry without this topic; issue it there now
        let reissue = match (&shared.session, shared.state) {
            (Some(session), ConnectionState::Connected)
                if shared.connection_epoch != issued_connection =>
            {
                debug!(topic = %topic, qos = %granted, "Re-issuing subscription on the new connection");
                Some((topic.to_string(), session.subscribe(topic, granted)))
            }
            _ => None,
        };
        drop(shared);

        if let Some(replay) = reissue {
            tokio::spawn(await_replay(vec![replay]).in_current_span());
        }

        if granted != qos {
            warn!(topic = %topic, requested = %qos, granted = %granted, "Broker downgraded subscription QoS");
        }
        info!(topic = %topic, qos = %granted, "Subscribed to topic");
        Ok(granted)
    }

    /// Unsubscribe from `topic`; a topic with no registry entry is a no-op
    pub async fn unsubscribe(&self, topic: &str) -> ClientResult<()> {
        let ack = {
            let shared = self.inner.shared.lock().await;
            let session = Self::connected_session(&shared)?;
            if !self.inner.registry.contains(topic).await {
                debug!(topic = %topic, "Not subscribed, nothing to unsubscribe");
                return Ok(());
            }
            session.unsubscribe(topic)
        };

        if let Err(e) = ack.resolve().await {
            error!(topic = %topic, "Failed to unsubscribe: {}", e);
            return Err(e);
        }

        let _shared = self.inner.shared.lock().await;
        self.inner.registry.remove(topic).await;
        info!(topic = %topic, "Unsubscribed from topic");
        Ok(())
    }

    fn connected_session(shared: &SharedState<C::Session>) -> ClientResult<&Arc<C::Session>> {
        match (&shared.session, shared.state) {
            (Some(session), ConnectionState::Connected) => Ok(session),
            (_, state) => Err(ClientError::not_connected(state)),
        }
    }

    /// Build a new session and its dispatch task; the caller holds the state lock
    fn open_session(&self, shared: &mut SharedState<C::Session>) -> ClientResult<()> {
        shared.stop_dispatch();
        shared.generation += 1;
        let generation = shared.generation;
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        match self.inner.connector.connect(&self.inner.config, events_tx) {
            Ok(session) => {
                shared.session = Some(Arc::new(session));
                shared.transition(ConnectionState::Connecting);
                shared.dispatch_task = Some(self.spawn_dispatch(generation, events_rx));
                Ok(())
            }
            Err(e) => {
                shared.transition(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    fn spawn_dispatch(&self, generation: u64, mut events: EventReceiver) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        let span = crate::connection_span!(
            client_id = %self.inner.config.client_id,
            generation = generation
        );

        tokio::spawn(
            async move {
                while let Some(event) = events.recv().await {
                    let Some(inner) = weak.upgrade() else {
                        break;
                    };
                    ConnectionManager { inner }
                        .handle_event(generation, event)
                        .await;
                }
                debug!("Transport event stream ended");
            }
            .instrument(span),
        )
    }

    async fn handle_event(&self, generation: u64, event: TransportEvent) {
        match event {
            TransportEvent::Connected => self.handle_connected(generation).await,
            TransportEvent::MessageReceived { topic, payload } => {
                if self.inner.shared.lock().await.generation != generation {
                    debug!(topic = %topic, "Ignoring message from a stale session");
                    return;
                }
                self.inner.router.dispatch(&topic, &payload).await;
            }
            failure => {
                let Some(kind) = failure_status(&failure) else {
                    return;
                };
                let reason = failure.failure_reason().unwrap_or_default().to_string();
                self.handle_failure(generation, kind, reason).await;
            }
        }
    }

    async fn handle_connected(&self, generation: u64) {
        let mut shared = self.inner.shared.lock().await;
        if shared.generation != generation {
            debug!("Ignoring connect acknowledgment from a stale session");
            return;
        }
        let Some(session) = shared.session.clone() else {
            return;
        };

        // Replay before this handler returns, so no message on the new
        // session is routed ahead of the re-issued subscriptions
        let plan = self.inner.registry.replay_plan().await;
        let replay: Vec<(String, PendingAck<QoS>)> = plan
            .into_iter()
            .map(|(topic, qos)| {
                debug!(topic = %topic, qos = %qos, "Re-subscribing to topic");
                let ack = session.subscribe(&topic, qos);
                (topic, ack)
            })
            .collect();

        shared.connection_epoch += 1;
        shared.reconnect.reset(&self.inner.policy);
        shared.cancel_retry_timer();
        shared.transition(ConnectionState::Connected);
        let callback = shared.on_status.clone();
        drop(shared);

        if !replay.is_empty() {
            info!("Re-subscribing to {} topics", replay.len());
            tokio::spawn(await_replay(replay).in_current_span());
        }

        notify(callback.as_ref(), StatusKind::ConnectSuccess, None);
    }

    async fn handle_failure(&self, generation: u64, kind: StatusKind, reason: String) {
        let mut shared = self.inner.shared.lock().await;
        if shared.generation != generation {
            debug!(status = %kind, "Ignoring failure from a stale session");
            return;
        }

        warn!(status = %kind, reason = %reason, "MQTT connection failure");
        shared.transition(ConnectionState::Disconnected);
        let callback = shared.on_status.clone();
        let exhausted = self.schedule_reconnect(&mut shared);
        drop(shared);

        let error = ClientError::connection_failure(&reason);
        notify(callback.as_ref(), kind, Some(&error));

        if let Some(status) = exhausted {
            status.deliver();
        }
    }

    /// Decide whether to retry; returns the exhaustion report to deliver
    fn schedule_reconnect(&self, shared: &mut SharedState<C::Session>) -> Option<PendingStatus> {
        if shared.state != ConnectionState::Disconnected {
            return None;
        }
        if shared.retry_pending() {
            debug!("Reconnect already scheduled, ignoring failure");
            return None;
        }

        match shared.reconnect.decide(&self.inner.policy) {
            ReconnectDecision::Schedule { attempt, delay } => {
                info!(
                    attempt,
                    max_attempts = ?self.inner.policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Scheduling reconnection attempt"
                );
                shared.retry_timer = Some(self.spawn_retry_timer(shared.generation, delay));
                None
            }
            ReconnectDecision::Exhausted { max_attempts } => {
                if !shared.reconnect.mark_exhausted() {
                    debug!("Reconnect attempts already exhausted, not reporting again");
                    return None;
                }
                error!(
                    "Maximum reconnection attempts ({}) reached, giving up",
                    max_attempts
                );
                Some(PendingStatus {
                    callback: shared.on_status.clone(),
                    kind: StatusKind::ReconnectError,
                    error: Some(ClientError::reconnect_exhausted(max_attempts)),
                })
            }
        }
    }

    fn spawn_retry_timer(&self, generation: u64, delay: std::time::Duration) -> JoinHandle<()> {
        let weak: Weak<ManagerInner<C>> = Arc::downgrade(&self.inner);
        let span = crate::connection_span!(
            client_id = %self.inner.config.client_id,
            generation = generation
        );

        tokio::spawn(
            async move {
                tokio::time::sleep(delay).await;
                if let Some(inner) = weak.upgrade() {
                    ConnectionManager { inner }.fire_retry(generation).await;
                }
            }
            .instrument(span),
        )
    }

    async fn fire_retry(&self, generation: u64) {
        let mut shared = self.inner.shared.lock().await;
        // This task is the timer; drop its handle without aborting it
        shared.retry_timer = None;

        if shared.generation != generation {
            debug!("Reconnect timer fired for a stale session");
            return;
        }
        if shared.state != ConnectionState::Disconnected {
            debug!(state = ?shared.state, "Reconnect timer fired while not disconnected");
            return;
        }

        shared.reconnect.record_attempt(&self.inner.policy);
        info!(
            attempt = shared.reconnect.attempt_count,
            "Attempting reconnection"
        );

        let result = match shared.session.clone() {
            Some(session) => {
                shared.transition(ConnectionState::Connecting);
                session.reconnect()
            }
            None => self.open_session(&mut shared),
        };

        if let Err(e) = result {
            error!("Reconnection attempt failed to start: {}", e);
            shared.transition(ConnectionState::Disconnected);
            let callback = shared.on_status.clone();
            let exhausted = self.schedule_reconnect(&mut shared);
            drop(shared);

            notify(callback.as_ref(), StatusKind::ConnectError, Some(&e));
            if let Some(status) = exhausted {
                status.deliver();
            }
        }
    }
}

async fn await_replay(replay: Vec<(String, PendingAck<QoS>)>) {
    for (topic, ack) in replay {
        match ack.resolve().await {
            Ok(granted) => debug!(topic = %topic, qos = %granted, "Re-subscribed to topic"),
            Err(e) => error!(topic = %topic, "Failed to re-subscribe: {}", e),
        }
    }
}
