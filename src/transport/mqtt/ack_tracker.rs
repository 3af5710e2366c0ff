//! Request/acknowledgment correlation for one rumqttc event loop
//!
//! rumqttc's `try_*` methods only enqueue a request; the packet id is
//! revealed later by the matching outgoing event. The event loop drains its
//! request channel in order, so each kind of request is kept in a FIFO queue
//! until its outgoing event assigns a packet id, and in an in-flight map
//! until the broker's acknowledgment arrives.

use crate::error::ClientError;
use crate::transport::{AckSender, QoS};
use std::collections::{HashMap, VecDeque};
use tracing::warn;

#[derive(Debug, Default)]
pub struct AckTracker {
    queued_publishes: VecDeque<(QoS, AckSender<()>)>,
    queued_subscribes: VecDeque<AckSender<QoS>>,
    queued_unsubscribes: VecDeque<AckSender<()>>,
    publishes: HashMap<u16, AckSender<()>>,
    subscribes: HashMap<u16, AckSender<QoS>>,
    unsubscribes: HashMap<u16, AckSender<()>>,
}

impl AckTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_publish(&mut self, qos: QoS, ack: AckSender<()>) {
        self.queued_publishes.push_back((qos, ack));
    }

    pub fn queue_subscribe(&mut self, ack: AckSender<QoS>) {
        self.queued_subscribes.push_back(ack);
    }

    pub fn queue_unsubscribe(&mut self, ack: AckSender<()>) {
        self.queued_unsubscribes.push_back(ack);
    }

    /// A publish left the client; QoS 0 is complete at this point
    pub fn publish_sent(&mut self, pkid: u16) {
        let Some((qos, ack)) = self.queued_publishes.pop_front() else {
            warn!(pkid, "Outgoing publish with no queued request");
            return;
        };
        match qos {
            QoS::AtMostOnce => {
                let _ = ack.send(Ok(()));
            }
            QoS::AtLeastOnce | QoS::ExactlyOnce => {
                self.publishes.insert(pkid, ack);
            }
        }
    }

    pub fn subscribe_sent(&mut self, pkid: u16) {
        match self.queued_subscribes.pop_front() {
            Some(ack) => {
                self.subscribes.insert(pkid, ack);
            }
            None => warn!(pkid, "Outgoing subscribe with no queued request"),
        }
    }

    pub fn unsubscribe_sent(&mut self, pkid: u16) {
        match self.queued_unsubscribes.pop_front() {
            Some(ack) => {
                self.unsubscribes.insert(pkid, ack);
            }
            None => warn!(pkid, "Outgoing unsubscribe with no queued request"),
        }
    }

    pub fn publish_completed(&mut self, pkid: u16) {
        if let Some(ack) = self.publishes.remove(&pkid) {
            let _ = ack.send(Ok(()));
        }
    }

    pub fn subscribe_acknowledged(&mut self, pkid: u16, result: Result<QoS, String>) {
        if let Some(ack) = self.subscribes.remove(&pkid) {
            let _ = ack.send(result.map_err(ClientError::transport));
        }
    }

    pub fn unsubscribe_acknowledged(&mut self, pkid: u16) {
        if let Some(ack) = self.unsubscribes.remove(&pkid) {
            let _ = ack.send(Ok(()));
        }
    }

    /// Number of requests still waiting for an answer
    pub fn outstanding(&self) -> usize {
        self.queued_publishes.len()
            + self.queued_subscribes.len()
            + self.queued_unsubscribes.len()
            + self.publishes.len()
            + self.subscribes.len()
            + self.unsubscribes.len()
    }

    /// Fail every outstanding request; the event loop behind them is gone
    pub fn fail_all(&mut self, reason: &str) {
        for (_, ack) in self.queued_publishes.drain(..) {
            let _ = ack.send(failure(reason));
        }
        for ack in self.queued_subscribes.drain(..) {
            let _ = ack.send(failure(reason));
        }
        for ack in self.queued_unsubscribes.drain(..) {
            let _ = ack.send(failure(reason));
        }
        for (_, ack) in self.publishes.drain() {
            let _ = ack.send(failure(reason));
        }
        for (_, ack) in self.subscribes.drain() {
            let _ = ack.send(failure(reason));
        }
        for (_, ack) in self.unsubscribes.drain() {
            let _ = ack.send(failure(reason));
        }
    }
}

fn failure<T>(reason: &str) -> Result<T, ClientError> {
    Err(ClientError::transport(reason))
}
