//! Connection management for a single MQTT broker connection
//!
//! [`ConnectionManager`] ties the pieces together: [`status`] defines the
//! observable state, [`reconnect`] the backoff policy, [`registry`] the
//! subscriptions to replay and [`router`] the delivery of inbound messages.

pub mod manager;
pub mod reconnect;
pub mod registry;
pub mod router;
pub mod status;

pub use manager::ConnectionManager;
pub use reconnect::{ReconnectDecision, ReconnectPolicy, ReconnectState};
pub use registry::{MessageCallback, SubscriptionEntry, SubscriptionRegistry};
pub use router::{MessageRouter, RouteOutcome};
pub use status::{ConnectionState, StatusCallback, StatusKind};
