//! mqttlink - MQTT connection and subscription management
//!
//! Keeps one logical connection to an MQTT broker alive for its caller.
//!
//! # Overview
//!
//! - Connection lifecycle with status reporting through a callback
//! - Automatic reconnection with exponential backoff and an attempt ceiling
//! - A subscription registry that is replayed after every reconnect
//! - Exact-topic routing of inbound messages to per-subscription handlers
//!
//! The manager is transport-agnostic; [`transport::mqtt`] provides the
//! rumqttc binding and [`testing`] an in-memory one.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use mqttlink::{ConnectionConfig, MqttConnectionManager, QoS, StatusKind};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! mqttlink::observability::init_default_logging();
//!
//! let config = ConnectionConfig::new("localhost", 1883);
//! let manager = MqttConnectionManager::mqtt(config)?;
//!
//! manager
//!     .connect(|status, err| match status {
//!         StatusKind::ConnectSuccess => println!("connected"),
//!         other => eprintln!("{other}: {err:?}"),
//!     })
//!     .await?;
//!
//! // Once connected:
//! manager
//!     .subscribe("sensors/temp", QoS::AtLeastOnce, |topic, payload| {
//!         println!("{topic}: {payload}");
//!     })
//!     .await?;
//! manager
//!     .publish("sensors/temp", "21.5", QoS::AtLeastOnce, false)
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod observability;
pub mod testing;
pub mod transport;

pub use client::{
    ConnectionManager, ConnectionState, MessageCallback, ReconnectPolicy, ReconnectState,
    StatusCallback, StatusKind, SubscriptionRegistry,
};
pub use config::{
    ConfigError, ConnectionConfig, Protocol, ProtocolVersion, MIN_KEEPALIVE_SECS,
    UNLIMITED_RECONNECT_ATTEMPTS,
};
pub use error::{ClientError, ClientResult};
pub use transport::mqtt::{MqttConnectionManager, RumqttcConnector};
pub use transport::{QoS, TransportConnector, TransportEvent, TransportSession};
