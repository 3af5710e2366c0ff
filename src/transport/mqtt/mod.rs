//! MQTT transport over rumqttc
//!
//! Pure functions are kept apart from the I/O so they can be tested without a
//! broker:
//!
//! - [`connection`] - Option building and QoS conversion
//! - [`tls`] - Certificate verification settings
//! - [`message_handler`] - Routing decisions for polled events and errors
//! - [`ack_tracker`] - Correlating requests with broker acknowledgments
//! - [`session`] - The client, event loop pump and reconnect handling
//!
//! Both MQTT 3.1.1 and MQTT 5 are supported, selected by
//! `ConnectionConfig::protocol_version`.
//!
//! # Usage
//!
//! ```rust,no_run
//! use mqttlink::{ConnectionConfig, MqttConnectionManager, QoS};
//!
//! # async fn run() -> Result<(), mqttlink::ClientError> {
//! let manager = MqttConnectionManager::mqtt(ConnectionConfig::new("localhost", 1883))?;
//! manager
//!     .connect(|status, err| println!("status: {status} {err:?}"))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod ack_tracker;
pub mod connection;
pub mod message_handler;
pub mod session;
pub mod tls;

pub use ack_tracker::AckTracker;
pub use connection::{configure_mqtt_options, configure_v311_options};
pub use message_handler::{
    classify_connection_error, classify_v311_error, route_mqtt_event, route_v311_event,
    EventRoute,
};
pub use session::{MqttClient, MqttEventLoop, RumqttcConnector, RumqttcSession};

use crate::client::ConnectionManager;
use crate::config::ConnectionConfig;
use crate::error::ClientResult;

/// Connection manager backed by rumqttc
pub type MqttConnectionManager = ConnectionManager<RumqttcConnector>;

impl ConnectionManager<RumqttcConnector> {
    /// Manager that connects through rumqttc
    pub fn mqtt(config: ConnectionConfig) -> ClientResult<Self> {
        Self::new(config, RumqttcConnector::new())
    }
}
