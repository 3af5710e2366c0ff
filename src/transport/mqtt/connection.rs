//! Pure rumqttc option building
//!
//! Translates a [`ConnectionConfig`] into rumqttc options for either protocol
//! revision and converts QoS values between the crate and rumqttc.

use super::tls::tls_configuration;
use crate::config::{ConnectionConfig, Protocol};
use crate::error::ClientError;
use crate::transport::QoS;
use rumqttc::Transport as RumqttcTransport;

/// Largest packet accepted from or sent to the broker
pub const MAX_PACKET_SIZE: u32 = 256 * 1024;

/// Broker address and port as rumqttc expects them
///
/// Websocket transports take the full URL as the broker address.
pub fn broker_address(config: &ConnectionConfig) -> Result<(String, u16), ClientError> {
    let url = config.broker_url()?;
    let host = url
        .host_str()
        .ok_or_else(|| ClientError::transport(format!("broker URL has no host: {url}")))?;

    let broker_addr = if config.protocol.is_websocket() {
        url.to_string()
    } else {
        host.to_string()
    };
    Ok((broker_addr, config.port))
}

pub fn transport_for(config: &ConnectionConfig) -> RumqttcTransport {
    match config.protocol {
        Protocol::Mqtt => RumqttcTransport::Tcp,
        Protocol::Mqtts => RumqttcTransport::Tls(tls_configuration(config.reject_unauthorized)),
        Protocol::Ws => RumqttcTransport::Ws,
        Protocol::Wss => RumqttcTransport::Wss(tls_configuration(config.reject_unauthorized)),
    }
}

/// Pure function to configure MQTT 5 options from config
///
/// Called for the first connection and again for every reconnect, so each
/// attempt starts from the same options.
pub fn configure_mqtt_options(
    config: &ConnectionConfig,
) -> Result<rumqttc::v5::MqttOptions, ClientError> {
    config.validate()?;
    let (broker_addr, port) = broker_address(config)?;

    let mut mqtt_options =
        rumqttc::v5::MqttOptions::new(config.client_id.clone(), broker_addr, port);
    mqtt_options.set_transport(transport_for(config));

    if let Some((username, password)) = config.credentials() {
        mqtt_options.set_credentials(username, password);
    }

    mqtt_options.set_keep_alive(config.keepalive());
    mqtt_options.set_clean_start(config.clean_session);
    mqtt_options.set_connection_timeout(config.connect_timeout_secs);
    mqtt_options.set_max_packet_size(Some(MAX_PACKET_SIZE));

    Ok(mqtt_options)
}

/// Pure function to configure MQTT 3.1.1 options from config
pub fn configure_v311_options(
    config: &ConnectionConfig,
) -> Result<rumqttc::MqttOptions, ClientError> {
    config.validate()?;
    let (broker_addr, port) = broker_address(config)?;

    let mut mqtt_options = rumqttc::MqttOptions::new(config.client_id.clone(), broker_addr, port);
    mqtt_options.set_transport(transport_for(config));

    if let Some((username, password)) = config.credentials() {
        mqtt_options.set_credentials(username, password);
    }

    // A zero keep-alive disables pings on 3.1.1
    mqtt_options.set_keep_alive(config.keepalive());
    mqtt_options.set_clean_session(config.clean_session);
    mqtt_options.set_connection_timeout(config.connect_timeout_secs);
    mqtt_options.set_max_packet_size(MAX_PACKET_SIZE as usize, MAX_PACKET_SIZE as usize);

    Ok(mqtt_options)
}

pub fn to_rumqttc_qos(qos: QoS) -> rumqttc::v5::mqttbytes::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::v5::mqttbytes::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::v5::mqttbytes::QoS::AtLeastOnce,
        QoS::ExactlyOnce => rumqttc::v5::mqttbytes::QoS::ExactlyOnce,
    }
}

pub fn from_rumqttc_qos(qos: rumqttc::v5::mqttbytes::QoS) -> QoS {
    match qos {
        rumqttc::v5::mqttbytes::QoS::AtMostOnce => QoS::AtMostOnce,
        rumqttc::v5::mqttbytes::QoS::AtLeastOnce => QoS::AtLeastOnce,
        rumqttc::v5::mqttbytes::QoS::ExactlyOnce => QoS::ExactlyOnce,
    }
}

pub fn to_v311_qos(qos: QoS) -> rumqttc::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

pub fn from_v311_qos(qos: rumqttc::QoS) -> QoS {
    match qos {
        rumqttc::QoS::AtMostOnce => QoS::AtMostOnce,
        rumqttc::QoS::AtLeastOnce => QoS::AtLeastOnce,
        rumqttc::QoS::ExactlyOnce => QoS::ExactlyOnce,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProtocolVersion;
    use std::time::Duration;

    fn v5_config(host: &str, port: u16) -> ConnectionConfig {
        let mut config = ConnectionConfig::new(host, port);
        config.protocol_version = ProtocolVersion::V5;
        config
    }

    #[test]
    fn test_plain_tcp_options() {
        let mut config = v5_config("broker.local", 1884);
        config.client_id = "sensor-7".to_string();
        config.keepalive_secs = 30;
        config.clean_session = false;

        let options = configure_mqtt_options(&config).unwrap();

        assert_eq!(options.client_id(), "sensor-7");
        assert_eq!(
            options.broker_address(),
            ("broker.local".to_string(), 1884)
        );
        assert_eq!(options.keep_alive(), Duration::from_secs(30));
        assert!(!options.clean_start());
    }

    #[test]
    fn test_connect_timeout_reaches_client_options() {
        let mut config = v5_config("broker.local", 1883);
        assert_eq!(configure_mqtt_options(&config).unwrap().connection_timeout(), 60);

        config.connect_timeout_secs = 15;
        assert_eq!(configure_mqtt_options(&config).unwrap().connection_timeout(), 15);

        config.protocol_version = ProtocolVersion::V311;
        assert_eq!(configure_v311_options(&config).unwrap().connection_timeout(), 15);
    }

    #[test]
    fn test_short_keepalive_is_an_error_not_a_panic() {
        let mut config = v5_config("broker.local", 1883);
        config.keepalive_secs = 2;

        assert!(matches!(
            configure_mqtt_options(&config),
            Err(ClientError::Config(_))
        ));
    }

    #[test]
    fn test_v311_options() {
        let mut config = ConnectionConfig::new("broker.local", 1883);
        config.client_id = "legacy-1".to_string();
        config.keepalive_secs = 0;
        config.clean_session = false;

        let options = configure_v311_options(&config).unwrap();

        assert_eq!(options.client_id(), "legacy-1");
        assert_eq!(
            options.broker_address(),
            ("broker.local".to_string(), 1883)
        );
        assert_eq!(options.keep_alive(), Duration::ZERO);
        assert!(!options.clean_session());
    }

    #[test]
    fn test_websocket_uses_full_url() {
        let mut config = v5_config("broker.local", 8080);
        config.protocol = Protocol::Ws;
        config.ws_path = "mqtt".to_string();

        let options = configure_mqtt_options(&config).unwrap();

        assert_eq!(
            options.broker_address(),
            ("ws://broker.local:8080/mqtt".to_string(), 8080)
        );
    }

    #[test]
    fn test_transport_per_protocol() {
        let mut config = ConnectionConfig::new("broker.local", 8883);
        assert!(matches!(transport_for(&config), RumqttcTransport::Tcp));

        config.protocol = Protocol::Ws;
        assert!(matches!(transport_for(&config), RumqttcTransport::Ws));

        config.protocol = Protocol::Mqtts;
        config.reject_unauthorized = false;
        assert!(matches!(
            transport_for(&config),
            RumqttcTransport::Tls(rumqttc::TlsConfiguration::Rustls(_))
        ));

        config.protocol = Protocol::Wss;
        assert!(matches!(
            transport_for(&config),
            RumqttcTransport::Wss(rumqttc::TlsConfiguration::Rustls(_))
        ));
    }

    #[test]
    fn test_invalid_host_is_rejected() {
        let config = ConnectionConfig::new("bad host name", 1883);
        assert!(configure_mqtt_options(&config).is_err());
        assert!(configure_v311_options(&config).is_err());
    }

    #[test]
    fn test_qos_conversion() {
        for qos in [QoS::AtMostOnce, QoS::AtLeastOnce, QoS::ExactlyOnce] {
            assert_eq!(from_rumqttc_qos(to_rumqttc_qos(qos)), qos);
            assert_eq!(from_v311_qos(to_v311_qos(qos)), qos);
        }
        assert_eq!(
            to_rumqttc_qos(QoS::AtLeastOnce),
            rumqttc::v5::mqttbytes::QoS::AtLeastOnce
        );
    }
}
