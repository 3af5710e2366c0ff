//! Configuration loading and validation tests
//!
//! Tests focus on BEHAVIOR of configuration loading, validation, and error handling.

use mqttlink::config::{ConfigError, ConnectionConfig, Protocol, ProtocolVersion};
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

#[test]
fn test_config_loads_successfully_from_valid_toml() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(
        temp_file,
        r#"
host = "broker.example.com"
port = 8883
client_id = "sensor-gateway"
protocol = "mqtts"
keepalive_secs = 30
clean_session = false
max_reconnect_attempts = 5
initial_reconnect_delay_ms = 500
max_reconnect_delay_ms = 30000
connect_timeout_secs = 10
"#
    )
    .unwrap();

    let config = ConnectionConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.host, "broker.example.com");
    assert_eq!(config.port, 8883);
    assert_eq!(config.client_id, "sensor-gateway");
    assert_eq!(config.protocol, Protocol::Mqtts);
    assert_eq!(config.keepalive(), Duration::from_secs(30));
    assert!(!config.clean_session);
    assert_eq!(config.reconnect_limit(), Some(5));
    assert_eq!(config.initial_reconnect_delay(), Duration::from_millis(500));
    assert_eq!(config.max_reconnect_delay(), Some(Duration::from_secs(30)));
    assert_eq!(config.connect_timeout(), Duration::from_secs(10));
    assert_eq!(
        config.broker_url().unwrap().as_str(),
        "mqtts://broker.example.com:8883"
    );
}

#[test]
fn test_websocket_config_builds_url_with_path() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(
        temp_file,
        r#"
host = "localhost"
port = 9001
protocol = "ws"
ws_path = "/mqtt"
"#
    )
    .unwrap();

    let config = ConnectionConfig::load_from_file(temp_file.path()).unwrap();

    assert!(config.protocol.is_websocket());
    assert_eq!(
        config.broker_url().unwrap().as_str(),
        "ws://localhost:9001/mqtt"
    );
}

#[test]
fn test_unlimited_reconnect_attempts() {
    let config = ConnectionConfig::from_toml_str(
        r#"
host = "localhost"
port = 1883
max_reconnect_attempts = -1
"#,
    )
    .unwrap();

    assert_eq!(config.reconnect_limit(), None);
}

#[test]
fn test_missing_file_is_read_error() {
    let result = ConnectionConfig::load_from_file(std::path::Path::new(
        "/nonexistent/mqttlink/config.toml",
    ));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_malformed_toml_is_parse_error() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "host = \"localhost\"\nport = ").unwrap();

    let result = ConnectionConfig::load_from_file(temp_file.path());

    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_missing_required_field_is_parse_error() {
    let result = ConnectionConfig::from_toml_str("host = \"localhost\"\n");
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_unknown_protocol_is_rejected() {
    let result = ConnectionConfig::from_toml_str(
        r#"
host = "localhost"
port = 1883
protocol = "quic"
"#,
    );
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_invalid_ranges_are_rejected() {
    let cases = [
        "host = \"\"\nport = 1883\n",
        "host = \"localhost\"\nport = 0\n",
        "host = \"localhost\"\nport = 1883\nmax_reconnect_attempts = -2\n",
        "host = \"localhost\"\nport = 1883\ninitial_reconnect_delay_ms = 0\n",
        "host = \"localhost\"\nport = 1883\ninitial_reconnect_delay_ms = 2000\nmax_reconnect_delay_ms = 1000\n",
    ];

    for case in cases {
        assert!(
            matches!(
                ConnectionConfig::from_toml_str(case),
                Err(ConfigError::InvalidConfig(_))
            ),
            "expected validation failure for: {case}"
        );
    }
}

#[test]
fn test_credentials_from_environment_take_precedence() {
    let config = ConnectionConfig::from_toml_str(
        r#"
host = "localhost"
port = 1883
username = "file-user"
password = "file-pass"
username_env = "MQTTLINK_TEST_CONFIG_USER"
password_env = "MQTTLINK_TEST_CONFIG_PASS"
"#,
    )
    .unwrap();

    assert_eq!(
        config.credentials(),
        Some(("file-user".to_string(), "file-pass".to_string()))
    );

    std::env::set_var("MQTTLINK_TEST_CONFIG_USER", "env-user");
    std::env::set_var("MQTTLINK_TEST_CONFIG_PASS", "env-pass");
    assert_eq!(
        config.credentials(),
        Some(("env-user".to_string(), "env-pass".to_string()))
    );
    std::env::remove_var("MQTTLINK_TEST_CONFIG_USER");
    std::env::remove_var("MQTTLINK_TEST_CONFIG_PASS");
}

#[test]
fn test_short_keepalive_fails_at_load_time() {
    let result = ConnectionConfig::from_toml_str(
        r#"
host = "localhost"
port = 1883
protocol_version = 5
keepalive_secs = 3
"#,
    );

    assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
}

#[test]
fn test_mqtt_311_defaults_and_overrides() {
    let config = ConnectionConfig::from_toml_str(
        r#"
host = "localhost"
port = 8883
protocol = "mqtts"
keepalive_secs = 0
reject_unauthorized = false
"#,
    )
    .unwrap();

    assert_eq!(config.protocol_version, ProtocolVersion::V311);
    assert_eq!(config.keepalive(), Duration::ZERO);
    assert!(!config.reject_unauthorized);
}
