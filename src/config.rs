//! Connection configuration for the MQTT session manager
//!
//! A [`ConnectionConfig`] is loaded from TOML (or built in code) once and stays
//! immutable for the lifetime of a [`ConnectionManager`](crate::ConnectionManager).

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Sentinel for `max_reconnect_attempts` that disables the attempt ceiling
pub const UNLIMITED_RECONNECT_ATTEMPTS: i64 = -1;

/// Shortest keep-alive interval the MQTT client accepts; 0 disables keep-alive
pub const MIN_KEEPALIVE_SECS: u64 = 5;

/// Transport protocol used to reach the broker
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Plain TCP
    #[default]
    Mqtt,
    /// TCP with TLS
    Mqtts,
    /// WebSocket
    Ws,
    /// WebSocket over TLS
    Wss,
}

impl Protocol {
    /// URL scheme for this protocol
    pub fn scheme(&self) -> &'static str {
        match self {
            Protocol::Mqtt => "mqtt",
            Protocol::Mqtts => "mqtts",
            Protocol::Ws => "ws",
            Protocol::Wss => "wss",
        }
    }

    pub fn is_websocket(&self) -> bool {
        matches!(self, Protocol::Ws | Protocol::Wss)
    }
}

/// MQTT protocol revision, written as its protocol level (4 or 5) in TOML
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(try_from = "u8", into = "u8")]
pub enum ProtocolVersion {
    /// MQTT 3.1.1
    #[default]
    V311,
    /// MQTT 5
    V5,
}

impl ProtocolVersion {
    pub fn level(self) -> u8 {
        match self {
            ProtocolVersion::V311 => 4,
            ProtocolVersion::V5 => 5,
        }
    }
}

impl TryFrom<u8> for ProtocolVersion {
    type Error = String;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            4 => Ok(ProtocolVersion::V311),
            5 => Ok(ProtocolVersion::V5),
            other => Err(format!(
                "unsupported protocol_version {other}, expected 4 (MQTT 3.1.1) or 5 (MQTT 5)"
            )),
        }
    }
}

impl From<ProtocolVersion> for u8 {
    fn from(version: ProtocolVersion) -> Self {
        version.level()
    }
}

/// Broker connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionConfig {
    /// Broker host name or address
    pub host: String,
    /// Broker port
    pub port: u16,
    /// Client identifier presented to the broker
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Transport protocol selector
    #[serde(default)]
    pub protocol: Protocol,
    /// MQTT protocol revision (4 = 3.1.1, 5 = MQTT 5)
    #[serde(default)]
    pub protocol_version: ProtocolVersion,
    /// Verify the broker certificate on TLS transports
    #[serde(default = "default_reject_unauthorized")]
    pub reject_unauthorized: bool,
    /// Path used for websocket transports
    #[serde(default = "default_ws_path")]
    pub ws_path: String,
    /// Keep-alive interval in seconds (0 disables it, MQTT 3.1.1 only)
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,
    /// Discard session state on disconnect
    #[serde(default = "default_clean_session")]
    pub clean_session: bool,
    /// Maximum automatic reconnect attempts (-1 = unlimited)
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: i64,
    /// Delay before the first reconnect attempt, in milliseconds
    #[serde(default = "default_initial_reconnect_delay")]
    pub initial_reconnect_delay_ms: u64,
    /// Optional ceiling on the backoff delay, in milliseconds
    #[serde(default)]
    pub max_reconnect_delay_ms: Option<u64>,
    /// Time allowed for the broker to acknowledge a connect, in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Literal username
    #[serde(default)]
    pub username: Option<String>,
    /// Literal password
    #[serde(default)]
    pub password: Option<String>,
    /// Environment variable containing the username
    #[serde(default)]
    pub username_env: Option<String>,
    /// Environment variable containing the password
    #[serde(default)]
    pub password_env: Option<String>,
}

fn default_client_id() -> String {
    let random = uuid::Uuid::new_v4().simple().to_string();
    format!("id_{}", &random[..8])
}

fn default_ws_path() -> String {
    "/mqtt".to_string()
}

fn default_reject_unauthorized() -> bool {
    true
}

fn default_keepalive() -> u64 {
    60
}

fn default_clean_session() -> bool {
    true
}

fn default_max_reconnect_attempts() -> i64 {
    10
}

fn default_initial_reconnect_delay() -> u64 {
    1000
}

fn default_connect_timeout() -> u64 {
    60
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ConnectionConfig {
    /// Build a configuration with defaults for everything but the broker address
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            client_id: default_client_id(),
            protocol: Protocol::default(),
            protocol_version: ProtocolVersion::default(),
            reject_unauthorized: default_reject_unauthorized(),
            ws_path: default_ws_path(),
            keepalive_secs: default_keepalive(),
            clean_session: default_clean_session(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            initial_reconnect_delay_ms: default_initial_reconnect_delay(),
            max_reconnect_delay_ms: None,
            connect_timeout_secs: default_connect_timeout(),
            username: None,
            password: None,
            username_env: None,
            password_env: None,
        }
    }

    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text and validate it
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ConnectionConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check field ranges that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::InvalidConfig("host must not be empty".to_string()));
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidConfig("port must be non-zero".to_string()));
        }
        if self.client_id.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "client_id must not be empty".to_string(),
            ));
        }
        if self.keepalive_secs == 0 {
            if self.protocol_version == ProtocolVersion::V5 {
                return Err(ConfigError::InvalidConfig(
                    "keepalive_secs = 0 (disabled) requires protocol_version 4".to_string(),
                ));
            }
        } else if !(MIN_KEEPALIVE_SECS..=u64::from(u16::MAX)).contains(&self.keepalive_secs) {
            return Err(ConfigError::InvalidConfig(format!(
                "keepalive_secs must be 0 or between {MIN_KEEPALIVE_SECS} and {}, got {}",
                u16::MAX,
                self.keepalive_secs
            )));
        }
        if self.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "connect_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.max_reconnect_attempts < UNLIMITED_RECONNECT_ATTEMPTS {
            return Err(ConfigError::InvalidConfig(format!(
                "max_reconnect_attempts must be >= 0 or {UNLIMITED_RECONNECT_ATTEMPTS} for unlimited, got {}",
                self.max_reconnect_attempts
            )));
        }
        if self.initial_reconnect_delay_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "initial_reconnect_delay_ms must be greater than 0".to_string(),
            ));
        }
        if let Some(max_delay) = self.max_reconnect_delay_ms {
            if max_delay < self.initial_reconnect_delay_ms {
                return Err(ConfigError::InvalidConfig(
                    "max_reconnect_delay_ms must not be below initial_reconnect_delay_ms"
                        .to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Attempt ceiling, `None` when unlimited
    pub fn reconnect_limit(&self) -> Option<u32> {
        if self.max_reconnect_attempts == UNLIMITED_RECONNECT_ATTEMPTS {
            None
        } else {
            Some(u32::try_from(self.max_reconnect_attempts.max(0)).unwrap_or(u32::MAX))
        }
    }

    pub fn initial_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.initial_reconnect_delay_ms)
    }

    pub fn max_reconnect_delay(&self) -> Option<Duration> {
        self.max_reconnect_delay_ms.map(Duration::from_millis)
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Resolve credentials, preferring environment variables over literals
    pub fn credentials(&self) -> Option<(String, String)> {
        let username = Self::get_env_var_optional(self.username_env.as_ref())
            .or_else(|| self.username.clone())?;
        let password = Self::get_env_var_optional(self.password_env.as_ref())
            .or_else(|| self.password.clone())
            .unwrap_or_default();
        Some((username, password))
    }

    fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
        env_var_name.and_then(|name| std::env::var(name).ok())
    }

    /// Broker URL assembled from protocol, host, port and websocket path
    pub fn broker_url(&self) -> Result<Url, ConfigError> {
        let path = if self.protocol.is_websocket() {
            if self.ws_path.starts_with('/') {
                self.ws_path.clone()
            } else {
                format!("/{}", self.ws_path)
            }
        } else {
            String::new()
        };
        let raw = format!(
            "{}://{}:{}{}",
            self.protocol.scheme(),
            self.host,
            self.port,
            path
        );
        let url = Url::parse(&raw).map_err(|_| ConfigError::InvalidBrokerUrl(raw.clone()))?;
        if url.host_str().is_none() {
            return Err(ConfigError::InvalidBrokerUrl(raw));
        }
        Ok(url)
    }
}
