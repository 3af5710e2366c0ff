//! Error types for connection and subscription management
//!
//! Operation-level failures (`NotConnected`, `TransportError`) are returned to
//! the caller of the operation. Connection-level failures (`ConnectionFailure`,
//! `ReconnectExhausted`) are reported through the status callback.

use crate::client::ConnectionState;
use crate::config::ConfigError;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Main error type for client operations
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Not connected to MQTT broker - current state: {state:?}")]
    NotConnected { state: ConnectionState },

    #[error("Transport error: {message}")]
    TransportError { message: String },

    #[error("Connection failure: {message}")]
    ConnectionFailure { message: String },

    #[error("Maximum reconnection attempts ({max_attempts}) reached")]
    ReconnectExhausted { max_attempts: u32 },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl ClientError {
    pub fn not_connected(state: ConnectionState) -> Self {
        Self::NotConnected { state }
    }

    /// Create transport error with a sanitized message
    pub fn transport<S: AsRef<str>>(message: S) -> Self {
        Self::TransportError {
            message: sanitize_error_message(message.as_ref()),
        }
    }

    /// Create connection failure with a sanitized message
    pub fn connection_failure<S: AsRef<str>>(message: S) -> Self {
        Self::ConnectionFailure {
            message: sanitize_error_message(message.as_ref()),
        }
    }

    pub fn reconnect_exhausted(max_attempts: u32) -> Self {
        Self::ReconnectExhausted { max_attempts }
    }
}

static SECRET_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i)(password|passwd|token|key|secret)[=:]\s*\S+").ok());

static URL_USERINFO_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i)([a-z][a-z0-9+.-]*://)[^/@\s]+@").ok());

const MAX_ERROR_MESSAGE_LEN: usize = 500;

/// Strip credentials from transport error text before it reaches logs or callers
pub(crate) fn sanitize_error_message(message: &str) -> String {
    let mut sanitized = message.to_string();

    if let Some(pattern) = SECRET_PATTERN.as_ref() {
        sanitized = pattern.replace_all(&sanitized, "${1}=***").to_string();
    }

    if let Some(pattern) = URL_USERINFO_PATTERN.as_ref() {
        sanitized = pattern.replace_all(&sanitized, "${1}***@").to_string();
    }

    if sanitized.len() > MAX_ERROR_MESSAGE_LEN {
        let truncate_suffix = "...[truncated]";
        let mut cut = MAX_ERROR_MESSAGE_LEN - truncate_suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized = format!("{}{}", &sanitized[..cut], truncate_suffix);
    }

    sanitized
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;
