//! Connection state and status reporting types

use crate::error::ClientError;
use std::fmt;
use std::sync::Arc;

/// Connection state of a manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No usable connection; the initial state
    #[default]
    Disconnected,
    /// Handshake in progress
    Connecting,
    /// Ready for publish, subscribe and unsubscribe
    Connected,
}

/// Status reported to the caller of `connect`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusKind {
    AlreadyConnected,
    ConnectSuccess,
    ConnectTimeout,
    Error,
    Disconnected,
    ConnectClosed,
    ConnectError,
    ReconnectError,
}

impl StatusKind {
    /// Stable wire name of the status
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusKind::AlreadyConnected => "already_connected",
            StatusKind::ConnectSuccess => "connectSuccess",
            StatusKind::ConnectTimeout => "connectTimeout",
            StatusKind::Error => "error",
            StatusKind::Disconnected => "disconnected",
            StatusKind::ConnectClosed => "connectClosed",
            StatusKind::ConnectError => "connectError",
            StatusKind::ReconnectError => "reconnectError",
        }
    }
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Callback receiving status changes, with the error for failure statuses
pub type StatusCallback = Arc<dyn Fn(StatusKind, Option<&ClientError>) + Send + Sync>;
