//! Testing utilities and mock implementations
//!
//! This module provides an in-memory transport for exercising the connection
//! manager without an MQTT broker.

pub mod mocks;

pub use mocks::*;
