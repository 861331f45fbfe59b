//! Error types for the gateway driver.

use std::time::Duration;

use thiserror::Error;

use crate::configuration::ConfigLayout;

/// Transport-level failures reported by a [`ModbusTransport`](crate::transport::ModbusTransport).
#[derive(Debug, Error)]
pub enum TransportError {
    /// Serial line I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Framing or checksum failure reported by the Modbus stack.
    #[error("Modbus protocol error: {0}")]
    Protocol(String),

    /// The device answered with a Modbus exception.
    #[error("Modbus exception: {0}")]
    Exception(String),

    /// No response within the request timeout.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The transport session is closed.
    #[error("Transport session is not open")]
    NotOpen,

    /// The response carried fewer (or more) words than requested.
    #[error("Short read at {address}: expected {expected} words, got {found}")]
    ShortRead {
        address: u16,
        expected: u16,
        found: usize,
    },
}

/// The configuration block does not have the shape of its layout.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Malformed {layout} configuration block: expected {expected} bytes, got {found}")]
pub struct MalformedConfig {
    pub layout: ConfigLayout,
    pub expected: usize,
    pub found: usize,
}

/// Errors that abort device construction.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The unit answering at this address reports another Modbus id.
    #[error("Modbus id stored in configuration registers does not match (expecting {expected}, got {found})")]
    IdentityMismatch { expected: u8, found: u8 },

    #[error(transparent)]
    MalformedConfig(#[from] MalformedConfig),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Result type alias using [`DeviceError`].
pub type Result<T> = std::result::Result<T, DeviceError>;
