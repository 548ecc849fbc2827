//! Error types for the Zino monitor

use thiserror::Error;

/// Result type for Zino operations
pub type ZinoResult<T> = Result<T, ZinoError>;

/// Error types for the Zino core
#[derive(Error, Debug)]
pub enum ZinoError {
    /// Malformed device file, bad TOML, invalid regex, missing secrets file
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An open event with the same identity already exists
    #[error("Event for {0} already exists")]
    EventExists(String),

    /// Event lookup by id failed
    #[error("Event {0} not found")]
    EventNotFound(u32),

    /// Illegal event lifecycle transition
    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    /// The reachability probe timed out; aborts the rest of the poll cycle
    #[error("Device {0} is unreachable")]
    DeviceUnreachable(String),

    /// Protocol-level error, reported to the operator as `500 <message>`
    #[error("{0}")]
    Protocol(String),

    /// Challenge-response authentication failed
    #[error("Authentication failure: {0}")]
    Authentication(String),

    /// State snapshot or closed-event archive I/O failure
    #[error("State persistence error: {0}")]
    StatePersistence(String),

    /// Failure to bind listening ports or other unrecoverable startup error
    #[error("Fatal error: {0}")]
    Fatal(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for ZinoError {
    fn from(err: std::io::Error) -> Self {
        ZinoError::StatePersistence(err.to_string())
    }
}

impl From<serde_json::Error> for ZinoError {
    fn from(err: serde_json::Error) -> Self {
        ZinoError::StatePersistence(format!("JSON error: {}", err))
    }
}

impl From<regex::Error> for ZinoError {
    fn from(err: regex::Error) -> Self {
        ZinoError::Configuration(format!("invalid regex: {}", err))
    }
}
