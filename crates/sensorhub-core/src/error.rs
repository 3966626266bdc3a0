//! Error types for the sensor hub core.

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when building or running sensors.
#[derive(Error, Debug)]
pub enum Error {
    /// Sensor descriptor has an empty name.
    #[error("Sensor name must not be empty")]
    EmptyName,

    /// Sensor descriptor has a zero sampling interval.
    #[error("Sensor '{0}' has a zero sampling interval")]
    ZeroInterval(String),

    /// Discipline string is neither blocking nor non-blocking.
    #[error("Unknown sensor discipline: {0}")]
    UnknownDiscipline(String),

    /// A sensor with the same name is already registered.
    #[error("Duplicate sensor name: {0}")]
    DuplicateName(String),

    /// Sensors cannot be added while the hub is running.
    #[error("Cannot modify a running sensor hub")]
    HubRunning,

    /// The OS refused to spawn a background thread.
    #[error("Failed to spawn thread for sensor '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// Sink I/O error.
    #[error("Sink I/O error: {0}")]
    Io(#[from] std::io::Error),
}
