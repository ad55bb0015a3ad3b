//! Error types for simwire-client.

use thiserror::Error;

/// Main error type for all simulator operations.
#[derive(Debug, Error)]
pub enum SimulatorError {
    /// I/O error on the worker's stdio pipes.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error for an outbound call.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The worker process could not be launched.
    #[error("Failed to spawn simulator worker: {0}")]
    Spawn(String),

    /// The worker answered `{ok: false, error}`.
    #[error("Simulator error: {0}")]
    Worker(String),

    /// The worker answered, but its text was empty once lone surrogates were stripped.
    #[error("Simulator returned no usable text")]
    EmptyAfterSanitize,

    /// The worker exited before answering.
    #[error("Simulator process exited")]
    ProcessExited,

    /// The writer task is gone, the call could not be sent.
    #[error("Connection closed")]
    ConnectionClosed,

    /// A call id was registered twice.
    #[error("Call id {0} is already pending")]
    DuplicateCall(u64),

    /// No response within the configured call timeout.
    #[error("Simulator call timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The respawn policy gave up after too many consecutive failures.
    #[error("Simulator unavailable after {0} consecutive failures")]
    Unavailable(u32),

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Object storage collaborator failure.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl SimulatorError {
    /// Stable machine-readable code for envelopes and logs.
    pub fn code(&self) -> &'static str {
        match self {
            SimulatorError::Io(_) => "SIMULATOR_IO",
            SimulatorError::Json(_) => "SIMULATOR_ENCODE",
            SimulatorError::Spawn(_) => "SIMULATOR_SPAWN_FAILED",
            SimulatorError::Worker(_) => "SIMULATOR_WORKER_ERROR",
            SimulatorError::EmptyAfterSanitize => "SIMULATOR_EMPTY_RESPONSE",
            SimulatorError::ProcessExited => "SIMULATOR_PROCESS_EXITED",
            SimulatorError::ConnectionClosed => "SIMULATOR_CONNECTION_CLOSED",
            SimulatorError::DuplicateCall(_) => "SIMULATOR_DUPLICATE_CALL",
            SimulatorError::Timeout(_) => "SIMULATOR_TIMEOUT",
            SimulatorError::Unavailable(_) => "SIMULATOR_UNAVAILABLE",
            SimulatorError::Config(_) => "SIMULATOR_CONFIG",
            SimulatorError::Storage(_) => "STORAGE_ERROR",
        }
    }
}

/// Result type alias using SimulatorError.
pub type Result<T> = std::result::Result<T, SimulatorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_and_empty_codes_differ() {
        let worker = SimulatorError::Worker("boom".into());
        let empty = SimulatorError::EmptyAfterSanitize;
        assert_ne!(worker.code(), empty.code());
        assert_eq!(worker.to_string(), "Simulator error: boom");
    }

    #[test]
    fn test_io_from() {
        let err: SimulatorError = std::io::Error::from(std::io::ErrorKind::BrokenPipe).into();
        assert_eq!(err.code(), "SIMULATOR_IO");
    }
}
