use config_manager::ConfigError;
use thiserror::Error;

use crate::lifecycle::StreamStatus;

#[derive(Error, Debug)]
pub enum StreamError {
    /// Rejected before anything was spawned or registered
    #[error("Invalid configuration: {0}")]
    ConfigurationInvalid(String),

    #[error("Failed to spawn transcoder: {0}")]
    ProcessSpawn(String),

    #[error("Transcoder disconnected: {0}")]
    TransientDisconnect(String),

    #[error("Stream failed after {attempts} attempts: {last_error}")]
    PermanentFailure { attempts: u32, last_error: String },

    /// Never surfaced as a session error, only logged
    #[error("Cleanup warning: {0}")]
    FilesystemCleanup(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid transition from {from}: {event}")]
    InvalidTransition { from: StreamStatus, event: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ConfigError> for StreamError {
    fn from(e: ConfigError) -> Self {
        match e {
            ConfigError::Invalid(reason) => StreamError::ConfigurationInvalid(reason),
            other => StreamError::ConfigurationInvalid(other.to_string()),
        }
    }
}
