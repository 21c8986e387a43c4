use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Cannot write config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("No config file at {}", .0.display())]
    NotFound(PathBuf),

    /// No home directory to derive `~/.config/camstream` from
    #[error("No config directory available; pass an explicit path")]
    NoConfigDir,

    /// A stored camera password is not valid base64 or UTF-8
    #[error("Unreadable stored credential: {0}")]
    Credential(String),

    /// Rejected by validation, before anything is started
    #[error("Invalid config: {0}")]
    Invalid(String),
}
